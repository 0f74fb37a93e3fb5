//! Task functions and the worker-side registry.
//!
//! A closure cannot cross a process boundary, so a task function is a type
//! implementing [`Task`] that both the parent and the worker binary name. The
//! parent uses it to encode inputs and decode outputs; the worker registers it
//! in a [`TaskRegistry`] so it can be looked up by [`Task::NAME`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::{Error, Result};

/// Error returned by a task function for a single work item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A pure function applied to each work item.
///
/// # Preconditions
///
/// `run` must be free of side effects on shared state. Items are processed in
/// an unspecified order on unspecified workers; a task that mutates files,
/// globals or anything else outside its own return value gets no ordering or
/// isolation guarantee from the pool.
pub trait Task {
    /// Wire identifier. Must be unique within a [`TaskRegistry`].
    const NAME: &'static str;

    type Input: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;

    fn run(input: Self::Input) -> std::result::Result<Self::Output, TaskError>;
}

/// Encode a work item or result for transfer across the process boundary.
pub fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::Serialization(format!("Failed to encode payload: {}", e)))
}

/// Decode a work item or result received from the other side of the boundary.
pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::Deserialization(format!("Failed to decode payload: {}", e)))
}

type Runner = Box<dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, TaskError> + Send + Sync>;

/// Name-indexed set of type-erased task runners, used inside worker processes.
#[derive(Default)]
pub struct TaskRegistry {
    runners: BTreeMap<String, Runner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, replacing any earlier task with the same name.
    pub fn register<T: Task + 'static>(&mut self) -> &mut Self {
        let runner: Runner = Box::new(|payload: &[u8]| {
            let input: T::Input = decode(payload)
                .map_err(|e| TaskError::new(format!("{} (task '{}')", e, T::NAME)))?;
            let output = T::run(input)?;
            encode(&output).map_err(|e| TaskError::new(e.to_string()))
        });
        if self.runners.insert(T::NAME.to_string(), runner).is_some() {
            tracing::warn!(task = T::NAME, "Task registered twice, keeping the latest");
        }
        self
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with<T: Task + 'static>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.runners.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.runners.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Run one encoded item through the named task.
    ///
    /// Returns `None` if no task with that name is registered.
    pub fn run(
        &self,
        name: &str,
        payload: &[u8],
    ) -> Option<std::result::Result<Vec<u8>, TaskError>> {
        self.runners.get(name).map(|runner| runner(payload))
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Double;

    impl Task for Double {
        const NAME: &'static str = "double";
        type Input = i64;
        type Output = i64;

        fn run(input: i64) -> std::result::Result<i64, TaskError> {
            Ok(input * 2)
        }
    }

    struct Reject;

    impl Task for Reject {
        const NAME: &'static str = "reject";
        type Input = String;
        type Output = ();

        fn run(input: String) -> std::result::Result<(), TaskError> {
            Err(format!("rejected {}", input).into())
        }
    }

    #[test]
    fn test_registry_runs_by_name() {
        let registry = TaskRegistry::new().with::<Double>().with::<Reject>();
        assert_eq!(registry.names(), vec!["double", "reject"]);

        let out = registry.run("double", &encode(&21i64).unwrap()).unwrap().unwrap();
        assert_eq!(decode::<i64>(&out).unwrap(), 42);
    }

    #[test]
    fn test_registry_unknown_task() {
        let registry = TaskRegistry::new().with::<Double>();
        assert!(registry.run("triple", &[]).is_none());
        assert!(!registry.contains("triple"));
    }

    #[test]
    fn test_registry_surfaces_task_error() {
        let registry = TaskRegistry::new().with::<Reject>();
        let err = registry
            .run("reject", &encode(&"x".to_string()).unwrap())
            .unwrap()
            .unwrap_err();
        assert_eq!(err.message(), "rejected x");
    }

    #[test]
    fn test_registry_bad_payload_is_task_error() {
        let registry = TaskRegistry::new().with::<Double>();
        let err = registry.run("double", &[1, 2]).unwrap().unwrap_err();
        assert!(err.message().contains("task 'double'"));
    }

    #[test]
    fn test_duplicate_registration_keeps_one() {
        let mut registry = TaskRegistry::new();
        registry.register::<Double>().register::<Double>();
        assert_eq!(registry.len(), 1);
    }
}
