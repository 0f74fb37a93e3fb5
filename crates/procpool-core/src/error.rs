//! Error types for procpool-core.

use thiserror::Error;

/// Result type for procpool-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in procpool-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid pool configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// The `PoolConfig` field that was rejected.
        field: &'static str,
        message: String,
    },

    /// A worker process could not be started.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// The worker binary does not know the requested task.
    #[error("task '{task}' is not registered in worker {pid}")]
    UnknownTask { task: String, pid: u32 },

    /// The task function returned an error for an item.
    #[error("task failed on item {index} (worker {pid}): {message}")]
    Task {
        index: usize,
        pid: u32,
        message: String,
    },

    /// The task function panicked inside a worker.
    #[error("task panicked on item {index} (worker {pid}): {message}")]
    WorkerPanicked {
        index: usize,
        pid: u32,
        message: String,
    },

    /// The worker process died or broke the protocol mid-chunk.
    #[error("worker {pid} crashed while processing item {index}: {reason}")]
    WorkerCrashed {
        pid: u32,
        index: usize,
        reason: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IPC communication error with worker process.
    #[error("IPC error: {0}")]
    Ipc(String),
}

impl Error {
    /// Index of the work item this error is attributed to, if any.
    pub fn item_index(&self) -> Option<usize> {
        match self {
            Error::Task { index, .. }
            | Error::WorkerPanicked { index, .. }
            | Error::WorkerCrashed { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Render the error together with a recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Spawn(_) => Some(
                "build the worker with `cargo build -p procpool-worker` or set PROCPOOL_WORKER_PATH",
            ),
            Error::Config { field, .. } => config_hint(field),
            Error::UnknownTask { .. } => {
                Some("the task must be registered in the worker binary's TaskRegistry")
            }
            Error::WorkerCrashed { .. } => {
                Some("the worker process exited unexpectedly; check its stderr output")
            }
            Error::WorkerPanicked { .. } => {
                Some("check for unwrap() on None/Err, out-of-bounds access, or other panic sources")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

fn config_hint(field: &str) -> Option<&'static str> {
    match field {
        "workers" => Some("pass --workers N with N >= 1, or unset PROCPOOL_WORKERS"),
        "chunk_size" => Some("pass --chunk-size N with N >= 1, or omit it to size chunks automatically"),
        "chunk_bytes" => Some("chunk byte budget must be between 1 byte and the 100 MiB frame limit"),
        _ => None,
    }
}
