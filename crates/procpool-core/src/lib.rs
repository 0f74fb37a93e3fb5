//! Core engine for procpool.
//!
//! This crate provides:
//! - Task model and worker-side registry
//! - Length-prefixed rkyv IPC between parent and worker processes
//! - A fixed-size pool of isolated worker processes
//! - Order-preserving, fail-fast dispatch with a sequential timing baseline

pub mod builtin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ipc;
pub mod pool;
pub mod task;
pub mod worker;

pub use config::{PoolConfig, WorkerSpec};
pub use dispatch::{Comparison, compare, run, run_sequential, with_pool};
pub use error::{Error, Result};
pub use ipc::{WorkerHandle, WorkerKillHandle};
pub use pool::WorkerPool;
pub use task::{Task, TaskError, TaskRegistry};
