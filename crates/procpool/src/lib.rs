//! procpool: apply a pure function to a list of inputs on a pool of worker
//! processes, getting the results back in input order.
//!
//! Process isolation means a task can never corrupt state shared with other
//! tasks, at the price of serializing every input and output across a pipe.
//! The [`compare`] helper times a run against a plain sequential loop so the
//! trade-off can be measured.
//!
//! For internal APIs (IPC protocol, worker handles), see the `procpool-core`
//! crate.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use procpool::prelude::*;
//! use procpool::builtin::Square;
//!
//! let squares = procpool::run::<Square>(PoolConfig::new(3), (0..10).collect())?;
//! assert_eq!(squares, vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
//! ```
//!
//! # Custom tasks
//!
//! A task is a type implementing [`Task`]. The worker process must register it,
//! so custom tasks need their own worker binary:
//!
//! ```rust,ignore
//! fn main() -> procpool::Result<()> {
//!     let registry = procpool::builtin::registry().with::<MyTask>();
//!     procpool::worker::serve_stdio(&registry)
//! }
//! ```
//!
//! Point the pool at it with [`PoolConfig::worker_program`] or the
//! `PROCPOOL_WORKER_PATH` environment variable.

pub use procpool_core::{
    Comparison, Error, PoolConfig, Result, Task, TaskError, TaskRegistry, WorkerHandle,
    WorkerKillHandle, WorkerPool, WorkerSpec, builtin, compare, run, run_sequential, with_pool,
    worker,
};

pub mod prelude {
    //! Common imports for procpool users.

    pub use procpool_core::{
        Error, PoolConfig, Result, Task, TaskError, TaskRegistry, WorkerPool, with_pool,
    };
}
