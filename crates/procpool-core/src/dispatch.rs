//! One-call dispatch, the sequential baseline, and timing comparison.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::pool::WorkerPool;
use crate::task::Task;

/// Start a pool, hand it to `f`, and shut it down on every exit path.
///
/// A graceful shutdown follows a normal return. If `f` fails or panics the
/// workers are killed before the error or panic continues outward.
pub fn with_pool<R>(config: PoolConfig, f: impl FnOnce(&mut WorkerPool) -> Result<R>) -> Result<R> {
    let mut pool = WorkerPool::start(config)?;

    match panic::catch_unwind(AssertUnwindSafe(|| f(&mut pool))) {
        Ok(Ok(value)) => {
            pool.shutdown()?;
            Ok(value)
        }
        Ok(Err(e)) => {
            drop(pool);
            Err(e)
        }
        Err(payload) => {
            drop(pool);
            panic::resume_unwind(payload)
        }
    }
}

/// Apply `T` to `items` on `config.workers` fresh worker processes.
///
/// The pool lives for this call only.
pub fn run<T: Task>(config: PoolConfig, items: Vec<T::Input>) -> Result<Vec<T::Output>> {
    with_pool(config, |pool| pool.map::<T>(items))
}

/// Apply `T` to each item in a single-threaded loop in this process.
///
/// Failures carry this process's pid.
pub fn run_sequential<T: Task>(items: Vec<T::Input>) -> Result<Vec<T::Output>> {
    let pid = std::process::id();
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            T::run(item).map_err(|e| Error::Task {
                index,
                pid,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Sequential vs parallel timing for the same inputs.
#[derive(Debug, Clone)]
pub struct Comparison<O> {
    pub sequential: Duration,
    pub parallel: Duration,
    pub workers: usize,
    /// Results of the parallel run.
    pub results: Vec<O>,
    /// Whether the sequential and parallel results were equal.
    pub outputs_match: bool,
}

impl<O> Comparison<O> {
    /// Sequential time over parallel time. Above 1.0 means the pool helped.
    pub fn speedup(&self) -> f64 {
        let parallel = self.parallel.as_secs_f64();
        if parallel == 0.0 {
            return f64::INFINITY;
        }
        self.sequential.as_secs_f64() / parallel
    }
}

/// Run `items` through `T` sequentially and on `pool`, timing both.
///
/// Pool startup is not part of the parallel time; only dispatch is.
pub fn compare<T>(pool: &mut WorkerPool, items: Vec<T::Input>) -> Result<Comparison<T::Output>>
where
    T: Task,
    T::Input: Clone,
    T::Output: PartialEq,
{
    let start = Instant::now();
    let expected = run_sequential::<T>(items.clone())?;
    let sequential = start.elapsed();

    let start = Instant::now();
    let results = pool.map::<T>(items)?;
    let parallel = start.elapsed();

    let outputs_match = expected == results;
    if !outputs_match {
        tracing::warn!(task = T::NAME, "Parallel results differ from sequential baseline");
    }
    tracing::info!(
        task = T::NAME,
        sequential_ms = sequential.as_millis() as u64,
        parallel_ms = parallel.as_millis() as u64,
        workers = pool.size(),
        "Timing comparison"
    );

    Ok(Comparison {
        sequential,
        parallel,
        workers: pool.size(),
        results,
        outputs_match,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{CheckedSqrt, Square};

    #[test]
    fn test_sequential_square() {
        let out = run_sequential::<Square>((0..10).collect()).unwrap();
        assert_eq!(out, vec![0, 1, 4, 9, 16, 25, 36, 49, 64, 81]);
    }

    #[test]
    fn test_sequential_empty() {
        let out = run_sequential::<Square>(Vec::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_sequential_failure_index() {
        let err = run_sequential::<CheckedSqrt>(vec![1.0, 4.0, -9.0, 16.0]).unwrap_err();
        match err {
            Error::Task { index, pid, .. } => {
                assert_eq!(index, 2);
                assert_eq!(pid, std::process::id());
            }
            other => panic!("expected Task error, got {:?}", other),
        }
    }

    #[test]
    fn test_speedup() {
        let cmp = Comparison::<i64> {
            sequential: Duration::from_millis(300),
            parallel: Duration::from_millis(100),
            workers: 3,
            results: Vec::new(),
            outputs_match: true,
        };
        assert!((cmp.speedup() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_with_pool_config_error_before_closure() {
        let mut called = false;
        let result = with_pool(PoolConfig::new(0), |_| {
            called = true;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Config { field: "workers", .. })));
        assert!(!called);
    }
}
