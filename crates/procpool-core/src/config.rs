//! Pool configuration and worker binary discovery.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::ipc::protocol::{DEFAULT_CHUNK_BYTES, MAX_PAYLOAD_LEN};

/// Environment variable pointing at the worker binary.
pub const WORKER_PATH_ENV: &str = "PROCPOOL_WORKER_PATH";
/// Environment variable overriding the default worker count.
pub const WORKERS_ENV: &str = "PROCPOOL_WORKERS";
/// Name of the stock worker binary.
pub const WORKER_BIN: &str = "procpool-worker";

/// How to launch a worker process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Explicit program path. `None` means discover it.
    pub program: Option<PathBuf>,
    /// Extra arguments passed to every worker.
    pub args: Vec<OsString>,
}

impl WorkerSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Resolve the program to execute.
    ///
    /// Looks for the worker binary in the following order:
    /// 1. The explicit `program` path
    /// 2. `PROCPOOL_WORKER_PATH` environment variable
    /// 3. Same directory as the current executable (and its parent, for test
    ///    binaries living in `target/<profile>/deps`)
    /// 4. System PATH
    /// 5. `target/debug` or `target/release` of the workspace
    pub fn resolve(&self) -> Result<PathBuf> {
        if let Some(ref program) = self.program {
            if program.exists() {
                return Ok(program.clone());
            }
            return Err(Error::Spawn(format!(
                "worker binary '{}' does not exist",
                program.display()
            )));
        }

        let worker_name = worker_file_name();

        if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(path);
            }
            tracing::warn!(path = %path.display(), "{} points at a missing file", WORKER_PATH_ENV);
        }

        if let Ok(exe_path) = std::env::current_exe()
            && let Some(exe_dir) = exe_path.parent()
        {
            let candidates = [Some(exe_dir), exe_dir.parent()];
            for dir in candidates.into_iter().flatten() {
                let worker_path = dir.join(&worker_name);
                if worker_path.exists() {
                    return Ok(worker_path);
                }
            }
        }

        if let Ok(path) = which::which(&worker_name) {
            return Ok(path);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            for profile in &["debug", "release"] {
                let path = PathBuf::from(&manifest_dir)
                    .join("..")
                    .join("..")
                    .join("target")
                    .join(profile)
                    .join(&worker_name);
                if path.exists() {
                    return Ok(path.canonicalize().unwrap_or(path));
                }
            }
        }

        Err(Error::Spawn(format!(
            "Could not find {} binary. Set {} or ensure it's in PATH.",
            WORKER_BIN, WORKER_PATH_ENV
        )))
    }
}

fn worker_file_name() -> String {
    if cfg!(windows) {
        format!("{}.exe", WORKER_BIN)
    } else {
        WORKER_BIN.to_string()
    }
}

/// Configuration for a [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker processes.
    pub workers: usize,
    /// Items per dispatched chunk. `None` picks a size from the input length.
    pub chunk_size: Option<usize>,
    /// Payload bytes per chunk frame. Chunks are cut short to stay within it,
    /// and workers flush outputs in frames of at most this size.
    pub chunk_bytes: usize,
    /// Worker launch settings.
    pub worker: WorkerSpec,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: None,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            worker: WorkerSpec::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    pub fn worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker.program = Some(program.into());
        self
    }

    pub fn worker_spec(mut self, worker: WorkerSpec) -> Self {
        self.worker = worker;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config {
                field: "workers",
                message: "worker count must be at least 1".to_string(),
            });
        }
        if self.chunk_size == Some(0) {
            return Err(Error::Config {
                field: "chunk_size",
                message: "chunk size must be at least 1".to_string(),
            });
        }
        if self.chunk_bytes == 0 || self.chunk_bytes > MAX_PAYLOAD_LEN {
            return Err(Error::Config {
                field: "chunk_bytes",
                message: format!(
                    "chunk byte budget must be between 1 and {}, got {}",
                    MAX_PAYLOAD_LEN, self.chunk_bytes
                ),
            });
        }
        Ok(())
    }

    /// Chunk size used for `len` items.
    ///
    /// Without an explicit size, aims for about four chunks per worker so a
    /// slow item does not leave the other workers idle at the tail.
    pub fn effective_chunk_size(&self, len: usize) -> usize {
        match self.chunk_size {
            Some(size) => size.max(1),
            None => len.div_ceil(self.workers.max(1) * 4).max(1),
        }
    }
}

/// Worker count from `PROCPOOL_WORKERS`, falling back to the CPU count.
pub fn default_workers() -> usize {
    std::env::var(WORKERS_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_workers_rejected() {
        let config = PoolConfig::new(0);
        assert!(matches!(
            config.validate(),
            Err(Error::Config { field: "workers", .. })
        ));
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let config = PoolConfig::new(2).chunk_size(0);
        assert!(matches!(
            config.validate(),
            Err(Error::Config { field: "chunk_size", .. })
        ));
    }

    #[test]
    fn test_chunk_bytes_bounds() {
        assert!(PoolConfig::new(2).chunk_bytes(1).validate().is_ok());
        assert!(PoolConfig::new(2).validate().is_ok());
        for bad in [0, MAX_PAYLOAD_LEN + 1] {
            assert!(matches!(
                PoolConfig::new(2).chunk_bytes(bad).validate(),
                Err(Error::Config { field: "chunk_bytes", .. })
            ));
        }
    }

    #[test]
    fn test_default_chunk_size() {
        let config = PoolConfig::new(3);
        assert_eq!(config.effective_chunk_size(0), 1);
        assert_eq!(config.effective_chunk_size(10), 1);
        assert_eq!(config.effective_chunk_size(100), 9);
        assert_eq!(config.chunk_size(5).effective_chunk_size(100), 5);
    }

    #[test]
    fn test_default_workers_positive() {
        assert!(PoolConfig::default().workers >= 1);
    }

    #[test]
    fn test_missing_explicit_program() {
        let spec = WorkerSpec::new("/definitely/not/a/procpool-worker");
        assert!(matches!(spec.resolve(), Err(Error::Spawn(_))));
    }
}
