//! Tasks command implementation for procpool CLI.

use procpool::{PoolConfig, WorkerHandle};

/// Start one worker and print the task names it reports in its handshake.
pub fn execute(config: &PoolConfig) -> anyhow::Result<()> {
    let worker = WorkerHandle::spawn(&config.worker)?;
    for name in worker.tasks() {
        println!("{}", name);
    }
    tracing::debug!(pid = worker.pid(), "Listed worker tasks");
    worker.shutdown()?;
    Ok(())
}
