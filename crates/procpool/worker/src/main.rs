//! procpool worker process.
//!
//! Serves the built-in task registry over stdin/stdout. Spawned by
//! `WorkerPool`; not meant to be run by hand.

use std::io;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // stdout is the IPC channel, so logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    // Task panics are reported to the parent as responses; keep the default
    // hook's backtrace noise out of the parent's terminal.
    std::panic::set_hook(Box::new(|info| {
        tracing::debug!("task panicked: {}", info);
    }));

    let registry = procpool_core::builtin::registry();
    tracing::debug!(pid = std::process::id(), tasks = ?registry.names(), "Worker starting");

    procpool_core::worker::serve_stdio(&registry)?;
    Ok(())
}
