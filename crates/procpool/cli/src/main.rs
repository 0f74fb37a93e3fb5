//! procpool CLI - process-pool parallel map and timing demo.

mod bench;
mod colors;
mod run;
mod tasks;

use clap::{Parser, Subcommand, ValueEnum};
use procpool::PoolConfig;

#[derive(Parser)]
#[command(name = "procpool")]
#[command(about = "Map a task over inputs on a pool of worker processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the worker binary (defaults to PROCPOOL_WORKER_PATH, then discovery)
    #[arg(long, global = true)]
    worker_path: Option<String>,
}

/// Built-in tasks runnable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TaskKind {
    /// x -> x * x (integers)
    Square,
    /// Sleep --delay-ms, then square (integers)
    SlowSquare,
    /// Square root, failing on negative input (floats)
    CheckedSqrt,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a task to the given values and print the results in order
    Run {
        /// Task to apply
        #[arg(short, long, value_enum, default_value = "square")]
        task: TaskKind,

        /// Input values
        #[arg(allow_negative_numbers = true)]
        values: Vec<String>,

        /// Number of worker processes
        #[arg(short, long)]
        workers: Option<usize>,

        /// Items per dispatched chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Delay per item for slow-square, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Run in this process with a plain loop instead of the pool
        #[arg(long)]
        sequential: bool,
    },

    /// Time a sequential loop against the worker pool
    Bench {
        /// Number of worker processes
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of work items
        #[arg(short, long, default_value = "12")]
        items: usize,

        /// Simulated work per item, in milliseconds
        #[arg(long, default_value = "100")]
        delay_ms: u64,

        /// Items per dispatched chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// List the tasks registered in the worker binary
    Tasks,
}

fn pool_config(
    workers: Option<usize>,
    chunk_size: Option<usize>,
    worker_path: Option<&str>,
) -> PoolConfig {
    let mut config = PoolConfig::default();
    if let Some(workers) = workers {
        config = config.workers(workers);
    }
    if let Some(chunk_size) = chunk_size {
        config = config.chunk_size(chunk_size);
    }
    if let Some(path) = worker_path {
        config = config.worker_program(path);
    }
    config
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Helper to format procpool errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(pool_err) = err.downcast_ref::<procpool::Error>() {
            anyhow::anyhow!("{}", pool_err.with_hint())
        } else {
            err
        }
    };

    let worker_path = cli.worker_path.as_deref();

    match cli.command {
        Commands::Run {
            task,
            values,
            workers,
            chunk_size,
            delay_ms,
            sequential,
        } => {
            let config = pool_config(workers, chunk_size, worker_path);
            run::execute(config, task, &values, delay_ms, sequential).map_err(format_error)?;
        }

        Commands::Bench {
            workers,
            items,
            delay_ms,
            chunk_size,
        } => {
            let config = pool_config(workers, chunk_size, worker_path);
            bench::execute(config, items, delay_ms).map_err(format_error)?;
        }

        Commands::Tasks => {
            let config = pool_config(None, None, worker_path);
            tasks::execute(&config).map_err(format_error)?;
        }
    }

    Ok(())
}
