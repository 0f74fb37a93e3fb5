//! Bench command implementation for procpool CLI.
//!
//! Runs the same slow task sequentially and on the pool, then reports both
//! wall-clock times. Small delays show the pipe overhead winning; larger ones
//! show the pool paying off.

use anyhow::Context;
use procpool::builtin::{SlowInput, SlowSquare};
use procpool::{PoolConfig, compare, with_pool};

use crate::colors;

/// Execute the bench command.
pub fn execute(config: PoolConfig, items: usize, delay_ms: u64) -> anyhow::Result<()> {
    let inputs = inputs(items, delay_ms)?;

    println!(
        "{}Benchmarking{} {} items x {}ms on {} workers",
        colors::BOLD,
        colors::RESET,
        items,
        delay_ms,
        config.workers
    );

    let comparison = with_pool(config, |pool| compare::<SlowSquare>(pool, inputs))?;

    println!("{}", "─".repeat(50));
    println!(
        "Sequential:              {:>8.3}s",
        comparison.sequential.as_secs_f64()
    );
    println!(
        "Parallel ({:>2} workers):  {:>8.3}s",
        comparison.workers,
        comparison.parallel.as_secs_f64()
    );

    let speedup = comparison.speedup();
    let color = if speedup >= 1.0 {
        colors::GREEN
    } else {
        colors::YELLOW
    };
    println!("Speedup:                 {}{:>8.2}x{}", color, speedup, colors::RESET);

    if !comparison.outputs_match {
        println!(
            "{}Parallel results differ from the sequential baseline{}",
            colors::RED,
            colors::RESET
        );
        anyhow::bail!("result mismatch between sequential and parallel runs");
    }

    Ok(())
}

fn inputs(items: usize, delay_ms: u64) -> anyhow::Result<Vec<SlowInput>> {
    let count = i64::try_from(items)
        .with_context(|| format!("item count {} does not fit in an i64 input value", items))?;
    Ok((0..count)
        .map(|value| SlowInput { value, delay_ms })
        .collect())
}
