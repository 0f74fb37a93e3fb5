//! Run command implementation for procpool CLI.
//!
//! Applies a built-in task to values given on the command line.

use std::fmt::Debug;
use std::str::FromStr;
use std::time::Instant;

use anyhow::Context;
use procpool::builtin::{CheckedSqrt, SlowInput, SlowSquare, Square};
use procpool::{PoolConfig, Task};

use crate::TaskKind;
use crate::colors;

/// Execute the run command.
pub fn execute(
    config: PoolConfig,
    task: TaskKind,
    values: &[String],
    delay_ms: u64,
    sequential: bool,
) -> anyhow::Result<()> {
    match task {
        TaskKind::Square => dispatch::<Square>(config, parse_all(values)?, sequential),
        TaskKind::CheckedSqrt => dispatch::<CheckedSqrt>(config, parse_all(values)?, sequential),
        TaskKind::SlowSquare => {
            let items = parse_all::<i64>(values)?
                .into_iter()
                .map(|value| SlowInput { value, delay_ms })
                .collect();
            dispatch::<SlowSquare>(config, items, sequential)
        }
    }
}

fn parse_all<V>(values: &[String]) -> anyhow::Result<Vec<V>>
where
    V: FromStr,
    V::Err: std::error::Error + Send + Sync + 'static,
{
    values
        .iter()
        .map(|v| v.parse::<V>().with_context(|| format!("invalid input value '{}'", v)))
        .collect()
}

fn dispatch<T: Task>(config: PoolConfig, items: Vec<T::Input>, sequential: bool) -> anyhow::Result<()>
where
    T::Output: Debug,
{
    let count = items.len();
    let workers = config.workers;
    let start = Instant::now();

    let results = if sequential {
        procpool::run_sequential::<T>(items)?
    } else {
        procpool::run::<T>(config, items)?
    };
    let elapsed = start.elapsed();

    println!("{:?}", results);

    let mode = if sequential {
        "sequentially".to_string()
    } else {
        format!("on {} workers", workers)
    };
    eprintln!(
        "{}Completed{} {} items {} in {:.3}s {}({}){}",
        colors::GREEN,
        colors::RESET,
        count,
        mode,
        elapsed.as_secs_f64(),
        colors::DIM,
        T::NAME,
        colors::RESET
    );

    Ok(())
}
