//! Built-in demonstration tasks.
//!
//! These are registered by the stock `procpool-worker` binary and used by the
//! CLI's `run` and `bench` commands.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskError, TaskRegistry};

/// `x -> x * x`.
pub struct Square;

impl Task for Square {
    const NAME: &'static str = "square";
    type Input = i64;
    type Output = i64;

    fn run(x: i64) -> Result<i64, TaskError> {
        x.checked_mul(x)
            .ok_or_else(|| TaskError::new(format!("{} squared overflows i64", x)))
    }
}

/// Input for [`SlowSquare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowInput {
    pub value: i64,
    pub delay_ms: u64,
}

/// Sleeps for `delay_ms`, then squares `value`.
///
/// Stands in for per-item work that is expensive relative to the cost of
/// moving the item across the process boundary.
pub struct SlowSquare;

impl Task for SlowSquare {
    const NAME: &'static str = "slow_square";
    type Input = SlowInput;
    type Output = i64;

    fn run(input: SlowInput) -> Result<i64, TaskError> {
        thread::sleep(Duration::from_millis(input.delay_ms));
        Square::run(input.value)
    }
}

/// Square root that rejects negative input.
pub struct CheckedSqrt;

impl Task for CheckedSqrt {
    const NAME: &'static str = "checked_sqrt";
    type Input = f64;
    type Output = f64;

    fn run(x: f64) -> Result<f64, TaskError> {
        if x < 0.0 {
            return Err(TaskError::new(format!("cannot take sqrt of {}", x)));
        }
        Ok(x.sqrt())
    }
}

/// Returns the process ID of whoever executes it.
pub struct WhoAmI;

impl Task for WhoAmI {
    const NAME: &'static str = "who_am_i";
    type Input = ();
    type Output = u32;

    fn run(_: ()) -> Result<u32, TaskError> {
        Ok(std::process::id())
    }
}

/// Length of a byte payload.
pub struct ByteLen;

impl Task for ByteLen {
    const NAME: &'static str = "byte_len";
    type Input = Vec<u8>;
    type Output = u64;

    fn run(bytes: Vec<u8>) -> Result<u64, TaskError> {
        Ok(bytes.len() as u64)
    }
}

/// `n -> vec![0; n]`.
pub struct Zeros;

impl Task for Zeros {
    const NAME: &'static str = "zeros";
    type Input = u64;
    type Output = Vec<u8>;

    fn run(n: u64) -> Result<Vec<u8>, TaskError> {
        let len = usize::try_from(n).map_err(|_| TaskError::new(format!("{} bytes is too many", n)))?;
        Ok(vec![0; len])
    }
}

/// Input for [`PanicOn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanicInput {
    pub value: i64,
    pub trigger: i64,
}

/// Echoes `value`, panicking when it equals `trigger`.
pub struct PanicOn;

impl Task for PanicOn {
    const NAME: &'static str = "panic_on";
    type Input = PanicInput;
    type Output = i64;

    fn run(input: PanicInput) -> Result<i64, TaskError> {
        if input.value == input.trigger {
            panic!("hit trigger value {}", input.trigger);
        }
        Ok(input.value)
    }
}

/// Registry containing every built-in task.
pub fn registry() -> TaskRegistry {
    TaskRegistry::new()
        .with::<Square>()
        .with::<SlowSquare>()
        .with::<CheckedSqrt>()
        .with::<WhoAmI>()
        .with::<PanicOn>()
        .with::<ByteLen>()
        .with::<Zeros>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square() {
        assert_eq!(Square::run(-7).unwrap(), 49);
        assert!(Square::run(i64::MAX).is_err());
    }

    #[test]
    fn test_slow_square_zero_delay() {
        let out = SlowSquare::run(SlowInput {
            value: 9,
            delay_ms: 0,
        })
        .unwrap();
        assert_eq!(out, 81);
    }

    #[test]
    fn test_checked_sqrt_rejects_negative() {
        assert_eq!(CheckedSqrt::run(16.0).unwrap(), 4.0);
        let err = CheckedSqrt::run(-1.0).unwrap_err();
        assert!(err.message().contains("-1"));
    }

    #[test]
    fn test_payload_tasks() {
        assert_eq!(ByteLen::run(vec![1, 2, 3]).unwrap(), 3);
        assert_eq!(Zeros::run(4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_registry_has_all_builtins() {
        let names = registry().names();
        for name in [
            "square",
            "slow_square",
            "checked_sqrt",
            "who_am_i",
            "panic_on",
            "byte_len",
            "zeros",
        ] {
            assert!(names.iter().any(|n| n == name), "missing {}", name);
        }
    }
}
