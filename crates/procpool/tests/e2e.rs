//! End-to-end tests for procpool CLI commands.
//!
//! These tests verify that the CLI produces expected output when run against
//! the worker binary built alongside it.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

const WORKER: &str = env!("CARGO_BIN_EXE_procpool-worker");

fn procpool() -> Command {
    let mut cmd = Command::cargo_bin("procpool").expect("procpool binary not built");
    cmd.env_remove("PROCPOOL_WORKER_PATH")
        .env_remove("PROCPOOL_WORKERS")
        .env_remove("RUST_LOG");
    cmd
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_square_in_order() {
    procpool()
        .args(["--worker-path", WORKER, "run", "--workers", "3"])
        .args(["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[0, 1, 4, 9, 16, 25, 36, 49, 64, 81]"))
        .stderr(predicate::str::contains("on 3 workers"));
}

#[test]
fn test_run_sequential_needs_no_worker() {
    let empty = TempDir::new().expect("Failed to create temp directory");
    procpool()
        .env("PATH", empty.path())
        .args(["run", "--sequential", "--", "-3", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[9, 25]"))
        .stderr(predicate::str::contains("sequentially"));
}

#[test]
fn test_run_checked_sqrt_failure() {
    procpool()
        .args(["--worker-path", WORKER, "run", "--task", "checked-sqrt", "-w", "2"])
        .args(["4", "9", "-1", "16"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("task failed on item 2"));
}

#[test]
fn test_run_empty_input() {
    procpool()
        .args(["--worker-path", WORKER, "run", "-w", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_run_rejects_bad_value() {
    procpool()
        .args(["--worker-path", WORKER, "run", "1", "two"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid input value 'two'"));
}

#[test]
fn test_missing_worker_shows_hint() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let missing = dir.path().join("no-such-worker");
    procpool()
        .args(["--worker-path", missing.to_str().unwrap(), "run", "-w", "2", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to spawn worker"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_zero_workers_rejected() {
    procpool()
        .args(["--worker-path", WORKER, "run", "-w", "0", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("worker count must be at least 1"));
}

// =============================================================================
// bench / tasks
// =============================================================================

#[test]
fn test_bench_reports_timings() {
    procpool()
        .args(["--worker-path", WORKER, "bench", "-w", "2", "-i", "4", "--delay-ms", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sequential:"))
        .stdout(predicate::str::contains("Parallel ( 2 workers):"))
        .stdout(predicate::str::contains("Speedup:"));
}

#[test]
fn test_tasks_lists_builtins() {
    procpool()
        .args(["--worker-path", WORKER, "tasks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("square"))
        .stdout(predicate::str::contains("checked_sqrt"))
        .stdout(predicate::str::contains("who_am_i"));
}

#[test]
fn test_tasks_asks_the_given_worker() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let missing = dir.path().join("no-such-worker");
    procpool()
        .args(["--worker-path", missing.to_str().unwrap(), "tasks"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("failed to spawn worker"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_zero_chunk_size_hint_names_chunk_size() {
    procpool()
        .args(["--worker-path", WORKER, "run", "-w", "2", "--chunk-size", "0", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("chunk size must be at least 1"))
        .stderr(predicate::str::contains("--chunk-size"))
        .stderr(predicate::str::contains("worker count").not());
}
