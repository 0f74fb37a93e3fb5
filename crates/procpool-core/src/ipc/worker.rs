//! Worker process management for procpool dispatch.
//!
//! Provides `WorkerHandle` for spawning and communicating with isolated
//! worker processes, and `WorkerKillHandle` for terminating one from
//! another thread.

use std::io::{BufReader, BufWriter};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::WorkerSpec;
use crate::error::{Error, Result};

use super::protocol::{
    MAX_PAYLOAD_LEN, WorkerCommand, WorkerResponse, read_message, write_message,
};

/// Handle to a worker process.
///
/// Provides methods to send commands, receive responses, and kill the process.
pub struct WorkerHandle {
    /// The child process.
    child: Child,
    /// Buffered stdin writer.
    stdin: BufWriter<std::process::ChildStdin>,
    /// Buffered stdout reader.
    stdout: BufReader<std::process::ChildStdout>,
    /// Process ID reported by the worker itself.
    pid: u32,
    /// Tasks the worker has registered.
    tasks: Vec<String>,
    /// Whether the worker has been killed.
    killed: bool,
    /// Set once the process has been reaped; shared with kill handles.
    reaped: Arc<Mutex<bool>>,
}

impl WorkerHandle {
    /// Spawn a new worker process and complete the Ping/Pong handshake.
    pub fn spawn(spec: &WorkerSpec) -> Result<Self> {
        let worker_path = spec.resolve()?;

        let mut child = Command::new(&worker_path)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Let worker stderr pass through for debugging
            .spawn()
            .map_err(|e| {
                Error::Spawn(format!(
                    "Failed to spawn worker process '{}': {}",
                    worker_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn("Failed to get worker stdout".to_string()))?;

        let mut handle = Self {
            pid: child.id(),
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            tasks: Vec::new(),
            killed: false,
            reaped: Arc::new(Mutex::new(false)),
        };

        // Verify worker is alive with a ping
        let handshake = handle
            .send_command(&WorkerCommand::Ping)
            .and_then(|()| handle.recv_response());
        match handshake {
            Ok(WorkerResponse::Pong { pid, tasks }) => {
                if pid != handle.pid {
                    tracing::debug!(os_pid = handle.pid, reported = pid, "Worker reported a different pid");
                }
                handle.tasks = tasks;
                tracing::debug!(pid = handle.pid, tasks = handle.tasks.len(), "Worker ready");
                Ok(handle)
            }
            Ok(other) => Err(Error::Spawn(format!(
                "Unexpected handshake response from worker: {:?}",
                other
            ))),
            Err(e) => Err(Error::Spawn(format!(
                "Worker '{}' failed the handshake: {}",
                worker_path.display(),
                e
            ))),
        }
    }

    /// Send a command to the worker.
    pub fn send_command(&mut self, cmd: &WorkerCommand) -> Result<()> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        write_message(&mut self.stdin, cmd)
    }

    /// Receive a response from the worker.
    pub fn recv_response(&mut self) -> Result<WorkerResponse> {
        if self.killed {
            return Err(Error::Ipc("Worker has been killed".to_string()));
        }
        read_message(&mut self.stdout)
    }

    /// Whether the worker registered a task with this name.
    pub fn supports(&self, task: &str) -> bool {
        self.tasks.iter().any(|t| t == task)
    }

    /// Tasks the worker reported during the handshake.
    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// Run `task` over a chunk of encoded items starting at `first_index`.
    ///
    /// Returns one encoded output per payload, gathered from as many response
    /// frames as the worker needed to stay within `output_budget` bytes each.
    ///
    /// A frame too large to send fails before anything is written and leaves
    /// the worker usable. Any other transport failure leaves the stream out of
    /// sync, so the worker is killed before the error is returned.
    pub fn run_chunk(
        &mut self,
        task: &str,
        first_index: usize,
        payloads: Vec<Vec<u8>>,
        output_budget: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let expected = payloads.len();
        let sent = self.send_command(&WorkerCommand::RunChunk {
            task: task.to_string(),
            first_index: first_index as u64,
            payloads,
            output_budget: output_budget as u64,
        });
        match sent {
            Ok(()) => {}
            Err(Error::Serialization(message)) => {
                return Err(Error::Serialization(format!(
                    "chunk starting at item {}: {}",
                    first_index, message
                )));
            }
            Err(e) => return Err(self.crashed(first_index, e.to_string())),
        }

        let mut collected: Vec<Vec<u8>> = Vec::with_capacity(expected);
        loop {
            let response = match self.recv_response() {
                Ok(response) => response,
                Err(e) => return Err(self.crashed(first_index, e.to_string())),
            };

            match response {
                WorkerResponse::Partial {
                    first_index: at,
                    outputs,
                } => {
                    self.append_outputs(&mut collected, first_index, expected, at, outputs)?;
                }
                WorkerResponse::Completed {
                    first_index: at,
                    outputs,
                } => {
                    self.append_outputs(&mut collected, first_index, expected, at, outputs)?;
                    if collected.len() != expected {
                        return Err(self.crashed(
                            first_index,
                            format!(
                                "chunk mismatch: sent {} items at {}, got {}",
                                expected,
                                first_index,
                                collected.len()
                            ),
                        ));
                    }
                    return Ok(collected);
                }
                WorkerResponse::Failed { index, message } => {
                    if !self.supports(task) {
                        return Err(Error::UnknownTask {
                            task: task.to_string(),
                            pid: self.pid,
                        });
                    }
                    return Err(Error::Task {
                        index: index as usize,
                        pid: self.pid,
                        message,
                    });
                }
                WorkerResponse::Panicked { index, message } => {
                    return Err(Error::WorkerPanicked {
                        index: index as usize,
                        pid: self.pid,
                        message,
                    });
                }
                WorkerResponse::Oversized { index, len } => {
                    return Err(Error::Serialization(format!(
                        "output of item {} is {} bytes, over the {} byte frame limit",
                        index, len, MAX_PAYLOAD_LEN
                    )));
                }
                other => {
                    return Err(self.crashed(
                        first_index,
                        format!("unexpected response when running chunk: {:?}", other),
                    ));
                }
            }
        }
    }

    /// Append one frame's outputs, checking they continue the chunk in order.
    fn append_outputs(
        &mut self,
        collected: &mut Vec<Vec<u8>>,
        first_index: usize,
        expected: usize,
        at: u64,
        outputs: Vec<Vec<u8>>,
    ) -> Result<()> {
        let next = first_index + collected.len();
        if at as usize != next || collected.len() + outputs.len() > expected {
            return Err(self.crashed(
                first_index,
                format!(
                    "chunk mismatch: expected outputs from {} (of {} items), got {} at {}",
                    next,
                    expected,
                    outputs.len(),
                    at
                ),
            ));
        }
        collected.extend(outputs);
        Ok(())
    }

    fn crashed(&mut self, index: usize, reason: String) -> Error {
        let pid = self.pid;
        let _ = self.kill();
        Error::WorkerCrashed { pid, index, reason }
    }

    /// Kill the worker process immediately.
    pub fn kill(&mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        // Try graceful shutdown first so the worker can flush its logs
        let _ = self.send_command(&WorkerCommand::Shutdown);
        self.killed = true;

        // Give it a moment to shutdown gracefully
        std::thread::sleep(Duration::from_millis(10));

        // Held across kill and reap so no WorkerKillHandle can signal a
        // recycled pid.
        let mut reaped = lock_reaped(&self.reaped);

        // Force kill if still running
        if let Err(e) = self.child.kill() {
            // InvalidInput means process already exited, which is fine
            if e.kind() != std::io::ErrorKind::InvalidInput {
                tracing::warn!(pid = self.pid, "Failed to kill worker: {}", e);
            }
        }

        // Wait to reap zombie
        let _ = self.child.wait();
        *reaped = true;

        Ok(())
    }

    /// Check if the worker process is still running.
    ///
    /// A worker found to have exited is reaped here.
    pub fn is_alive(&mut self) -> bool {
        if self.killed {
            return false;
        }
        let mut reaped = lock_reaped(&self.reaped);
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => {
                *reaped = true;
                false
            }
            Err(_) => false,
        }
    }

    /// Get the process ID of the worker.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Graceful shutdown - ask worker to exit cleanly.
    pub fn shutdown(mut self) -> Result<()> {
        if self.killed {
            return Ok(());
        }

        let _ = self.send_command(&WorkerCommand::Shutdown);
        self.killed = true;

        // Blocking reads have no timeout, so wait for the process to exit
        // instead of waiting for the acknowledgement. The reap lock is only
        // held per poll so a kill handle can still end a hung worker.
        let waited = loop {
            let mut reaped = lock_reaped(&self.reaped);
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    *reaped = true;
                    break Ok(status);
                }
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            drop(reaped);
            std::thread::sleep(Duration::from_millis(5));
        };

        match waited {
            Ok(status) => {
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::Ipc(format!(
                        "Worker {} exited with status: {}",
                        self.pid, status
                    )))
                }
            }
            Err(e) => Err(Error::Ipc(format!("Failed to wait for worker: {}", e))),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Ensure worker is killed when handle is dropped
        let _ = self.kill();
    }
}

fn lock_reaped(reaped: &Mutex<bool>) -> MutexGuard<'_, bool> {
    reaped.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe handle for killing a worker from another thread.
///
/// Shares a reap flag with its `WorkerHandle`: once the owning handle has
/// reaped the process, `kill` is a no-op, so a recycled pid is never
/// signalled.
#[derive(Clone)]
pub struct WorkerKillHandle {
    /// Process ID of the worker.
    pid: u32,
    /// Whether the kill has been requested.
    killed: Arc<AtomicBool>,
    /// Set by the owning `WorkerHandle` once the process is reaped.
    reaped: Arc<Mutex<bool>>,
}

impl WorkerKillHandle {
    /// Create a kill handle for a worker.
    pub fn new(worker: &WorkerHandle) -> Self {
        Self {
            pid: worker.pid(),
            killed: Arc::new(AtomicBool::new(false)),
            reaped: Arc::clone(&worker.reaped),
        }
    }

    /// Kill the worker process.
    ///
    /// This can be called from any thread. Returns `true` if a signal was
    /// sent, `false` if this handle already killed it or the worker has
    /// been reaped.
    pub fn kill(&self) -> bool {
        let reaped = lock_reaped(&self.reaped);
        if *reaped {
            return false;
        }
        if self.killed.swap(true, Ordering::SeqCst) {
            return false; // Already killed
        }

        #[cfg(unix)]
        {
            // SAFETY: kill(2) has no memory-safety preconditions, and the
            // reap lock guarantees the pid still belongs to our child.
            unsafe {
                libc::kill(self.pid as libc::pid_t, libc::SIGKILL);
            }
        }

        #[cfg(not(unix))]
        {
            tracing::warn!(pid = self.pid, "Out-of-band worker kill is only supported on unix");
        }

        drop(reaped);
        true
    }

    /// Check if kill has been requested.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Whether the owning handle has reaped the worker process.
    pub fn is_reaped(&self) -> bool {
        *lock_reaped(&self.reaped)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}
