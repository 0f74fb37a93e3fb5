//! Worker-side command loop.
//!
//! A worker binary builds a [`TaskRegistry`] and hands it to [`serve_stdio`].
//! stdout carries protocol frames only; anything else a worker wants to say
//! must go to stderr.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use crate::error::Result;
use crate::ipc::protocol::{MAX_PAYLOAD_LEN, PAYLOAD_OVERHEAD};
use crate::ipc::{WorkerCommand, WorkerResponse, try_read_message, write_message};
use crate::task::TaskRegistry;

/// Serve commands from stdin until `Shutdown` or EOF.
pub fn serve_stdio(registry: &TaskRegistry) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());
    serve(registry, &mut reader, &mut writer)
}

/// Serve commands from `reader`, writing responses to `writer`.
pub fn serve<R: Read, W: Write>(
    registry: &TaskRegistry,
    reader: &mut R,
    writer: &mut W,
) -> Result<()> {
    let pid = std::process::id();

    loop {
        let Some(command) = try_read_message::<_, WorkerCommand>(reader)? else {
            tracing::debug!(pid, "Parent closed stdin, exiting");
            return Ok(());
        };

        match command {
            WorkerCommand::Ping => {
                write_message(
                    writer,
                    &WorkerResponse::Pong {
                        pid,
                        tasks: registry.names(),
                    },
                )?;
            }
            WorkerCommand::RunChunk {
                task,
                first_index,
                payloads,
                output_budget,
            } => {
                let budget = (output_budget as usize).clamp(1, MAX_PAYLOAD_LEN);
                run_chunk(registry, &task, first_index, &payloads, budget, writer)?;
            }
            WorkerCommand::Shutdown => {
                // The parent may already have stopped reading.
                let _ = write_message(writer, &WorkerResponse::ShuttingDown);
                tracing::debug!(pid, "Shutdown requested");
                return Ok(());
            }
        }
    }
}

/// Run one chunk, writing its response frames to `writer`.
///
/// Outputs are flushed as `Partial` frames whenever the next one would push
/// the pending frame past `budget` bytes; the final frame is terminal.
fn run_chunk<W: Write>(
    registry: &TaskRegistry,
    task: &str,
    first_index: u64,
    payloads: &[Vec<u8>],
    budget: usize,
    writer: &mut W,
) -> Result<()> {
    if !registry.contains(task) {
        return write_message(
            writer,
            &WorkerResponse::Failed {
                index: first_index,
                message: format!("unknown task '{}'", task),
            },
        );
    }

    let mut batch_first = first_index;
    let mut batch_bytes = 0usize;
    let mut outputs = Vec::new();

    for (offset, payload) in payloads.iter().enumerate() {
        let index = first_index + offset as u64;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| registry.run(task, payload)));

        let output = match outcome {
            Ok(Some(Ok(output))) => output,
            Ok(Some(Err(e))) => {
                return write_message(
                    writer,
                    &WorkerResponse::Failed {
                        index,
                        message: e.to_string(),
                    },
                );
            }
            Ok(None) => {
                return write_message(
                    writer,
                    &WorkerResponse::Failed {
                        index,
                        message: format!("unknown task '{}'", task),
                    },
                );
            }
            Err(payload) => {
                return write_message(
                    writer,
                    &WorkerResponse::Panicked {
                        index,
                        message: panic_message(payload.as_ref()),
                    },
                );
            }
        };

        let cost = output.len() + PAYLOAD_OVERHEAD;
        if cost > MAX_PAYLOAD_LEN {
            return write_message(
                writer,
                &WorkerResponse::Oversized {
                    index,
                    len: output.len() as u64,
                },
            );
        }

        if !outputs.is_empty() && batch_bytes + cost > budget {
            write_message(
                writer,
                &WorkerResponse::Partial {
                    first_index: batch_first,
                    outputs: std::mem::take(&mut outputs),
                },
            )?;
            batch_first = index;
            batch_bytes = 0;
        }

        batch_bytes += cost;
        outputs.push(output);
    }

    write_message(
        writer,
        &WorkerResponse::Completed {
            first_index: batch_first,
            outputs,
        },
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
