//! IPC protocol messages for procpool worker processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//!
//! Work item payloads inside the messages are opaque bytes; the typed
//! encoding is owned by [`crate::task`].

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest frame accepted from the other side of the pipe (100MB).
pub const MAX_MESSAGE_LEN: usize = 100 * 1024 * 1024;

/// Archive bytes per payload beyond its own length (relative pointer + length,
/// with slack for alignment).
pub const PAYLOAD_OVERHEAD: usize = 16;

/// Room reserved in every frame for the message envelope and task name.
pub const FRAME_RESERVE: usize = 64 * 1024;

/// Largest single encoded item or output that still fits in one frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_MESSAGE_LEN - FRAME_RESERVE;

/// Default payload bytes per chunk frame, in either direction.
pub const DEFAULT_CHUNK_BYTES: usize = MAX_MESSAGE_LEN / 4;

/// Command sent from parent to worker process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Ping to check if worker is alive and learn what it can run.
    Ping,

    /// Run a task over a contiguous chunk of work items.
    RunChunk {
        /// Registered task name.
        task: String,
        /// Input index of `payloads[0]`.
        first_index: u64,
        /// Encoded inputs, one per work item.
        payloads: Vec<Vec<u8>>,
        /// Output bytes the worker may put in one response frame before
        /// flushing a `Partial`.
        output_budget: u64,
    },

    /// Shutdown the worker process gracefully.
    Shutdown,
}

/// Response sent from worker to parent process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Response to Ping.
    Pong {
        /// Worker process ID.
        pid: u32,
        /// Names of every task the worker has registered.
        tasks: Vec<String>,
    },

    /// Leading outputs of a chunk whose results span several frames.
    ///
    /// Followed by more `Partial` frames and then exactly one terminal
    /// response (`Completed`, `Failed`, `Panicked` or `Oversized`).
    Partial {
        /// Input index of `outputs[0]`.
        first_index: u64,
        /// Encoded outputs for consecutive items.
        outputs: Vec<Vec<u8>>,
    },

    /// Every item in the chunk completed.
    Completed {
        /// Input index of `outputs[0]`: the chunk's first index, or the first
        /// index after the last `Partial`.
        first_index: u64,
        /// Encoded outputs for the remaining items of the chunk.
        outputs: Vec<Vec<u8>>,
    },

    /// The task returned an error for an item.
    Failed {
        /// Input index of the failing item.
        index: u64,
        /// Error message.
        message: String,
    },

    /// The task panicked on an item.
    Panicked {
        /// Input index of the failing item.
        index: u64,
        /// Panic message if available.
        message: String,
    },

    /// An item's encoded output cannot fit in a frame.
    Oversized {
        /// Input index of the item.
        index: u64,
        /// Encoded output length in bytes.
        len: u64,
    },

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    // Checked before anything is written, so the stream stays in sync.
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(Error::Serialization(format!(
            "IPC message too large to send: {} bytes (limit {})",
            bytes.len(),
            MAX_MESSAGE_LEN
        )));
    }

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary, which is how a
/// worker learns that its parent has gone away.
///
/// # Safety
///
/// Uses unchecked deserialization for performance. Only safe when reading from
/// trusted sources (our own parent or worker processes).
pub fn try_read_message<R: Read, T>(reader: &mut R) -> Result<Option<T>>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Ipc(
                    "Failed to read IPC message length: stream closed mid-frame".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(Error::Ipc(format!(
                    "Failed to read IPC message length: {}",
                    e
                )));
            }
        }
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    // rkyv archives must be read from an aligned buffer.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(len);
    aligned.extend_from_slice(&bytes);

    // SAFETY: We trust data from our own parent and worker processes.
    let message = unsafe { rkyv::from_bytes_unchecked::<T, rkyv::rancor::Error>(&aligned) }
        .map_err(|e| Error::Deserialization(format!("Failed to decode IPC message: {}", e)))?;

    Ok(Some(message))
}

/// Read a message, treating EOF as an error.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    try_read_message(reader)?
        .ok_or_else(|| Error::Ipc("IPC stream closed by peer".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_run_chunk_roundtrip() {
        let cmd = WorkerCommand::RunChunk {
            task: "square".to_string(),
            first_index: 12,
            payloads: vec![vec![1, 2, 3], vec![4, 5, 6]],
            output_budget: 4096,
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerCommand = read_message(&mut cursor).unwrap();

        match decoded {
            WorkerCommand::RunChunk {
                task,
                first_index,
                payloads,
                output_budget,
            } => {
                assert_eq!(task, "square");
                assert_eq!(first_index, 12);
                assert_eq!(payloads, vec![vec![1, 2, 3], vec![4, 5, 6]]);
                assert_eq!(output_budget, 4096);
            }
            _ => panic!("Wrong command type"),
        }
    }

    #[test]
    fn test_pong_carries_task_list() {
        let resp = WorkerResponse::Pong {
            pid: 4242,
            tasks: vec!["square".to_string(), "who_am_i".to_string()],
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: WorkerResponse = read_message(&mut cursor).unwrap();

        match decoded {
            WorkerResponse::Pong { pid, tasks } => {
                assert_eq!(pid, 4242);
                assert_eq!(tasks.len(), 2);
            }
            _ => panic!("Wrong response type"),
        }
    }

    #[test]
    fn test_several_frames_in_one_stream() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerCommand::Ping).unwrap();
        write_message(&mut buf, &WorkerCommand::Shutdown).unwrap();

        let mut cursor = Cursor::new(buf);
        let first: WorkerCommand = read_message(&mut cursor).unwrap();
        let second: WorkerCommand = read_message(&mut cursor).unwrap();
        assert!(matches!(first, WorkerCommand::Ping));
        assert!(matches!(second, WorkerCommand::Shutdown));

        let end: Option<WorkerCommand> = try_read_message(&mut cursor).unwrap();
        assert!(end.is_none());
    }

    #[test]
    fn test_eof_is_error_for_read_message() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let result: Result<WorkerResponse> = read_message(&mut cursor);
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[test]
    fn test_truncated_frame() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::ShuttingDown).unwrap();
        buf.truncate(2);

        let mut cursor = Cursor::new(buf);
        let result: Result<Option<WorkerResponse>> = try_read_message(&mut cursor);
        assert!(matches!(result, Err(Error::Ipc(_))));
    }

    #[test]
    fn test_oversized_send_is_not_written() {
        let cmd = WorkerCommand::RunChunk {
            task: "square".to_string(),
            first_index: 0,
            payloads: vec![vec![0u8; MAX_MESSAGE_LEN]],
            output_budget: 0,
        };

        let mut buf = Vec::new();
        let result = write_message(&mut buf, &cmd);
        assert!(matches!(result, Err(Error::Serialization(ref msg)) if msg.contains("too large")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let len = (MAX_MESSAGE_LEN as u32 + 1).to_le_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let result: Result<WorkerCommand> = read_message(&mut cursor);
        match result {
            Err(Error::Ipc(msg)) => assert!(msg.contains("too large")),
            other => panic!("expected size rejection, got {:?}", other.map(|_| ())),
        }
    }
}
