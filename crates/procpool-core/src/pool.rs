//! Fixed-size pool of worker processes.
//!
//! ```text
//! WorkerPool::map (parent)
//!     │
//!     ├── encode items, split into index-tagged chunks
//!     │   (bounded by item count and by payload bytes)
//!     │
//!     ├── one dispatcher thread per WorkerHandle
//!     │       └── pull chunk → RunChunk → Partial* → Completed
//!     │                                           / Failed / Panicked / Oversized
//!     │
//!     └── reassemble outputs by input index, decode
//! ```

use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::ipc::protocol::{MAX_PAYLOAD_LEN, PAYLOAD_OVERHEAD};
use crate::ipc::{WorkerHandle, WorkerKillHandle};
use crate::task::{Task, decode, encode};

/// A chunk of encoded work items with the input index of its first item.
struct Chunk {
    first_index: usize,
    payloads: Vec<Vec<u8>>,
}

/// Outputs produced by one dispatcher thread: `(first_index, outputs)` per chunk.
type ChunkOutputs = Vec<(usize, Vec<Vec<u8>>)>;

/// Pool of long-lived worker processes.
///
/// Workers are spawned by [`start`](Self::start) and torn down by
/// [`shutdown`](Self::shutdown) or, on every other exit path, by `Drop`.
pub struct WorkerPool {
    config: PoolConfig,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawn `config.workers` worker processes.
    ///
    /// Fails before any dispatch if a worker cannot be started; workers that
    /// were already running are killed.
    pub fn start(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let mut pool = Self {
            workers: Vec::with_capacity(config.workers),
            config,
        };
        pool.replenish()?;

        tracing::info!(workers = pool.workers.len(), pids = ?pool.pids(), "Worker pool started");
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of worker processes currently held.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Process IDs of the workers, in pool order.
    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().map(WorkerHandle::pid).collect()
    }

    /// Kill handles for every worker, usable from other threads.
    pub fn kill_handles(&self) -> Vec<WorkerKillHandle> {
        self.workers.iter().map(WorkerKillHandle::new).collect()
    }

    /// Drop dead workers and spawn replacements up to the configured size.
    ///
    /// Returns the number of workers spawned.
    pub fn replenish(&mut self) -> Result<usize> {
        let before = self.workers.len();
        self.workers.retain_mut(|worker| {
            let alive = worker.is_alive();
            if !alive {
                tracing::warn!(pid = worker.pid(), "Discarding dead worker");
            }
            alive
        });
        let discarded = before - self.workers.len();

        let mut spawned = 0;
        while self.workers.len() < self.config.workers {
            self.workers.push(WorkerHandle::spawn(&self.config.worker)?);
            spawned += 1;
        }

        if discarded > 0 {
            tracing::info!(discarded, spawned, "Replenished worker pool");
        }
        Ok(spawned)
    }

    /// Apply `T` to every item on the pool's workers.
    ///
    /// The returned vector is positionally aligned with `items`. The first
    /// failing item fails the whole call; no partial results are returned.
    pub fn map<T: Task>(&mut self, items: Vec<T::Input>) -> Result<Vec<T::Output>> {
        let len = items.len();
        if len == 0 {
            return Ok(Vec::new());
        }

        self.replenish()?;
        if let Some(worker) = self.workers.iter().find(|w| !w.supports(T::NAME)) {
            return Err(Error::UnknownTask {
                task: T::NAME.to_string(),
                pid: worker.pid(),
            });
        }

        let chunk_size = self.config.effective_chunk_size(len);
        let chunk_bytes = self.config.chunk_bytes;
        let chunks = encode_chunks(&items, chunk_size, chunk_bytes, MAX_PAYLOAD_LEN)?;
        drop(items);

        tracing::debug!(
            task = T::NAME,
            items = len,
            chunks = chunks.len(),
            chunk = chunk_size,
            workers = self.workers.len(),
            "Dispatching"
        );

        let outputs = dispatch_chunks(&mut self.workers, T::NAME, chunks, chunk_bytes)?;
        collect_outputs::<T::Output>(len, outputs)
    }

    /// Apply `T` to a single item on one worker.
    pub fn apply<T: Task>(&mut self, item: T::Input) -> Result<T::Output> {
        self.map::<T>(vec![item])?
            .pop()
            .ok_or_else(|| Error::Ipc("worker returned no output".to_string()))
    }

    /// Ask every worker to exit and wait for it.
    ///
    /// All workers are released even if some fail to exit cleanly; the first
    /// such failure is returned.
    pub fn shutdown(mut self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers.drain(..) {
            let pid = worker.pid();
            if let Err(e) = worker.shutdown() {
                tracing::warn!(pid, "Worker did not exit cleanly: {}", e);
                first_error.get_or_insert(e);
            }
        }
        tracing::info!("Worker pool shut down");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            tracing::debug!(workers = self.workers.len(), "Killing pool workers on drop");
        }
        for mut worker in self.workers.drain(..) {
            let _ = worker.kill();
        }
    }
}

/// Split items with the given encoded sizes into consecutive ranges.
///
/// A range ends after `chunk_size` items, or before the item that would push
/// its payload bytes past `byte_budget`. An item larger than the budget on
/// its own still gets a range of one.
pub fn plan_chunks(sizes: &[usize], chunk_size: usize, byte_budget: usize) -> Vec<Range<usize>> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut bytes = 0usize;
    for (index, &size) in sizes.iter().enumerate() {
        let cost = size.saturating_add(PAYLOAD_OVERHEAD);
        let count = index - start;
        if count > 0 && (count == chunk_size || bytes.saturating_add(cost) > byte_budget) {
            ranges.push(start..index);
            start = index;
            bytes = 0;
        }
        bytes = bytes.saturating_add(cost);
    }
    if start < sizes.len() {
        ranges.push(start..sizes.len());
    }
    ranges
}

/// Encode every item and group the payloads into chunks.
///
/// An item whose encoding cannot fit in a frame (`max_item` bytes) is
/// rejected here, before any worker sees the call.
fn encode_chunks<V: serde::Serialize>(
    items: &[V],
    chunk_size: usize,
    byte_budget: usize,
    max_item: usize,
) -> Result<Vec<Chunk>> {
    let mut payloads = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let bytes =
                encode(item).map_err(|e| Error::Serialization(format!("item {}: {}", index, e)))?;
            if bytes.len() + PAYLOAD_OVERHEAD > max_item {
                return Err(Error::Serialization(format!(
                    "item {}: encoded input is {} bytes, over the {} byte frame limit",
                    index,
                    bytes.len(),
                    max_item
                )));
            }
            Ok(bytes)
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter();

    let sizes: Vec<usize> = payloads.as_slice().iter().map(Vec::len).collect();
    Ok(plan_chunks(&sizes, chunk_size, byte_budget)
        .into_iter()
        .map(|range| Chunk {
            first_index: range.start,
            payloads: payloads.by_ref().take(range.len()).collect(),
        })
        .collect())
}

/// Feed chunks to workers until the queue drains or any chunk fails.
fn dispatch_chunks(
    workers: &mut [WorkerHandle],
    task: &str,
    chunks: Vec<Chunk>,
    output_budget: usize,
) -> Result<ChunkOutputs> {
    let queue = Mutex::new(chunks.into_iter());
    let failed = AtomicBool::new(false);

    let results: Vec<Result<ChunkOutputs>> = std::thread::scope(|scope| {
        let handles: Vec<_> = workers
            .iter_mut()
            .map(|worker| {
                let queue = &queue;
                let failed = &failed;
                scope.spawn(move || -> Result<ChunkOutputs> {
                    let mut done = Vec::new();
                    while !failed.load(Ordering::SeqCst) {
                        let next = queue
                            .lock()
                            .map_err(|e| Error::Ipc(format!("Chunk queue poisoned: {}", e)))?
                            .next();
                        let Some(chunk) = next else { break };

                        let first_index = chunk.first_index;
                        match worker.run_chunk(task, first_index, chunk.payloads, output_budget) {
                            Ok(outputs) => done.push((first_index, outputs)),
                            Err(e) => {
                                failed.store(true, Ordering::SeqCst);
                                return Err(e);
                            }
                        }
                    }
                    Ok(done)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    failed.store(true, Ordering::SeqCst);
                    Err(Error::Ipc("dispatcher thread panicked".to_string()))
                })
            })
            .collect()
    });

    let mut all = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(mut done) => all.append(&mut done),
            Err(e) => errors.push(e),
        }
    }

    // Report the failure closest to the front of the input.
    if let Some(err) = errors
        .into_iter()
        .min_by_key(|e| e.item_index().unwrap_or(usize::MAX))
    {
        tracing::debug!("Dispatch failed: {}", err);
        return Err(err);
    }

    Ok(all)
}

fn collect_outputs<O: serde::de::DeserializeOwned>(
    len: usize,
    chunks: ChunkOutputs,
) -> Result<Vec<O>> {
    let mut slots: Vec<Option<Vec<u8>>> = vec![None; len];
    for (first_index, outputs) in chunks {
        for (offset, bytes) in outputs.into_iter().enumerate() {
            let index = first_index + offset;
            let slot = slots
                .get_mut(index)
                .ok_or_else(|| Error::Ipc(format!("output index {} out of range", index)))?;
            if slot.replace(bytes).is_some() {
                return Err(Error::Ipc(format!("item {} produced twice", index)));
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            let bytes =
                slot.ok_or_else(|| Error::Ipc(format!("item {} produced no output", index)))?;
            decode(&bytes)
                .map_err(|e| Error::Deserialization(format!("output of item {}: {}", index, e)))
        })
        .collect()
}
