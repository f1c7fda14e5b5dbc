use std::cell::Cell;

use parking_lot::Mutex;
use tracing::trace;

use crate::types::{Chunk, Partition};
use crate::ThreadContext;

/// Identity under which the chunker is exposed.
pub const CHUNKER_IDENTITY: &str = "thread.chunker";

thread_local! {
    static IN_CHUNK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a chunk callback.
struct ChunkGuard {
    prev: bool,
}

impl ChunkGuard {
    fn enter() -> Self {
        Self { prev: IN_CHUNK.with(|flag| flag.replace(true)) }
    }
}

impl Drop for ChunkGuard {
    fn drop(&mut self) {
        IN_CHUNK.with(|flag| flag.set(self.prev));
    }
}

/// True while the current thread is inside a chunk callback.
pub fn in_chunk() -> bool {
    IN_CHUNK.with(Cell::get)
}

/// Split `[0, total)` between at most `workers` chunks.
///
/// Every index lands in exactly one chunk and no chunk is empty.
pub fn plan(total: u64, workers: usize, partition: Partition) -> Vec<Chunk> {
    if total == 0 {
        return Vec::new();
    }
    let used = (workers.max(1) as u64).min(total);
    match partition {
        Partition::Contiguous => {
            let base = total / used;
            let rem = total % used;
            let mut start = 0;
            (0..used)
                .map(|i| {
                    let count = base + u64::from(i < rem);
                    let chunk = Chunk { start, step: 1, count };
                    start += count;
                    chunk
                })
                .collect()
        }
        Partition::Interleaved => (0..used)
            .map(|i| Chunk { start: i, step: used, count: (total - i).div_ceil(used) })
            .collect(),
    }
}

impl ThreadContext {
    /// Run `callback` over a partition of `[0, total)` and block until every
    /// chunk finished.
    ///
    /// Calls from inside a running chunk, calls below the parallel threshold
    /// and single-worker contexts run one whole-domain chunk on the calling
    /// thread. When chunks fail, the error of the lowest-numbered one is
    /// returned after the join; chunks that succeeded keep their effects.
    pub fn chunk<F, E>(&self, total: u64, partition: Partition, callback: F) -> Result<(), E>
    where
        F: Fn(Chunk) -> Result<(), E> + Sync,
        E: Send,
    {
        if total == 0 {
            return Ok(());
        }
        if in_chunk() || self.workers() == 1 || total < self.parallel_threshold() {
            trace!(
                target: CHUNKER_IDENTITY,
                total,
                nested = in_chunk(),
                "running on calling thread"
            );
            let _guard = ChunkGuard::enter();
            return callback(Chunk::whole(total));
        }

        let chunks = plan(total, self.workers(), partition);
        trace!(target: CHUNKER_IDENTITY, total, chunks = chunks.len(), %partition, "dispatching chunks");

        let failures: Mutex<Vec<(usize, E)>> = Mutex::new(Vec::new());
        self.pool().scope(|scope| {
            for (index, chunk) in chunks.iter().copied().enumerate() {
                let callback = &callback;
                let failures = &failures;
                scope.spawn(move |_| {
                    let _guard = ChunkGuard::enter();
                    if let Err(err) = callback(chunk) {
                        failures.lock().push((index, err));
                    }
                });
            }
        });

        let mut failures = failures.into_inner();
        failures.sort_by_key(|(index, _)| *index);
        match failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// [`ThreadContext::chunk`] with the configured partition policy.
    pub fn chunk_default<F, E>(&self, total: u64, callback: F) -> Result<(), E>
    where
        F: Fn(Chunk) -> Result<(), E> + Sync,
        E: Send,
    {
        self.chunk(total, self.partition(), callback)
    }
}
