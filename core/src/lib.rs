pub mod chunker;
pub mod config;
pub mod types;

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::Arc;

pub use chunker::{in_chunk, plan, CHUNKER_IDENTITY};
pub use config::EngineConfig;
pub use types::{Chunk, ChunkError, Partition};

/// Context for parallel execution: the shared worker pool plus the
/// chunking defaults it was configured with.
#[derive(Clone)]
pub struct ThreadContext {
    pool:               Arc<ThreadPool>,
    workers:            usize,
    partition:          Partition,
    parallel_threshold: u64,
}

impl ThreadContext {
    /* ------------------------------------------------------------------ */
    /* Construction                                                       */
    /* ------------------------------------------------------------------ */
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let workers = config.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ndops-worker-{i}"))
            .build()
            .context("failed to start worker pool")?;

        Ok(Self {
            pool: Arc::new(pool),
            workers,
            partition: config.partition,
            parallel_threshold: config.parallel_threshold,
        })
    }

    /* ------------------------------------------------------------------ */
    /* Accessors                                                          */
    /* ------------------------------------------------------------------ */

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Default partition policy for call sites that do not pick one.
    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn parallel_threshold(&self) -> u64 {
        self.parallel_threshold
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("workers", &self.workers)
            .field("partition", &self.partition)
            .field("parallel_threshold", &self.parallel_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_reflects_config() {
        let config = EngineConfig::default()
            .with_threads(3)
            .with_partition(Partition::Interleaved)
            .with_parallel_threshold(7);
        let ctx = ThreadContext::new(&config).unwrap();
        assert_eq!(ctx.workers(), 3);
        assert_eq!(ctx.partition(), Partition::Interleaved);
        assert_eq!(ctx.parallel_threshold(), 7);

        let copy = ctx.clone();
        assert!(Arc::ptr_eq(&copy.pool, &ctx.pool));
    }
}
