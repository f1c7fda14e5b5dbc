use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::Partition;

/// Engine settings: worker pool size and chunking defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub threads: Option<usize>,
    /// Partition policy used when a call site does not pick one.
    pub partition: Partition,
    /// Domains smaller than this run on the calling thread.
    pub parallel_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            partition: Partition::Contiguous,
            parallel_threshold: 1024,
        }
    }
}

impl EngineConfig {
    pub const ENV_THREADS: &'static str = "NDOPS_THREADS";
    pub const ENV_PARTITION: &'static str = "NDOPS_PARTITION";
    pub const ENV_PARALLEL_THRESHOLD: &'static str = "NDOPS_PARALLEL_THRESHOLD";

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        serde_yaml::from_str(source).context("invalid engine configuration")
    }

    /// Defaults overridden by `NDOPS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(Self::ENV_THREADS) {
            let threads: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a thread count, got `{raw}`", Self::ENV_THREADS))?;
            config.threads = Some(threads);
        }
        if let Some(raw) = lookup(Self::ENV_PARTITION) {
            config.partition = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = lookup(Self::ENV_PARALLEL_THRESHOLD) {
            config.parallel_threshold = raw.trim().parse().with_context(|| {
                format!("{} must be an element count, got `{raw}`", Self::ENV_PARALLEL_THRESHOLD)
            })?;
        }
        Ok(config)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: u64) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Resolved worker count, never zero.
    pub fn worker_count(&self) -> usize {
        self.threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }
}
