use anyhow::{Context, Result};
use core_types::TensorType;
use ndops_core::{EngineConfig, Partition, ThreadContext};
use tracing::info;

use crate::cache::MatchCache;
use crate::matcher::{self, BoundOp, OpRequest};
use crate::special::{Computer, Function, Hybrid, Inplace};
use crate::types::{Convention, InplaceTarget, OpError, Priority, ScalarAny};
use crate::{Op, OpConstructor, OpRegistry};

struct Pending {
    identity: String,
    priority: Priority,
    aliases:  Vec<String>,
    factory:  OpConstructor,
}

/// Builder for [`OpEnv`]. Collects the inventory by default.
pub struct OpEnvBuilder {
    config:    EngineConfig,
    inventory: bool,
    pending:   Vec<Pending>,
}

impl OpEnvBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config = self.config.with_threads(threads);
        self
    }

    pub fn partition(mut self, partition: Partition) -> Self {
        self.config = self.config.with_partition(partition);
        self
    }

    pub fn parallel_threshold(mut self, threshold: u64) -> Self {
        self.config = self.config.with_parallel_threshold(threshold);
        self
    }

    /// Whether ops submitted with `register_op!` are registered.
    pub fn with_inventory(mut self, enabled: bool) -> Self {
        self.inventory = enabled;
        self
    }

    pub fn register<F>(self, identity: &str, priority: Priority, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Op> + Send + Sync + 'static,
    {
        self.register_with_aliases(identity, priority, &[], factory)
    }

    pub fn register_with_aliases<F>(mut self, identity: &str, priority: Priority, aliases: &[&str], factory: F) -> Self
    where
        F: Fn() -> Box<dyn Op> + Send + Sync + 'static,
    {
        self.pending.push(Pending {
            identity: identity.to_string(),
            priority,
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            factory: std::sync::Arc::new(factory),
        });
        self
    }

    pub fn build(self) -> Result<OpEnv> {
        let threads = ThreadContext::new(&self.config)?;

        let mut registry = OpRegistry::new();
        if self.inventory {
            registry.collect_inventory().context("collecting registered ops")?;
        }
        for p in self.pending {
            let aliases: Vec<&str> = p.aliases.iter().map(String::as_str).collect();
            let factory = p.factory;
            registry
                .register_with_aliases(&p.identity, p.priority, &aliases, move || factory())
                .with_context(|| format!("registering `{}`", p.identity))?;
        }
        registry.seal();

        info!(
            workers = threads.workers(),
            partition = %threads.partition(),
            candidates = registry.len(),
            "op environment ready"
        );
        Ok(OpEnv { registry, cache: MatchCache::default(), threads, config: self.config })
    }
}

/// Explicitly constructed op environment: sealed registry, static match
/// cache and worker pool. Independent environments can coexist.
#[derive(Debug)]
pub struct OpEnv {
    registry: OpRegistry,
    cache:    MatchCache,
    threads:  ThreadContext,
    config:   EngineConfig,
}

impl OpEnv {
    pub fn builder() -> OpEnvBuilder {
        OpEnvBuilder { config: EngineConfig::default(), inventory: true, pending: Vec::new() }
    }

    /// Environment with the built-in ops, configured from `NDOPS_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::builder().config(EngineConfig::from_env()?).build()
    }

    /// Resolve `request` to a Ready op.
    pub fn resolve(&self, request: &OpRequest<'_>) -> Result<BoundOp, OpError> {
        matcher::resolve(self, request)
    }

    pub fn computer(
        &self,
        identity: &str,
        inputs:   &[TensorType],
        output:   &TensorType,
        params:   &[ScalarAny],
    ) -> Result<Computer, OpError> {
        let request = OpRequest::new(identity, Convention::Computer, inputs).with_output(output).with_params(params);
        Ok(Computer::new(self.resolve(&request)?))
    }

    pub fn function(&self, identity: &str, inputs: &[TensorType], params: &[ScalarAny]) -> Result<Function, OpError> {
        let request = OpRequest::new(identity, Convention::Function, inputs).with_params(params);
        Ok(Function::new(self.resolve(&request)?))
    }

    pub fn hybrid(
        &self,
        identity: &str,
        inputs:   &[TensorType],
        output:   Option<&TensorType>,
        params:   &[ScalarAny],
    ) -> Result<Hybrid, OpError> {
        let mut request = OpRequest::new(identity, Convention::Hybrid, inputs).with_params(params);
        request.output = output;
        Ok(Hybrid::new(self.resolve(&request)?))
    }

    /// In-place op mutating the argument at `target`.
    pub fn inplace(
        &self,
        identity: &str,
        target:   InplaceTarget,
        args:     &[TensorType],
        params:   &[ScalarAny],
    ) -> Result<Inplace, OpError> {
        let request = OpRequest::new(identity, Convention::Inplace(target), args).with_params(params);
        Ok(Inplace::new(self.resolve(&request)?, target))
    }

    /// Worker pool and chunker
    pub fn threads(&self) -> &ThreadContext {
        &self.threads
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of cached static matches
    pub fn cached_matches(&self) -> usize {
        self.cache.len()
    }

    pub(crate) fn cache(&self) -> &MatchCache {
        &self.cache
    }
}
