//! The pipeline engine: validation, caching, and execution.

use std::sync::Arc;

use datasources::errors::BackendError;
use datasources::AdapterSet;
use schemastore::{BackendKind, SchemaRegistry};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::ResultCache;
use crate::errors::Result;
use crate::executor::{ExecutorConfig, PipelineRun};
use crate::plan::Plan;
use crate::PipelineOutput;

/// Long-lived entry point for executing plans.
///
/// Holds the schema registry, the adapter set, and the result cache; each
/// `execute` call drives one single-use [`PipelineRun`].
pub struct Engine {
    registry: Arc<SchemaRegistry>,
    adapters: AdapterSet,
    cache: ResultCache,
    config: ExecutorConfig,
}

impl Engine {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        adapters: AdapterSet,
        cache: ResultCache,
        config: ExecutorConfig,
    ) -> Engine {
        Engine {
            registry,
            adapters,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn execute(&self, plan: &Plan) -> Result<PipelineOutput> {
        self.execute_with_cancellation(plan, &CancellationToken::new())
            .await
    }

    /// Validate, consult the cache, then run the plan stage by stage.
    ///
    /// Only successful outputs are cached; failures always re-execute.
    pub async fn execute_with_cancellation(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        plan.validate()?;

        let fingerprint = plan.fingerprint();
        if let Some(output) = self.cache.get(&fingerprint) {
            debug!(%fingerprint, "cache hit, skipping execution");
            return Ok(output);
        }

        let mut run = PipelineRun::new(self.registry.clone(), self.adapters.clone(), self.config);
        let output = run.run(plan, cancel).await?;
        self.cache
            .put(fingerprint, output.clone(), self.cache.default_ttl());
        Ok(output)
    }

    /// Ping every registered backend.
    pub async fn check_connectivity(&self) -> Vec<(BackendKind, Result<(), BackendError>)> {
        let mut statuses = Vec::new();
        let mut kinds = self.adapters.kinds();
        kinds.sort_by_key(|k| k.as_str());
        for kind in kinds {
            if let Some(adapter) = self.adapters.get(kind) {
                statuses.push((kind, adapter.ping().await));
            }
        }
        statuses
    }

    pub async fn close(&self) -> Result<(), BackendError> {
        self.adapters.close_all().await
    }
}
