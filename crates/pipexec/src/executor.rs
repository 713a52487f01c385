//! Stage-by-stage pipeline driving.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use datasources::{AdapterSet, ResultSet};
use indexmap::IndexMap;
use schemastore::SchemaRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::errors::{ExecError, Result};
use crate::placeholder;
use crate::plan::{Plan, Stage};
use crate::{PipelineOutput, Warning};

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Retries after the first attempt; 2 means up to 3 attempts total.
    pub max_retries: usize,
    /// Fixed delay between attempts.
    pub retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> ExecutorConfig {
        ExecutorConfig {
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One execution of one plan. Single-use.
pub struct PipelineRun {
    id: Uuid,
    registry: Arc<SchemaRegistry>,
    adapters: AdapterSet,
    config: ExecutorConfig,
    state: PipelineState,
    context: Context,
    warnings: Vec<Warning>,
}

impl PipelineRun {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        adapters: AdapterSet,
        config: ExecutorConfig,
    ) -> PipelineRun {
        PipelineRun {
            id: Uuid::new_v4(),
            registry,
            adapters,
            config,
            state: PipelineState::Pending,
            context: Context::new(),
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run every stage in order, then merge labeled outputs.
    ///
    /// The first stage failure aborts the run; later stages do not execute.
    /// Cancellation is observed between stages, not mid-query.
    pub async fn run(
        &mut self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        self.state = PipelineState::Running;
        info!(run_id = %self.id, stages = plan.stages.len(), "pipeline started");

        match self.drive(plan, cancel).await {
            Ok(()) => {
                self.state = PipelineState::Succeeded;
                info!(run_id = %self.id, "pipeline succeeded");
                Ok(self.finalize(plan))
            }
            Err(err) => {
                self.state = PipelineState::Failed;
                warn!(run_id = %self.id, error = %err, "pipeline failed");
                Err(err)
            }
        }
    }

    async fn drive(&mut self, plan: &Plan, cancel: &CancellationToken) -> Result<()> {
        for stage in &plan.stages {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled { stage: stage.index });
            }
            let result = self.run_stage(stage).await?;
            debug!(
                run_id = %self.id,
                stage = stage.index,
                backend = %stage.backend,
                rows = result.len(),
                "stage completed"
            );
            self.context.insert(stage.index, result);
        }
        Ok(())
    }

    async fn run_stage(&mut self, stage: &Stage) -> Result<ResultSet> {
        let adapter = self
            .adapters
            .get(stage.backend)
            .ok_or(ExecError::UnsupportedBackend(stage.backend))?;

        if let Some(description) = &stage.description {
            debug!(run_id = %self.id, stage = stage.index, description, "running stage");
        }

        let resolved =
            placeholder::resolve_stage(stage, &self.context, &self.registry, adapter.as_ref())?;
        self.warnings.extend(resolved.warnings);

        if resolved.short_circuit {
            debug!(
                run_id = %self.id,
                stage = stage.index,
                "empty list substitution, skipping backend call"
            );
            return Ok(ResultSet::empty(stage.backend));
        }

        let mut attempt = 0;
        loop {
            match adapter.execute(&resolved.text, &resolved.params).await {
                Ok(result) => return Ok(result),
                Err(source) if source.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        run_id = %self.id,
                        stage = stage.index,
                        attempt,
                        error = %source,
                        "transient backend failure, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(source) => {
                    return Err(ExecError::Backend {
                        stage: stage.index,
                        source,
                    })
                }
            }
        }
    }

    /// Merge stage outputs into the final shape.
    ///
    /// Labeled stages appear under their labels in plan order. A plan with no
    /// labels at all yields its final stage under `stage_<index>`.
    fn finalize(&mut self, plan: &Plan) -> PipelineOutput {
        let mut results = IndexMap::new();
        for stage in &plan.stages {
            if let Some(label) = &stage.output_label {
                let rows = self
                    .context
                    .get(stage.index)
                    .map(|r| r.rows.clone())
                    .unwrap_or_default();
                results.insert(label.clone(), rows);
            }
        }
        if results.is_empty() {
            if let Some(stage) = plan.stages.last() {
                let rows = self
                    .context
                    .get(stage.index)
                    .map(|r| r.rows.clone())
                    .unwrap_or_default();
                results.insert(format!("stage_{}", stage.index), rows);
            }
        }

        PipelineOutput {
            results,
            warnings: mem::take(&mut self.warnings),
        }
    }
}
