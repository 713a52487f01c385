//! Execution engine for multi-stage, multi-backend query pipelines.
//!
//! A plan arrives from the external query translator as an ordered list of
//! stages, each targeting one backend. The executor runs stages in ordinal
//! order, resolving placeholders in later stages from the outputs of earlier
//! ones, and merges the labeled stage outputs into a single result.
pub mod cache;
pub mod context;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod fingerprint;
pub mod placeholder;
pub mod plan;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

pub use cache::ResultCache;
pub use engine::Engine;
pub use errors::{ExecError, Result};
pub use executor::{ExecutorConfig, PipelineState};
pub use fingerprint::Fingerprint;
pub use plan::{Plan, Stage};

/// A non-fatal condition recorded during resolution or execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    /// A placeholder with no aggregation policy resolved to more than one
    /// distinct value; the first was used.
    MultipleValues {
        stage: usize,
        token: String,
        distinct: usize,
    },
}

/// The final merged result of a pipeline: output label to that stage's rows,
/// in plan order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub results: IndexMap<String, Vec<Value>>,
    pub warnings: Vec<Warning>,
}
