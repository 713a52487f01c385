use datasources::errors::BackendError;
use schemastore::errors::SchemaError;
use schemastore::BackendKind;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Stage {stage} references unresolved output: {token}")]
    UnresolvedReference { stage: usize, token: String },

    #[error("Stage {stage} cannot coerce field '{field}': {reason}")]
    CoercionError {
        stage: usize,
        field: String,
        reason: String,
    },

    #[error("Stage {stage} failed: {source}")]
    Backend {
        stage: usize,
        #[source]
        source: BackendError,
    },

    #[error("No adapter registered for backend '{0}'")]
    UnsupportedBackend(BackendKind),

    #[error("Pipeline cancelled before stage {stage}")]
    Cancelled { stage: usize },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;
