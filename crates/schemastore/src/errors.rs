use crate::types::BackendKind;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Schema unavailable for backend '{0}'")]
    SchemaUnavailable(BackendKind),

    #[error("Schema for backend '{0}' has not been loaded")]
    NotLoaded(BackendKind),

    #[error("Malformed schema for backend '{kind}': {reason}")]
    Malformed { kind: BackendKind, reason: String },

    #[error("Malformed schema document: {0}")]
    MalformedDocument(String),

    #[error("Unknown backend kind: '{0}'")]
    UnknownBackend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = SchemaError> = std::result::Result<T, E>;
