use schemastore::BackendKind;

use crate::errors::{BackendError, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum Neo4jError {
    #[error("Neo4j request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Neo4j returned HTTP status {0}")]
    Http(reqwest::StatusCode),

    #[error("Neo4j server error {code}: {message}")]
    Server { code: String, message: String },

    #[error("Malformed Neo4j response: {0}")]
    MalformedResponse(String),
}

impl Neo4jError {
    /// Transport-level failures and `Neo.TransientError.*` statuses are
    /// retryable; client errors are not.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Neo4jError::Request(err) if err.is_connect() || err.is_timeout() => {
                ErrorClass::Transient
            }
            Neo4jError::Http(status) if status.is_server_error() => ErrorClass::Transient,
            Neo4jError::Server { code, .. } if code.starts_with("Neo.TransientError") => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }
}

impl From<Neo4jError> for BackendError {
    fn from(err: Neo4jError) -> BackendError {
        BackendError::new(BackendKind::Neo4j, err.classify(), err.to_string())
    }
}

pub type Result<T, E = Neo4jError> = std::result::Result<T, E>;
