use schemastore::BackendKind;

use crate::errors::{BackendError, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Unsupported Postgres type for column '{column}': {declared}")]
    UnsupportedType { column: String, declared: String },

    #[error("Postgres connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    TokioPostgres(#[from] tokio_postgres::Error),
}

impl PostgresError {
    /// Classify for the executor's retry policy. Connection-level failures
    /// and SQLSTATE classes 08 (connection), 53 (insufficient resources) and
    /// 57 (operator intervention) are transient; everything else is not.
    pub fn classify(&self) -> ErrorClass {
        match self {
            PostgresError::ConnectionClosed => ErrorClass::Transient,
            PostgresError::TokioPostgres(err) => {
                if err.is_closed() {
                    return ErrorClass::Transient;
                }
                match err.code() {
                    Some(state) => {
                        let code = state.code();
                        if code.starts_with("08")
                            || code.starts_with("53")
                            || code.starts_with("57")
                        {
                            ErrorClass::Transient
                        } else {
                            ErrorClass::Permanent
                        }
                    }
                    // No SQLSTATE means the failure happened below the
                    // protocol, e.g. a dropped socket mid-query.
                    None => {
                        let io_level = std::error::Error::source(err)
                            .map(|s| s.downcast_ref::<std::io::Error>().is_some())
                            .unwrap_or(false);
                        if io_level {
                            ErrorClass::Transient
                        } else {
                            ErrorClass::Permanent
                        }
                    }
                }
            }
            _ => ErrorClass::Permanent,
        }
    }
}

impl From<PostgresError> for BackendError {
    fn from(err: PostgresError) -> BackendError {
        BackendError::new(BackendKind::Postgres, err.classify(), err.to_string())
    }
}

pub type Result<T, E = PostgresError> = std::result::Result<T, E>;
