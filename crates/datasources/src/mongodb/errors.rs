use mongodb::error::ErrorKind;
use schemastore::BackendKind;

use crate::errors::{BackendError, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum MongoError {
    #[error("Failed to query MongoDB: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("Malformed Mongo query document: {0}")]
    MalformedQuery(String),

    #[error(transparent)]
    BsonSer(#[from] bson::ser::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MongoError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            MongoError::Mongo(err) => match err.kind.as_ref() {
                ErrorKind::Io(_)
                | ErrorKind::ServerSelection { .. }
                | ErrorKind::ConnectionPoolCleared { .. } => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            _ => ErrorClass::Permanent,
        }
    }
}

impl From<MongoError> for BackendError {
    fn from(err: MongoError) -> BackendError {
        BackendError::new(BackendKind::MongoDb, err.classify(), err.to_string())
    }
}

pub type Result<T, E = MongoError> = std::result::Result<T, E>;
