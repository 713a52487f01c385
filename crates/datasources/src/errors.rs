use std::fmt;

use schemastore::BackendKind;

/// Whether a backend failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely to succeed on retry (dropped connection, timeout).
    Transient,
    /// Retry will not help (malformed query, constraint violation).
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Permanent => f.write_str("permanent"),
        }
    }
}

/// A classified failure from one backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} backend error ({class}): {message}")]
pub struct BackendError {
    pub kind: BackendKind,
    pub class: ErrorClass,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendKind, class: ErrorClass, message: impl Into<String>) -> BackendError {
        BackendError {
            kind,
            class,
            message: message.into(),
        }
    }

    pub fn transient(kind: BackendKind, message: impl Into<String>) -> BackendError {
        Self::new(kind, ErrorClass::Transient, message)
    }

    pub fn permanent(kind: BackendKind, message: impl Into<String>) -> BackendError {
        Self::new(kind, ErrorClass::Permanent, message)
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;
