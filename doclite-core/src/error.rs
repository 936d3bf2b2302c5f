// src/error.rs
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocLiteError {
    /// Document failed a collection validator, or a bulk call was malformed
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (document id or unique index)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Write lock or pool acquisition timed out
    #[error("Busy: {0}")]
    Busy(String),

    /// Malformed query operator, field path or update
    #[error("Invalid plan: {0}")]
    Plan(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection pool is closed")]
    PoolClosed,
}

/// Copyable discriminant of [`DocLiteError`] for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Busy,
    Plan,
    Engine,
}

impl DocLiteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocLiteError::Validation(_) => ErrorKind::Validation,
            DocLiteError::NotFound(_) => ErrorKind::NotFound,
            DocLiteError::Conflict(_) => ErrorKind::Conflict,
            DocLiteError::Busy(_) => ErrorKind::Busy,
            DocLiteError::Plan(_) => ErrorKind::Plan,
            DocLiteError::Engine(_) | DocLiteError::Serialization(_) | DocLiteError::PoolClosed => {
                ErrorKind::Engine
            }
        }
    }

    /// True when the engine rejected an `INDEXED BY` hint for an index it cannot use.
    pub(crate) fn is_index_hint_failure(&self) -> bool {
        match self {
            DocLiteError::Engine(msg) => {
                msg.contains("no such index") || msg.contains("no query solution")
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for DocLiteError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref message) => {
                let detail = message.clone().unwrap_or_else(|| failure.to_string());
                match failure.code {
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                        DocLiteError::Busy(detail)
                    }
                    ErrorCode::ConstraintViolation => DocLiteError::Conflict(detail),
                    _ => DocLiteError::Engine(detail),
                }
            }
            other => DocLiteError::Engine(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DocLiteError>;
