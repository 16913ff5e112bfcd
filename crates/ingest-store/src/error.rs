use chrono::{DateTime, Utc};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur within the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any other SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// The database could not be reached (busy, locked, unopenable, I/O failure).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// An SCD2 write whose timestamp does not move past the current version.
    #[error(
        "Out-of-order write for {business_key}: {at} is not after current version start {current_from}"
    )]
    Ordering {
        business_key: String,
        at: DateTime<Utc>,
        current_from: DateTime<Utc>,
    },

    /// Another writer replaced the current version between lookup and swap.
    #[error("Concurrent version swap lost for {business_key}")]
    Conflict { business_key: String },

    /// An incoming record lacks one of its business key fields.
    #[error("Record is missing business key field '{field}'")]
    MissingBusinessKey { field: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A connection mutex was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// True for failures that should abort the current scheduler iteration
    /// and be retried on the next one.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Poisoned)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::CannotOpen
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::DiskFull
                        | ErrorCode::ReadOnly
                        | ErrorCode::PermissionDenied
                ) =>
            {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for StoreError {
    fn from(err: chrono::ParseError) -> Self {
        StoreError::Serialization(format!("bad timestamp: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
