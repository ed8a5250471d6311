use enleve_shared::{BackendError, TransitionError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (database directory, object files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Stored JSON could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Update would break the attendance lifecycle.
    #[error("Invalid transition: {0}")]
    Transition(#[from] TransitionError),

    /// Object already exists and overwrite was not requested.
    #[error("Object already exists: {0}")]
    ObjectExists(String),

    /// Rejected object path or signed URL.
    #[error("Invalid object access: {0}")]
    InvalidObject(String),

    /// Signed URL past its expiry.
    #[error("Signed URL expired")]
    Expired,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for BackendError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => BackendError::NotFound,
            StoreError::Transition(t) => BackendError::Transition(t),
            StoreError::ObjectExists(path) => {
                BackendError::Conflict(format!("object already exists: {path}"))
            }
            StoreError::InvalidObject(msg) => BackendError::Forbidden(msg),
            StoreError::Expired => BackendError::Forbidden("signed URL expired".into()),
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                BackendError::Conflict(msg.unwrap_or_else(|| err.to_string()))
            }
            other => BackendError::Remote {
                status: 500,
                message: other.to_string(),
            },
        }
    }
}
