use appetite_store::StorageError;
use appetite_types::BoundError;
use thiserror::Error;

pub type AppetiteResult<T> = Result<T, AppetiteError>;

/// Errors surfaced by the engine.
///
/// Missing configuration or data is not an error: it is reported through the
/// diagnostic statuses `NO_KRI`, `NO_DATA` and `UNKNOWN`.
#[derive(Debug, Error)]
pub enum AppetiteError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Mutating an immutable governed record, an illegal lifecycle move, or a
    /// maker approving their own work.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A lock is already held or a racing write won.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StorageError> for AppetiteError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => AppetiteError::NotFound(msg),
            StorageError::Conflict(msg) => AppetiteError::ConcurrencyConflict(msg),
            StorageError::InvariantViolation(msg) => AppetiteError::InvalidState(msg),
            StorageError::InvalidInput(msg) => AppetiteError::Validation(msg),
            StorageError::Backend(msg) => AppetiteError::Storage(msg),
        }
    }
}

impl From<BoundError> for AppetiteError {
    fn from(err: BoundError) -> Self {
        AppetiteError::Validation(err.to_string())
    }
}
