//! Error types for the fleetops on-disk state.

use thiserror::Error;

/// Result type alias for operation lock calls.
pub type LockResult<T> = Result<T, LockError>;

/// Result type alias for cooldown marker calls.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("cannot start {operation}: lock is held by {holder}")]
    Contention { operation: String, holder: String },

    #[error("lock race during {operation}: lock now held by {holder}")]
    Race { operation: String, holder: String },

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cooldown marker error: {0}")]
    Io(#[from] std::io::Error),
}
