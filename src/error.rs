//! pgquay Error Types

use thiserror::Error;

/// Result type alias for pgquay operations
pub type Result<T> = std::result::Result<T, Error>;

/// pgquay error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Identity error: {0}")]
    Identity(String),

    // Store errors
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Object already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Store transport error: {0}")]
    Transport(String),

    #[error("Precondition failed on {key}: expected {expected:?}, found {found:?}")]
    PreconditionFailed {
        key: String,
        expected: String,
        found: String,
    },

    // Lock errors
    #[error("Already locked by {owner}")]
    AlreadyLocked { owner: String },

    #[error("Lock {lock} was changed by another holder during acquisition")]
    LockContention { lock: String },

    #[error("Lock lost: expected holder {holder}, lock shows {owner:?}")]
    LockLost { holder: String, owner: String },

    #[error("Could not release the lock, owner is still {owner:?}")]
    UnlockFailed { owner: String },

    #[error("{holder} is not holding the lock (owner: {owner:?})")]
    NotHolding { holder: String, owner: String },

    #[error("Invalid lock timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    // State errors
    #[error("newState {next} is invalid as next state from {current}")]
    InvalidTransition { current: String, next: String },

    // Plumbing
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),
}

impl Error {
    /// Check if this error is retryable after a fresh read
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::PreconditionFailed { .. }
                | Error::AlreadyLocked { .. }
                | Error::LockContention { .. }
                | Error::LockLost { .. }
                | Error::UnlockFailed { .. }
        )
    }

    /// Check if this error means the target object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
