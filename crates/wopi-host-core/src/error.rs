use thiserror::Error;

/// Errors raised by a storage gateway.
///
/// Absence is not an error: `head` and `get` return `Ok(None)` for unknown keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Storage call timed out after {0} ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by the lock manager and the file access gateways.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WopiError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock held under another token, or a lock-state precondition was not met.
    /// `current_lock` is the live holder's token when there is one.
    #[error("Lock conflict: {reason}")]
    Conflict {
        reason: String,
        current_lock: Option<String>,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Storage failure: {0}")]
    Storage(StorageError),
}

impl WopiError {
    pub(crate) fn conflict(reason: impl Into<String>, current_lock: Option<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
            current_lock,
        }
    }

    /// The live holder's token carried by a conflict, if any.
    pub fn current_lock(&self) -> Option<&str> {
        match self {
            Self::Conflict { current_lock, .. } => current_lock.as_deref(),
            _ => None,
        }
    }
}

impl From<StorageError> for WopiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(msg) => WopiError::BadRequest(msg),
            other => WopiError::Storage(other),
        }
    }
}
