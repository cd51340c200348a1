//! Error types for mirror-store.

use thiserror::Error;

/// Errors from backend operations and the content pipeline.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist at the backend. Often a valid,
    /// expected state (unset lock, first-contact manifest), not a failure.
    #[error("object not found: {object}")]
    NotFound {
        /// The object name that was requested.
        object: String,
    },

    /// Local I/O failed (compression streams, staging files).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend reported a failure that is not "not found".
    #[error("backend error: {0}")]
    Backend(String),

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl StoreError {
    /// Whether this error is the distinguishable "not found" state.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_distinguishable() {
        let err = StoreError::NotFound {
            object: "lock".into(),
        };
        assert!(err.is_not_found());
        assert!(!StoreError::Backend("boom".into()).is_not_found());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }
}
