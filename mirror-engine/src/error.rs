//! Error types for mirror-engine.

use mirror_store::StoreError;
use mirror_types::TypesError;
use thiserror::Error;

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A backend or content-pipeline operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Encoding or decoding a stored blob failed.
    #[error("encoding error: {0}")]
    Types(#[from] TypesError),

    /// Local filesystem access failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller tried to track a path that is already tracked.
    #[error("path already tracked: {path}")]
    AlreadyManaged {
        /// The offending relative path.
        path: String,
    },

    /// The provider's lease yielded no access this cycle.
    #[error("provider lease unavailable")]
    LeaseUnavailable,

    /// No record exists for the requested file.
    #[error("unknown file: {file}")]
    UnknownFile {
        /// The file id that was requested.
        file: String,
    },

    /// Configuration loading or parsing failed.
    #[error("config error: {0}")]
    Config(String),
}
