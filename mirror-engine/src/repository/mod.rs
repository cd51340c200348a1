//! Replica repositories: apply one file version to one store.
//!
//! A replica is anything that holds file records and can produce or accept
//! content: the local tree or one remote provider. During reconciliation
//! every record travels as a [`Provenience`] - the record paired with the
//! repository it was read from, so apply knows where to pull bytes.

mod local;
mod remote;

pub use local::LocalRepository;
pub use remote::RemoteRepository;

use crate::error::EngineError;
use async_trait::async_trait;
use mirror_types::{FileId, FileRecord, Location};
use std::sync::Arc;

/// One replica's view of the synchronized files.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Which replica this is.
    fn location(&self) -> Location;

    /// Snapshot of every record this replica holds, tombstones included.
    async fn records(&self) -> Result<Vec<FileRecord>, EngineError>;

    /// Read one file's plaintext content.
    async fn fetch(&self, id: &FileId) -> Result<Vec<u8>, EngineError>;

    /// Apply one file version read from another replica. Returns whether
    /// anything changed; failures are logged and resolve to `false`.
    async fn save(&self, source: &Provenience) -> bool;
}

/// A file version paired with the repository it was read from.
///
/// Transient - exists only during one reconciliation pass.
#[derive(Clone)]
pub struct Provenience {
    /// The record as the origin replica holds it.
    pub record: FileRecord,
    /// Where the record (and its content) came from.
    pub origin: Arc<dyn Replica>,
}

impl Provenience {
    /// Pair a record with its origin replica.
    pub fn new(record: FileRecord, origin: Arc<dyn Replica>) -> Self {
        Self { record, origin }
    }

    /// Whether this version was read from the local replica.
    pub fn is_local(&self) -> bool {
        self.origin.location() == Location::Local
    }
}

impl std::fmt::Debug for Provenience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provenience")
            .field("record", &self.record.id)
            .field("origin", &self.origin.location())
            .finish()
    }
}
