//! Per-replica file metadata records.
//!
//! A [`FileRecord`] is one file's metadata as known to one replica. Records
//! are never physically dropped from their set: deletion and removal are
//! tombstone flags that are set once and never cleared, so the fact of a
//! deletion propagates to every other replica.

use crate::{DeviceId, FileId, RemoteObjectName, VersionVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A file path relative to the synchronized root, `/`-separated on every
/// platform.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a relative path, normalizing `\` separators to `/`.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().replace('\\', "/"))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path under a concrete root directory.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.0.split('/').filter(|s| !s.is_empty()) {
            out.push(segment);
        }
        out
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelativePath({})", self.0)
    }
}

/// Symmetric key protecting one file's remote content.
///
/// Rotated on every content update; stored inside the sealed remote
/// manifest, zeroed from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct FileKey([u8; 32]);

impl FileKey {
    /// Mint a fresh random key.
    pub fn mint() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileKey([REDACTED])")
    }
}

/// One file's metadata as known to one replica.
///
/// The `id` is minted when the file is first tracked and never changes;
/// every replica holding a version of the file holds it under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Stable identity across replicas.
    pub id: FileId,
    /// Causal update history.
    pub vector: VersionVector,
    /// BLAKE3 hash of the plaintext content.
    pub content_hash: [u8; 32],
    /// Last modification time, milliseconds since the Unix epoch.
    pub modified_ms: u64,
    /// Content size in bytes.
    pub size: u64,
    /// Path relative to the synchronized root.
    pub path: RelativePath,
    /// The record describes live content.
    pub active: bool,
    /// Tombstone: content was deleted. Set once, never cleared.
    pub deleted: bool,
    /// Tombstone: file was removed from tracking. Set once, never cleared.
    pub removed: bool,
    /// Metadata-only record with no retrievable content. Set by upstream
    /// collaborators, only consumed here.
    pub ghost: bool,
}

impl FileRecord {
    /// Create the record for a newly tracked file, with the owning device's
    /// counter already incremented.
    pub fn create(
        device: &DeviceId,
        path: RelativePath,
        content_hash: [u8; 32],
        size: u64,
        modified_ms: u64,
    ) -> Self {
        let mut vector = VersionVector::new();
        vector.increment(device);
        Self {
            id: FileId::new(),
            vector,
            content_hash,
            modified_ms,
            size,
            path,
            active: true,
            deleted: false,
            removed: false,
            ghost: false,
        }
    }

    /// Record a local content change: new hash/size/mtime, vector bumped.
    pub fn record_change(
        &mut self,
        device: &DeviceId,
        content_hash: [u8; 32],
        size: u64,
        modified_ms: u64,
    ) {
        self.content_hash = content_hash;
        self.size = size;
        self.modified_ms = modified_ms;
        self.vector.increment(device);
    }

    /// Tombstone the record as deleted on disk.
    pub fn mark_deleted(&mut self, device: &DeviceId, modified_ms: u64) {
        self.deleted = true;
        self.active = false;
        self.modified_ms = modified_ms;
        self.vector.increment(device);
    }

    /// Tombstone the record as removed from tracking.
    pub fn mark_removed(&mut self, device: &DeviceId, modified_ms: u64) {
        self.removed = true;
        self.active = false;
        self.modified_ms = modified_ms;
        self.vector.increment(device);
    }

    /// True once either tombstone flag is set.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted || self.removed
    }
}

/// A file record tracked by the local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileRecord {
    /// The shared record fields.
    pub file: FileRecord,
}

impl LocalFileRecord {
    /// Wrap a record for the local manifest.
    pub fn new(file: FileRecord) -> Self {
        Self { file }
    }
}

/// A file record tracked by one remote manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileRecord {
    /// The shared record fields.
    pub file: FileRecord,
    /// Symmetric key for the current remote content. Rotated on every
    /// content update.
    pub key: FileKey,
    /// Backend-assigned object name. Absent until the first upload and
    /// again after a tombstone deletes the remote object.
    pub object: Option<RemoteObjectName>,
}

impl RemoteFileRecord {
    /// Create the record for a file's first upload to a backend.
    pub fn new(file: FileRecord, key: FileKey, object: RemoteObjectName) -> Self {
        Self {
            file,
            key,
            object: Some(object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VectorOrdering;

    fn device(tag: u8) -> DeviceId {
        DeviceId::from_bytes(&[tag; 32]).unwrap()
    }

    fn sample_record() -> FileRecord {
        FileRecord::create(
            &device(1),
            RelativePath::new("docs/notes.txt"),
            [7u8; 32],
            128,
            1_000,
        )
    }

    #[test]
    fn create_increments_owner_counter() {
        let record = sample_record();
        assert_eq!(record.vector.counter(&device(1)), 1);
        assert!(record.active);
        assert!(!record.is_tombstoned());
    }

    #[test]
    fn record_change_moves_history_forward() {
        let mut record = sample_record();
        let before = record.vector.clone();

        record.record_change(&device(1), [8u8; 32], 256, 2_000);

        assert_eq!(record.vector.compare(&before), VectorOrdering::Newer);
        assert_eq!(record.size, 256);
        assert_eq!(record.modified_ms, 2_000);
    }

    #[test]
    fn tombstones_clear_active_and_bump_vector() {
        let mut record = sample_record();
        let before = record.vector.clone();

        record.mark_deleted(&device(1), 3_000);

        assert!(record.deleted);
        assert!(!record.active);
        assert!(record.is_tombstoned());
        assert_eq!(record.vector.compare(&before), VectorOrdering::Newer);
    }

    #[test]
    fn removal_is_a_tombstone_too() {
        let mut record = sample_record();
        record.mark_removed(&device(2), 3_000);
        assert!(record.removed);
        assert!(record.is_tombstoned());
        assert_eq!(record.vector.counter(&device(2)), 1);
    }

    #[test]
    fn relative_path_normalizes_separators() {
        let path = RelativePath::new("a\\b\\c.txt");
        assert_eq!(path.as_str(), "a/b/c.txt");
    }

    #[test]
    fn relative_path_resolves_under_root() {
        let path = RelativePath::new("a/b/c.txt");
        let resolved = path.resolve(Path::new("/root"));
        assert_eq!(resolved, PathBuf::from("/root/a/b/c.txt"));
    }

    #[test]
    fn file_key_debug_is_redacted() {
        let key = FileKey::mint();
        assert_eq!(format!("{:?}", key), "FileKey([REDACTED])");
    }

    #[test]
    fn minted_keys_differ() {
        assert_ne!(FileKey::mint(), FileKey::mint());
    }

    #[test]
    fn remote_record_roundtrip() {
        let record = RemoteFileRecord::new(
            sample_record(),
            FileKey::mint(),
            RemoteObjectName::new("obj-1"),
        );
        let bytes = rmp_serde::to_vec(&record).unwrap();
        let restored: RemoteFileRecord = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(record, restored);
    }
}
