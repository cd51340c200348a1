//! Replica state blobs.
//!
//! The remote manifest is the shared, per-provider record set that every
//! device read-modify-writes under that provider's lease. The local
//! manifest is this device's own state and is mutated by nobody else.
//! Both are stored as MessagePack blobs (sealed before they leave the
//! device).

use crate::{
    DeviceId, FileId, LocalFileRecord, ProviderId, RelativePath, RemoteFileRecord, TypesError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The shared per-provider state object.
///
/// Read and written only while holding that provider's lease. Records are
/// tombstoned, never removed from the set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteManifest {
    /// Every file version this provider has ever accepted, by id.
    pub files: BTreeMap<FileId, RemoteFileRecord>,
    /// Devices that have synchronized against this provider.
    pub devices: BTreeSet<DeviceId>,
}

impl RemoteManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device on first contact. Idempotent.
    pub fn register_device(&mut self, device: &DeviceId) {
        self.devices.insert(*device);
    }

    /// Look up a record by file id.
    pub fn record(&self, id: &FileId) -> Option<&RemoteFileRecord> {
        self.files.get(id)
    }

    /// Insert or replace a record.
    pub fn upsert(&mut self, record: RemoteFileRecord) {
        self.files.insert(record.file.id, record);
    }

    /// Encode to a MessagePack blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec(self).map_err(TypesError::Encode)
    }

    /// Decode from a MessagePack blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Decode)
    }
}

/// The local device's own state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalManifest {
    /// Every file tracked by this device, by id.
    pub files: BTreeMap<FileId, LocalFileRecord>,
    /// Remote providers registered on this device.
    pub providers: BTreeSet<ProviderId>,
    /// Folders under the root currently tracked.
    pub roots: BTreeSet<RelativePath>,
}

impl LocalManifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record by file id.
    pub fn record(&self, id: &FileId) -> Option<&LocalFileRecord> {
        self.files.get(id)
    }

    /// Look up a record by relative path, tombstoned records included.
    pub fn record_at(&self, path: &RelativePath) -> Option<&LocalFileRecord> {
        self.files.values().find(|r| &r.file.path == path)
    }

    /// Insert or replace a record.
    pub fn upsert(&mut self, record: LocalFileRecord) {
        self.files.insert(record.file.id, record);
    }

    /// Encode to a MessagePack blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec(self).map_err(TypesError::Encode)
    }

    /// Decode from a MessagePack blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        rmp_serde::from_slice(bytes).map_err(TypesError::Decode)
    }
}
