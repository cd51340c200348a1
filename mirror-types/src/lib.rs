//! # mirror-types
//!
//! Stored-blob and identity types for the vaultmirror synchronizer.
//!
//! This crate provides the foundational types used across all vaultmirror
//! crates:
//! - [`DeviceId`], [`ProviderId`], [`FileId`], [`RemoteObjectName`] - Identity types
//! - [`VersionVector`] - Causal ordering of file updates
//! - [`FileRecord`], [`LocalFileRecord`], [`RemoteFileRecord`] - Per-replica file metadata
//! - [`LocalManifest`], [`RemoteManifest`] - Replica state blobs
//! - [`Lease`] - Ownership claim on a provider's shared manifest
//! - [`FileEvent`], [`SyncSignal`], [`ProgressTick`] - Events for external observers
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod ids;
mod lease;
mod manifest;
mod record;
mod version;

pub use error::TypesError;
pub use event::{FileEvent, FileEventKind, Location, Progress, ProgressTick, SyncSignal};
pub use ids::{DeviceId, FileId, ProviderId, RemoteObjectName};
pub use lease::Lease;
pub use manifest::{LocalManifest, RemoteManifest};
pub use record::{FileKey, FileRecord, LocalFileRecord, RelativePath, RemoteFileRecord};
pub use version::{VectorOrdering, VersionVector};
