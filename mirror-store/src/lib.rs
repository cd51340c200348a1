//! # mirror-store
//!
//! Storage backend contract and content crypto for vaultmirror.
//!
//! A remote provider is a dumb object store reached through the
//! four-operation [`Backend`] contract (`post`, `put`, `get`, `delete`);
//! the synchronizer never assumes anything richer. Everything that leaves
//! the device is protected first:
//!
//! ```text
//! file content:   plaintext → gzip → XChaCha20-Poly1305(FileKey)  → backend object
//! lock/manifest:  blob      →        XChaCha20-Poly1305(SealKey) → backend object
//! ```
//!
//! File keys are minted per upload and rotated on every content update;
//! they travel only inside the sealed manifest. The nonce is random per
//! encryption and prepended to the ciphertext, so blobs are
//! self-describing.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod backend;
mod crypto;
mod error;

pub use backend::{Backend, MemoryBackend};
pub use crypto::{
    content_hash, open_blob, open_content, seal_blob, seal_content, SealKey, NONCE_SIZE,
};
pub use error::StoreError;

use mirror_types::RemoteObjectName;

/// Reserved object name of the per-provider lock object.
pub fn lock_object() -> RemoteObjectName {
    RemoteObjectName::new("lock")
}

/// Reserved object name of the per-provider manifest object.
pub fn manifest_object() -> RemoteObjectName {
    RemoteObjectName::new("manifest")
}
