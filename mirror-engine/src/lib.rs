//! # mirror-engine
//!
//! Async orchestration for vaultmirror.
//!
//! This crate drives the pure state machines of `mirror-core` against real
//! backends, timers, and the local filesystem:
//!
//! ```text
//! Reconciler ── gathers replicas, picks winners, applies and fans out
//!     │
//!     ├─ ProviderRegistry ── which providers are lease-available right now
//!     │
//!     ├─ LocalRepository ──── apply one file version to the local tree
//!     └─ RemoteRepository ─── apply one file version to one provider
//!            │
//!            ├─ WriteQueue ────── strict FIFO per provider + debounced persist
//!            └─ ManifestSession ─ cached manifest behind the lease
//!                   │
//!                   └─ LeaseKeeper ─ drives the mirror-core lease machine
//! ```
//!
//! Every suspension point is a tokio await: backend calls, lease timers,
//! queue waits. Nothing in this crate blocks a thread.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
mod events;
mod lease;
mod queue;
mod reconcile;
mod registry;
mod repository;
mod session;
mod time;

pub use config::{EngineConfig, LeaseConfig, QueueConfig};
pub use error::EngineError;
pub use events::{EngineEvent, EventBus, ProviderEvent};
pub use lease::{LeaseKeeper, LeaseStatus, ShouldExtend};
pub use queue::{Epilogue, WriteQueue};
pub use reconcile::Reconciler;
pub use registry::ProviderRegistry;
pub use repository::{LocalRepository, Provenience, RemoteRepository, Replica};
pub use session::{ManifestHandle, ManifestSession};
