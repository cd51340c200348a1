//! Cached manifest access behind the lease.
//!
//! A [`ManifestSession`] layers manifest fetch/cache on top of the lease
//! keeper. While the session is active every acquire returns the cached
//! manifest immediately; the first acquire of a session performs the one
//! underlying fetch that all concurrent acquires share. A "not found"
//! manifest is synthesized empty and persisted with this device
//! registered.
//!
//! Acquire handles count as work in flight: the lease keeps renewing while
//! at least one handle is alive, and is allowed to lapse once the last one
//! is released.

use crate::error::EngineError;
use crate::lease::{LeaseKeeper, LeaseStatus, ShouldExtend};
use mirror_core::LeaseTiming;
use mirror_store::{manifest_object, open_blob, seal_blob, Backend, SealKey};
use mirror_types::{DeviceId, ProviderId, RemoteManifest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

type SharedManifest = Arc<Mutex<RemoteManifest>>;

struct SessionShared {
    provider: ProviderId,
    device: DeviceId,
    backend: Arc<dyn Backend>,
    seal: SealKey,
    keeper: LeaseKeeper,
    cache: Mutex<Option<SharedManifest>>,
    in_progress: Arc<AtomicUsize>,
}

/// Cached-manifest session for one provider.
#[derive(Clone)]
pub struct ManifestSession {
    shared: Arc<SessionShared>,
}

impl ManifestSession {
    /// Create a session and its lease keeper for one provider.
    pub fn new(
        provider: ProviderId,
        device: DeviceId,
        timing: LeaseTiming,
        backend: Arc<dyn Backend>,
        seal: SealKey,
    ) -> Self {
        let in_progress = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&in_progress);
        let should_extend: ShouldExtend = Arc::new(move || counter.load(Ordering::SeqCst) > 0);

        let keeper = LeaseKeeper::spawn(
            device,
            timing,
            Arc::clone(&backend),
            seal.clone(),
            should_extend,
        );

        let shared = Arc::new(SessionShared {
            provider,
            device,
            backend,
            seal,
            keeper,
            cache: Mutex::new(None),
            in_progress,
        });

        // Drop the cached manifest whenever the lease is lost; the next
        // session must re-read the shared state it no longer owns.
        let watcher = Arc::downgrade(&shared);
        let mut status_rx = shared.keeper.status();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow();
                if matches!(
                    status,
                    LeaseStatus::Unavailable | LeaseStatus::Expired | LeaseStatus::Error
                ) {
                    let Some(shared) = watcher.upgrade() else {
                        return;
                    };
                    shared.cache.lock().await.take();
                }
            }
        });

        Self { shared }
    }

    /// The provider this session belongs to.
    pub fn provider(&self) -> ProviderId {
        self.shared.provider
    }

    /// Subscribe to the underlying lease status.
    pub fn lease_status(&self) -> tokio::sync::watch::Receiver<LeaseStatus> {
        self.shared.keeper.status()
    }

    /// Stop the underlying lease keeper.
    pub fn stop(&self) {
        self.shared.keeper.stop();
    }

    /// Acquire the provider's manifest.
    ///
    /// Waits through an in-flight attempt cycle; fails with
    /// [`EngineError::LeaseUnavailable`] if the cycle ends without access.
    /// While the session is active this returns the cached manifest
    /// without re-fetching.
    pub async fn acquire(&self) -> Result<ManifestHandle, EngineError> {
        let mut status_rx = self.shared.keeper.status();
        self.shared.keeper.ensure_running();

        loop {
            let status = *status_rx.borrow_and_update();
            match status {
                LeaseStatus::Available => break,
                LeaseStatus::Starting => {
                    if status_rx.changed().await.is_err() {
                        return Err(EngineError::LeaseUnavailable);
                    }
                }
                LeaseStatus::Expired => {
                    // A fresh acquire restarts the full protocol.
                    self.shared.keeper.ensure_running();
                    if status_rx.changed().await.is_err() {
                        return Err(EngineError::LeaseUnavailable);
                    }
                }
                LeaseStatus::Unavailable | LeaseStatus::Error => {
                    return Err(EngineError::LeaseUnavailable);
                }
            }
        }

        // One underlying fetch, shared by every concurrent acquire.
        let mut cache = self.shared.cache.lock().await;
        let manifest = match cache.as_ref() {
            Some(manifest) => Arc::clone(manifest),
            None => {
                let fetched = Arc::new(Mutex::new(self.fetch_or_create().await?));
                *cache = Some(Arc::clone(&fetched));
                fetched
            }
        };
        drop(cache);

        self.shared.in_progress.fetch_add(1, Ordering::SeqCst);
        Ok(ManifestHandle {
            manifest,
            in_progress: Arc::clone(&self.shared.in_progress),
        })
    }

    /// Seal and write the cached manifest back to the provider.
    ///
    /// The write queue runs this as its epilogue. A session without a
    /// cached manifest has nothing to persist.
    pub async fn persist(&self) -> Result<(), EngineError> {
        let cache = self.shared.cache.lock().await;
        let Some(manifest) = cache.as_ref() else {
            return Ok(());
        };
        let manifest = Arc::clone(manifest);
        drop(cache);

        let blob = manifest.lock().await.to_bytes()?;
        let sealed = seal_blob(&self.shared.seal, &blob)?;
        self.shared.backend.put(&manifest_object(), &sealed).await?;
        tracing::debug!(provider = %self.shared.provider, "manifest persisted");
        Ok(())
    }

    async fn fetch_or_create(&self) -> Result<RemoteManifest, EngineError> {
        match self.shared.backend.get(&manifest_object()).await {
            Ok(sealed) => {
                let bytes = open_blob(&self.shared.seal, &sealed)?;
                Ok(RemoteManifest::from_bytes(&bytes)?)
            }
            Err(e) if e.is_not_found() => {
                let mut manifest = RemoteManifest::new();
                manifest.register_device(&self.shared.device);
                let sealed = seal_blob(&self.shared.seal, &manifest.to_bytes()?)?;
                self.shared.backend.put(&manifest_object(), &sealed).await?;
                tracing::debug!(provider = %self.shared.provider, "synthesized empty manifest");
                Ok(manifest)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Access to the cached manifest plus the release side of the in-progress
/// counter. Dropping the handle releases it.
pub struct ManifestHandle {
    manifest: SharedManifest,
    in_progress: Arc<AtomicUsize>,
}

impl ManifestHandle {
    /// Lock the cached manifest for reading or mutation.
    pub async fn manifest(&self) -> tokio::sync::MutexGuard<'_, RemoteManifest> {
        self.manifest.lock().await
    }

    /// Release the handle. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for ManifestHandle {
    fn drop(&mut self) {
        self.in_progress.fetch_sub(1, Ordering::SeqCst);
    }
}
