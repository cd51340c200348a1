//! Tracks which remote providers are currently lease-available.
//!
//! Activating a provider runs its backend init, wires the lease session
//! and repository, and spawns a watcher that flips the provider's
//! validity flag from the lease status stream: a protocol error marks it
//! invalid until it recovers, everything else leaves it potentially
//! valid. The reconciler iterates the currently valid snapshot each run.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus, ProviderEvent};
use crate::lease::LeaseStatus;
use crate::repository::RemoteRepository;
use dashmap::DashMap;
use mirror_store::{Backend, SealKey};
use mirror_types::{DeviceId, ProviderId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

struct ActiveProvider {
    repository: Arc<RemoteRepository>,
    valid: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

/// The set of activated providers and their validity flags.
pub struct ProviderRegistry {
    device: DeviceId,
    config: EngineConfig,
    events: EventBus,
    providers: DashMap<ProviderId, ActiveProvider>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new(device: DeviceId, config: EngineConfig, events: EventBus) -> Self {
        Self {
            device,
            config,
            events,
            providers: DashMap::new(),
        }
    }

    /// Activate a provider: init its backend, wire lease + repository,
    /// start watching its lease status.
    pub async fn activate(
        &self,
        provider: ProviderId,
        backend: Arc<dyn Backend>,
        seal: SealKey,
    ) -> Result<Arc<RemoteRepository>, EngineError> {
        backend.init(&self.device).await?;

        let repository = RemoteRepository::new(
            provider,
            self.device,
            backend,
            seal,
            &self.config,
            self.events.clone(),
        );

        let valid = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&valid);
        let mut status_rx = repository.lease_status();
        let watcher = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow();
                // Only a protocol error invalidates the provider; every
                // other status means it may come back within the cycle.
                flag.store(status != LeaseStatus::Error, Ordering::SeqCst);
            }
        });

        self.providers.insert(
            provider,
            ActiveProvider {
                repository: Arc::clone(&repository),
                valid,
                watcher,
            },
        );
        self.events.publish(EngineEvent::Provider(ProviderEvent {
            provider,
            active: true,
        }));
        tracing::info!(provider = %provider, "provider activated");
        Ok(repository)
    }

    /// Deactivate a provider: stop its lease keeper and drop it from the
    /// active set.
    pub fn deactivate(&self, provider: &ProviderId) {
        if let Some((_, active)) = self.providers.remove(provider) {
            active.repository.stop();
            active.watcher.abort();
            self.events.publish(EngineEvent::Provider(ProviderEvent {
                provider: *provider,
                active: false,
            }));
            tracing::info!(provider = %provider, "provider deactivated");
        }
    }

    /// Snapshot of the providers currently flagged valid.
    pub fn currently_active(&self) -> Vec<Arc<RemoteRepository>> {
        self.providers
            .iter()
            .filter(|entry| entry.valid.load(Ordering::SeqCst))
            .map(|entry| Arc::clone(&entry.repository))
            .collect()
    }

    /// Whether a provider is in the registry at all, valid or not.
    pub fn is_activated(&self, provider: &ProviderId) -> bool {
        self.providers.contains_key(provider)
    }
}

impl Drop for ProviderRegistry {
    fn drop(&mut self) {
        for entry in self.providers.iter() {
            entry.repository.stop();
            entry.watcher.abort();
        }
    }
}
