//! One remote provider as a replica.
//!
//! Every apply runs inside the provider's write queue, so writes from
//! this device are strictly FIFO per provider. The manifest is acquired
//! through the lease session for the duration of the apply and released
//! on every path; the queue's epilogue persists the manifest back to the
//! backend, debounced.
//!
//! Content leaving the device is compressed, then encrypted under a key
//! minted for this upload; the key travels only inside the sealed
//! manifest and is rotated again on the next update.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::lease::LeaseStatus;
use crate::queue::{Epilogue, WriteQueue};
use crate::repository::{Provenience, Replica};
use crate::session::ManifestSession;
use async_trait::async_trait;
use mirror_core::EpiloguePolicy;
use mirror_store::{open_content, seal_content, Backend, SealKey, StoreError};
use mirror_types::{
    DeviceId, FileEvent, FileEventKind, FileId, FileKey, FileRecord, Location, Progress,
    ProgressTick, ProviderId, RemoteFileRecord, RemoteObjectName, VectorOrdering,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Progress tick granularity for content transfers.
const PROGRESS_CHUNK: u64 = 64 * 1024;

struct RemoteShared {
    provider: ProviderId,
    device: DeviceId,
    backend: Arc<dyn Backend>,
    session: ManifestSession,
    events: EventBus,
    progress_tx: broadcast::Sender<ProgressTick>,
}

/// One remote provider, reached through its write queue.
pub struct RemoteRepository {
    shared: Arc<RemoteShared>,
    queue: WriteQueue<bool>,
}

impl RemoteRepository {
    /// Wire a repository for one provider: lease session, write queue,
    /// and progress channel.
    pub fn new(
        provider: ProviderId,
        device: DeviceId,
        backend: Arc<dyn Backend>,
        seal: SealKey,
        config: &EngineConfig,
        events: EventBus,
    ) -> Arc<Self> {
        let session = ManifestSession::new(
            provider,
            device,
            config.lease.timing(),
            Arc::clone(&backend),
            seal,
        );
        let (progress_tx, _) = broadcast::channel(256);

        let epilogue_session = session.clone();
        let epilogue: Epilogue = Box::new(move || {
            let session = epilogue_session.clone();
            Box::pin(async move {
                if let Err(e) = session.persist().await {
                    tracing::warn!("manifest persist failed: {}", e);
                }
            })
        });
        let queue = WriteQueue::spawn(
            epilogue,
            EpiloguePolicy::new(config.queue.epilogue_delay_ms),
        );

        Arc::new(Self {
            shared: Arc::new(RemoteShared {
                provider,
                device,
                backend,
                session,
                events,
                progress_tx,
            }),
            queue,
        })
    }

    /// The provider this repository targets.
    pub fn provider(&self) -> ProviderId {
        self.shared.provider
    }

    /// Subscribe to this repository's lease status.
    pub fn lease_status(&self) -> tokio::sync::watch::Receiver<LeaseStatus> {
        self.shared.session.lease_status()
    }

    /// Subscribe to this repository's content-transfer progress ticks.
    pub fn progress(&self) -> broadcast::Receiver<ProgressTick> {
        self.shared.progress_tx.subscribe()
    }

    /// Stop the underlying lease keeper.
    pub fn stop(&self) {
        self.shared.session.stop();
    }
}

#[async_trait]
impl Replica for RemoteRepository {
    fn location(&self) -> Location {
        Location::Remote(self.shared.provider)
    }

    async fn records(&self) -> Result<Vec<FileRecord>, EngineError> {
        let handle = self.shared.session.acquire().await?;
        let manifest = handle.manifest().await;
        Ok(manifest.files.values().map(|r| r.file.clone()).collect())
    }

    async fn fetch(&self, id: &FileId) -> Result<Vec<u8>, EngineError> {
        let handle = self.shared.session.acquire().await?;
        let (key, object) = {
            let manifest = handle.manifest().await;
            let Some(record) = manifest.record(id) else {
                return Err(EngineError::UnknownFile {
                    file: id.to_string(),
                });
            };
            (record.key.clone(), record.object.clone())
        };
        let Some(object) = object else {
            return Err(EngineError::Store(StoreError::NotFound {
                object: format!("content of {}", id),
            }));
        };

        let sealed = self.shared.backend.get(&object).await?;
        Ok(open_content(&key, &sealed)?)
    }

    async fn save(&self, source: &Provenience) -> bool {
        let shared = Arc::clone(&self.shared);
        let source = source.clone();
        let receipt = self
            .queue
            .enqueue(Box::pin(async move { apply(shared, source).await }));
        receipt.await.unwrap_or(false)
    }
}

async fn apply(shared: Arc<RemoteShared>, source: Provenience) -> bool {
    match apply_inner(&shared, &source).await {
        Ok(changed) => changed,
        Err(e) => {
            tracing::warn!(
                file = %source.record.id,
                provider = %shared.provider,
                "remote apply failed: {}",
                e
            );
            tick(&shared, source.record.id, Progress::Failed);
            false
        }
    }
}

async fn apply_inner(
    shared: &Arc<RemoteShared>,
    source: &Provenience,
) -> Result<bool, EngineError> {
    let incoming = &source.record;
    let handle = shared.session.acquire().await?;
    let mut manifest = handle.manifest().await;

    let existing = manifest
        .record(&incoming.id)
        .map(|r| (r.file.vector.clone(), r.object.clone()));

    match existing {
        None => {
            // A tombstone for a file this provider never saw: skip.
            if incoming.is_tombstoned() {
                return Ok(false);
            }

            let (object, key) = upload(shared, source, &incoming.id, None).await?;
            manifest.upsert(RemoteFileRecord::new(incoming.clone(), key, object));
            manifest.register_device(&shared.device);
            emit(shared, incoming, FileEventKind::Created);
            Ok(true)
        }
        Some((vector, object)) => {
            if incoming.vector.compare(&vector) != VectorOrdering::Newer {
                return Ok(false);
            }

            if incoming.is_tombstoned() {
                if let Some(object) = &object {
                    shared.backend.delete(object).await?;
                }
                if let Some(record) = manifest.files.get_mut(&incoming.id) {
                    record.file = incoming.clone();
                    record.object = None;
                }
                let kind = if incoming.deleted {
                    FileEventKind::Deleted
                } else {
                    FileEventKind::Removed
                };
                emit(shared, incoming, kind);
                return Ok(true);
            }

            let (object, key) = upload(shared, source, &incoming.id, object).await?;
            if let Some(record) = manifest.files.get_mut(&incoming.id) {
                record.file = incoming.clone();
                record.key = key;
                record.object = Some(object);
            }
            emit(shared, incoming, FileEventKind::Updated);
            Ok(true)
        }
    }
}

/// Pull content from its origin, pipe it through compress→encrypt under a
/// freshly minted key, and upload it - overwriting `existing` when the
/// provider already assigned an object name. Emits a progress tick every
/// 64 KiB of content piped plus the terminal completed tick.
async fn upload(
    shared: &Arc<RemoteShared>,
    source: &Provenience,
    id: &FileId,
    existing: Option<RemoteObjectName>,
) -> Result<(RemoteObjectName, FileKey), EngineError> {
    let bytes = source.origin.fetch(id).await?;
    tracing::debug!(
        file = %id,
        provider = %shared.provider,
        hash = %hex::encode(source.record.content_hash),
        size = bytes.len(),
        "uploading content"
    );

    let key = FileKey::mint();
    let sealed = seal_content(&key, &bytes)?;

    let total = bytes.len() as u64;
    let mut processed = 0u64;
    while processed < total {
        processed = (processed + PROGRESS_CHUNK).min(total);
        tick(shared, *id, Progress::Bytes(processed));
    }

    let object = match existing {
        Some(object) => {
            shared.backend.put(&object, &sealed).await?;
            object
        }
        None => shared.backend.post(&sealed).await?,
    };
    tick(shared, *id, Progress::Completed);
    Ok((object, key))
}

fn emit(shared: &Arc<RemoteShared>, record: &FileRecord, kind: FileEventKind) {
    shared.events.publish(EngineEvent::File(FileEvent {
        file_id: record.id,
        path: record.path.clone(),
        kind,
        location: Location::Remote(shared.provider),
    }));
}

fn tick(shared: &Arc<RemoteShared>, file_id: FileId, progress: Progress) {
    let _ = shared.progress_tx.send(ProgressTick {
        file_id,
        provider: shared.provider,
        progress,
    });
}
