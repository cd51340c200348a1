//! The local replica: the device's own file tree plus its manifest.
//!
//! The local manifest is mutated only by this device, so no lease guards
//! it; it persists to a sidecar blob under the root. Applying a remote
//! version stages the content to a temp file first and renames it into
//! place, so a crash mid-apply never leaves a half-written file at the
//! target path.

use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::repository::{Provenience, Replica};
use crate::time::now_ms;
use async_trait::async_trait;
use filetime::FileTime;
use mirror_store::content_hash;
use mirror_types::{
    DeviceId, FileEvent, FileEventKind, FileId, FileRecord, LocalFileRecord, LocalManifest,
    Location, RelativePath, VectorOrdering,
};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Directory under the root holding the sidecar manifest.
const STATE_DIR: &str = ".vaultmirror";
/// Sidecar manifest file name.
const MANIFEST_FILE: &str = "manifest";

/// The local replica.
pub struct LocalRepository {
    device: DeviceId,
    root: PathBuf,
    manifest: Mutex<LocalManifest>,
    events: EventBus,
}

impl LocalRepository {
    /// Open the repository at `root`, loading the sidecar manifest if one
    /// exists.
    pub async fn open(
        device: DeviceId,
        root: impl Into<PathBuf>,
        events: EventBus,
    ) -> Result<Self, EngineError> {
        let root = root.into();
        let manifest_path = root.join(STATE_DIR).join(MANIFEST_FILE);
        let manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => LocalManifest::from_bytes(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalManifest::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            device,
            root,
            manifest: Mutex::new(manifest),
            events,
        })
    }

    /// The device that owns this replica.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Start tracking the file at `path`.
    ///
    /// Fails with [`EngineError::AlreadyManaged`] if a live record already
    /// exists for the path. A tombstoned record at the same path does not
    /// block re-tracking; the file gets a fresh identity.
    pub async fn track(&self, path: RelativePath) -> Result<FileRecord, EngineError> {
        let mut manifest = self.manifest.lock().await;
        if let Some(existing) = manifest.record_at(&path) {
            if !existing.file.is_tombstoned() {
                return Err(EngineError::AlreadyManaged {
                    path: path.to_string(),
                });
            }
        }

        let target = path.resolve(&self.root);
        let bytes = tokio::fs::read(&target).await?;
        let modified_ms = file_mtime_ms(&target).await?;
        let record = FileRecord::create(
            &self.device,
            path,
            content_hash(&bytes),
            bytes.len() as u64,
            modified_ms,
        );
        manifest.upsert(LocalFileRecord::new(record.clone()));
        self.persist(&manifest).await?;
        tracing::info!(file = %record.id, path = %record.path, "tracking file");
        Ok(record)
    }

    /// Record a local edit of a tracked file: re-hash the content and move
    /// the version history forward.
    pub async fn record_change(&self, id: &FileId) -> Result<FileRecord, EngineError> {
        let mut manifest = self.manifest.lock().await;
        let Some(existing) = manifest.record(id) else {
            return Err(EngineError::UnknownFile {
                file: id.to_string(),
            });
        };
        let mut record = existing.file.clone();

        let target = record.path.resolve(&self.root);
        let bytes = tokio::fs::read(&target).await?;
        let modified_ms = file_mtime_ms(&target).await?;
        record.record_change(
            &self.device,
            content_hash(&bytes),
            bytes.len() as u64,
            modified_ms,
        );

        manifest.upsert(LocalFileRecord::new(record.clone()));
        self.persist(&manifest).await?;
        Ok(record)
    }

    /// Remember a remote provider registered on this device.
    pub async fn register_provider(&self, provider: mirror_types::ProviderId) -> Result<(), EngineError> {
        let mut manifest = self.manifest.lock().await;
        if manifest.providers.insert(provider) {
            self.persist(&manifest).await?;
        }
        Ok(())
    }

    /// Remember a folder under the root as tracked.
    pub async fn track_root(&self, root: RelativePath) -> Result<(), EngineError> {
        let mut manifest = self.manifest.lock().await;
        if manifest.roots.insert(root) {
            self.persist(&manifest).await?;
        }
        Ok(())
    }

    /// Tombstone a tracked file as deleted on disk.
    pub async fn record_deletion(&self, id: &FileId) -> Result<FileRecord, EngineError> {
        self.tombstone(id, FileEventKind::Deleted).await
    }

    /// Tombstone a tracked file as removed from tracking.
    pub async fn record_removal(&self, id: &FileId) -> Result<FileRecord, EngineError> {
        self.tombstone(id, FileEventKind::Removed).await
    }

    async fn tombstone(
        &self,
        id: &FileId,
        kind: FileEventKind,
    ) -> Result<FileRecord, EngineError> {
        let mut manifest = self.manifest.lock().await;
        let Some(existing) = manifest.record(id) else {
            return Err(EngineError::UnknownFile {
                file: id.to_string(),
            });
        };
        let mut record = existing.file.clone();
        match kind {
            FileEventKind::Deleted => record.mark_deleted(&self.device, now_ms()),
            _ => record.mark_removed(&self.device, now_ms()),
        }
        manifest.upsert(LocalFileRecord::new(record.clone()));
        self.persist(&manifest).await?;
        Ok(record)
    }

    /// Snapshot of the manifest (tests and diagnostics).
    pub async fn manifest(&self) -> LocalManifest {
        self.manifest.lock().await.clone()
    }

    async fn persist(&self, manifest: &LocalManifest) -> Result<(), EngineError> {
        let dir = self.root.join(STATE_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest.to_bytes()?).await?;
        Ok(())
    }

    fn emit(&self, record: &FileRecord, kind: FileEventKind) {
        self.events.publish(EngineEvent::File(FileEvent {
            file_id: record.id,
            path: record.path.clone(),
            kind,
            location: Location::Local,
        }));
    }

    /// Apply one incoming version. See the trait method for semantics;
    /// this is the fallible body.
    async fn apply(&self, source: &Provenience) -> Result<bool, EngineError> {
        let incoming = &source.record;
        let mut manifest = self.manifest.lock().await;

        let existing = manifest.record(&incoming.id).map(|r| r.file.clone());
        let Some(existing) = existing else {
            return self.apply_new(source, &mut manifest).await;
        };

        if incoming.vector.compare(&existing.vector) != VectorOrdering::Newer {
            return Ok(false);
        }

        let existing_path = existing.path;
        if incoming.is_tombstoned() {
            // Adopt the tombstone. A deletion also removes the bytes; a
            // plain removal leaves them in place, untracked.
            let kind = if incoming.deleted {
                let target = existing_path.resolve(&self.root);
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                FileEventKind::Deleted
            } else {
                FileEventKind::Removed
            };
            manifest.upsert(LocalFileRecord::new(incoming.clone()));
            self.persist(&manifest).await?;
            self.emit(incoming, kind);
            return Ok(true);
        }

        // Strictly newer live content: stream, stage, replace in place.
        let bytes = source.origin.fetch(&incoming.id).await?;
        let target = incoming.path.resolve(&self.root);
        stage_and_place(&target, &bytes, incoming.modified_ms).await?;
        manifest.upsert(LocalFileRecord::new(incoming.clone()));
        self.persist(&manifest).await?;
        self.emit(incoming, FileEventKind::Updated);
        Ok(true)
    }

    async fn apply_new(
        &self,
        source: &Provenience,
        manifest: &mut LocalManifest,
    ) -> Result<bool, EngineError> {
        let incoming = &source.record;

        // A tombstone for a file never seen here has nothing to do.
        if incoming.is_tombstoned() {
            return Ok(false);
        }

        let target = incoming.path.resolve(&self.root);
        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                tracing::warn!(path = %incoming.path, "target occupied by a directory, rejecting");
                return Ok(false);
            }
            Ok(meta) if meta.len() == incoming.size => {
                // Same size at the target path: assume it is the same
                // content and adopt metadata without copying bytes.
                manifest.upsert(LocalFileRecord::new(incoming.clone()));
                self.persist(manifest).await?;
                self.emit(incoming, FileEventKind::Created);
                return Ok(true);
            }
            Ok(_) | Err(_) => {}
        }

        let bytes = source.origin.fetch(&incoming.id).await?;
        stage_and_place(&target, &bytes, incoming.modified_ms).await?;
        manifest.upsert(LocalFileRecord::new(incoming.clone()));
        self.persist(manifest).await?;
        self.emit(incoming, FileEventKind::Created);
        Ok(true)
    }
}

#[async_trait]
impl Replica for LocalRepository {
    fn location(&self) -> Location {
        Location::Local
    }

    async fn records(&self) -> Result<Vec<FileRecord>, EngineError> {
        let manifest = self.manifest.lock().await;
        Ok(manifest.files.values().map(|r| r.file.clone()).collect())
    }

    async fn fetch(&self, id: &FileId) -> Result<Vec<u8>, EngineError> {
        let path = {
            let manifest = self.manifest.lock().await;
            let Some(record) = manifest.record(id) else {
                return Err(EngineError::UnknownFile {
                    file: id.to_string(),
                });
            };
            record.file.path.resolve(&self.root)
        };
        Ok(tokio::fs::read(&path).await?)
    }

    async fn save(&self, source: &Provenience) -> bool {
        match self.apply(source).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(file = %source.record.id, "local apply failed: {}", e);
                false
            }
        }
    }
}

/// Write `bytes` to a temp file next to `target`, rename it into place,
/// and restore the modification time. The temp file never survives.
async fn stage_and_place(target: &Path, bytes: &[u8], modified_ms: u64) -> Result<(), EngineError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = target.with_extension(format!("staging.{}", uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staging, target).await?;
        Ok::<(), EngineError>(())
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to clean up staging file: {}", e);
            }
        }
        return result;
    }

    let mtime = FileTime::from_unix_time(
        (modified_ms / 1_000) as i64,
        ((modified_ms % 1_000) * 1_000_000) as u32,
    );
    filetime::set_file_mtime(target, mtime).map_err(EngineError::Io)?;
    Ok(())
}

/// Modification time of a file in milliseconds since the Unix epoch.
async fn file_mtime_ms(path: &Path) -> Result<u64, EngineError> {
    let meta = tokio::fs::metadata(path).await?;
    let mtime = FileTime::from_last_modification_time(&meta);
    let ms = mtime.unix_seconds().max(0) as u64 * 1_000 + u64::from(mtime.nanoseconds()) / 1_000_000;
    Ok(ms)
}
