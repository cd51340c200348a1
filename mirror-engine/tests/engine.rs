//! End-to-end reconciliation scenarios over in-memory backends.

use mirror_engine::{
    EngineConfig, EngineEvent, EventBus, LocalRepository, ProviderRegistry, Reconciler, Replica,
};
use mirror_store::{manifest_object, open_blob, seal_blob, Backend, MemoryBackend, SealKey};
use mirror_types::{
    DeviceId, FileEventKind, Location, ProviderId, RelativePath, RemoteManifest, SyncSignal,
};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn fast_config() -> EngineConfig {
    EngineConfig::parse(
        r#"
        [lease]
        duration_ms = 400
        grace_ms = 20
        min_contention_delay_ms = 10
        max_contention_delay_ms = 30
        write_retry_delay_ms = 20

        [queue]
        epilogue_delay_ms = 0
        "#,
    )
    .unwrap()
}

struct Rig {
    device: DeviceId,
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    bus: EventBus,
    local: Arc<LocalRepository>,
    registry: Arc<ProviderRegistry>,
    reconciler: Reconciler,
}

impl Rig {
    async fn new() -> Self {
        init_tracing();
        let device = DeviceId::random();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let bus = EventBus::default();
        let local = Arc::new(
            LocalRepository::open(device, &root, bus.clone())
                .await
                .unwrap(),
        );
        let registry = Arc::new(ProviderRegistry::new(device, fast_config(), bus.clone()));
        let reconciler = Reconciler::new(Arc::clone(&local), Arc::clone(&registry), bus.clone());
        Self {
            device,
            _dir: dir,
            root,
            bus,
            local,
            registry,
            reconciler,
        }
    }

    async fn add_provider(&self) -> (ProviderId, MemoryBackend, SealKey) {
        let provider = ProviderId::random();
        let backend = MemoryBackend::new();
        let seal = SealKey::mint();
        self.registry
            .activate(provider, Arc::new(backend.clone()), seal.clone())
            .await
            .unwrap();
        (provider, backend, seal)
    }

    async fn write_and_track(&self, path: &str, content: &[u8]) -> mirror_types::FileRecord {
        let target = RelativePath::new(path).resolve(&self.root);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&target, content).unwrap();
        self.local.track(RelativePath::new(path)).await.unwrap()
    }
}

/// Wait out a deactivated device's lease so another device can claim the
/// provider. Lock objects are never released, only expired.
async fn lease_handoff() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}

/// Read a provider's persisted manifest straight off its backend.
async fn provider_manifest(backend: &MemoryBackend, seal: &SealKey) -> RemoteManifest {
    // The debounced epilogue persists shortly after the last queue item.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let sealed = backend.get(&manifest_object()).await.unwrap();
    RemoteManifest::from_bytes(&open_blob(seal, &sealed).unwrap()).unwrap()
}

fn file_events(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<(FileEventKind, Location)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::File(e) = event {
            out.push((e.kind, e.location));
        }
    }
    out
}

#[tokio::test]
async fn fresh_file_reaches_an_empty_provider_exactly_once() {
    let rig = Rig::new().await;
    let (provider, backend, seal) = rig.add_provider().await;

    let record = rig.write_and_track("notes/f.txt", b"created on device A").await;
    assert_eq!(record.vector.counter(&rig.device), 1);

    let mut rx = rig.bus.subscribe();
    rig.reconciler.run().await;

    // The provider's manifest gained the file at the local vector.
    let manifest = provider_manifest(&backend, &seal).await;
    let stored = manifest.record(&record.id).expect("record on provider");
    assert_eq!(stored.file.vector, record.vector);
    assert_eq!(stored.file.size, record.size);

    // Exactly one created event, on the remote side.
    let events = file_events(&mut rx);
    assert_eq!(
        events,
        vec![(FileEventKind::Created, Location::Remote(provider))]
    );

    // Re-running immediately with no local changes is silent.
    let mut rx = rig.bus.subscribe();
    rig.reconciler.run().await;
    assert!(file_events(&mut rx).is_empty());
}

#[tokio::test]
async fn stale_provider_is_updated_and_current_provider_left_alone() {
    let rig = Rig::new().await;
    let (stale_provider, stale_backend, stale_seal) = rig.add_provider().await;
    let (_current_provider, current_backend, current_seal) = rig.add_provider().await;

    // Both providers learn v1.
    let record = rig.write_and_track("f.txt", b"version one").await;
    rig.reconciler.run().await;

    // The local file moves to v2; only `current` learns about it directly.
    let target = RelativePath::new("f.txt").resolve(&rig.root);
    std::fs::write(&target, b"version two!").unwrap();
    let v2 = rig.local.record_change(&record.id).await.unwrap();
    assert_eq!(v2.vector.counter(&rig.device), 2);

    let current = rig
        .registry
        .currently_active()
        .into_iter()
        .find(|r| r.provider() != stale_provider)
        .unwrap();
    let provenience = mirror_engine::Provenience::new(
        v2.clone(),
        Arc::clone(&rig.local) as Arc<dyn Replica>,
    );
    assert!(current.save(&provenience).await);

    // Reconcile: the stale provider gets one update, the current one none.
    let mut rx = rig.bus.subscribe();
    rig.reconciler.run().await;

    let events = file_events(&mut rx);
    assert_eq!(
        events,
        vec![(FileEventKind::Updated, Location::Remote(stale_provider))]
    );

    let stale_manifest = provider_manifest(&stale_backend, &stale_seal).await;
    assert_eq!(stale_manifest.record(&record.id).unwrap().file.vector, v2.vector);
    let current_manifest = provider_manifest(&current_backend, &current_seal).await;
    assert_eq!(current_manifest.record(&record.id).unwrap().file.vector, v2.vector);
}

#[tokio::test]
async fn remote_file_materializes_locally() {
    // Device A pushes a file to a provider; device B pulls it down.
    let rig_a = Rig::new().await;
    let backend = MemoryBackend::new();
    let seal = SealKey::mint();
    let provider = ProviderId::random();
    rig_a
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();

    let record = rig_a.write_and_track("shared/doc.md", b"# written on A").await;
    rig_a.reconciler.run().await;
    rig_a.registry.deactivate(&provider);
    lease_handoff().await;

    let rig_b = Rig::new().await;
    rig_b
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();

    let mut rx = rig_b.bus.subscribe();
    rig_b.reconciler.run().await;

    let on_disk = std::fs::read(rig_b.root.join("shared/doc.md")).unwrap();
    assert_eq!(on_disk, b"# written on A");

    let events = file_events(&mut rx);
    assert_eq!(events, vec![(FileEventKind::Created, Location::Local)]);

    // B's manifest carries A's vector untouched.
    let manifest = rig_b.local.manifest().await;
    assert_eq!(manifest.record(&record.id).unwrap().file.vector, record.vector);
}

#[tokio::test]
async fn deletion_propagates_as_a_tombstone() {
    let rig = Rig::new().await;
    let (_provider, backend, seal) = rig.add_provider().await;

    let record = rig.write_and_track("doomed.txt", b"delete me").await;
    rig.reconciler.run().await;
    // lock + manifest + content object.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(backend.len(), 3);

    rig.local.record_deletion(&record.id).await.unwrap();
    let mut rx = rig.bus.subscribe();
    rig.reconciler.run().await;

    // The content object is gone; the manifest keeps the tombstone.
    let manifest = provider_manifest(&backend, &seal).await;
    let stored = manifest.record(&record.id).unwrap();
    assert!(stored.file.deleted);
    assert!(stored.object.is_none());
    assert_eq!(backend.len(), 2);

    let events = file_events(&mut rx);
    assert!(events.iter().any(|(kind, location)| {
        *kind == FileEventKind::Deleted && matches!(location, Location::Remote(_))
    }));
}

#[tokio::test]
async fn concurrent_edits_at_equal_device_count_are_left_untouched() {
    // Both devices converge on {A:1, B:1}, then edit concurrently:
    // local {A:2, B:1} vs remote {A:1, B:2}. Neither dominates - the file
    // must not move in either direction.
    let backend = MemoryBackend::new();
    let seal = SealKey::mint();
    let provider = ProviderId::random();

    let rig_a = Rig::new().await;
    rig_a
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();
    let record = rig_a.write_and_track("contested.txt", b"base").await;
    rig_a.reconciler.run().await;
    rig_a.registry.deactivate(&provider);
    lease_handoff().await;

    // B pulls, edits, pushes: provider now carries {A:1, B:1}.
    let rig_b = Rig::new().await;
    rig_b
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();
    rig_b.reconciler.run().await;
    let b_target = rig_b.root.join("contested.txt");
    std::fs::write(&b_target, b"edited on B").unwrap();
    rig_b.local.record_change(&record.id).await.unwrap();
    rig_b.reconciler.run().await;
    rig_b.registry.deactivate(&provider);
    lease_handoff().await;

    // A pulls {A:1, B:1} so both sides share the two-device history.
    rig_a
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();
    rig_a.reconciler.run().await;
    rig_a.registry.deactivate(&provider);
    lease_handoff().await;

    // B edits again and pushes: remote at {A:1, B:2}.
    rig_b
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();
    std::fs::write(&b_target, b"second edit on B").unwrap();
    rig_b.local.record_change(&record.id).await.unwrap();
    rig_b.reconciler.run().await;
    rig_b.registry.deactivate(&provider);
    lease_handoff().await;

    // A edits concurrently: local {A:2, B:1}.
    let a_target = rig_a.root.join("contested.txt");
    std::fs::write(&a_target, b"concurrent edit on A").unwrap();
    rig_a.local.record_change(&record.id).await.unwrap();

    rig_a
        .registry
        .activate(provider, Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();
    let remote_before = provider_manifest(&backend, &seal)
        .await
        .record(&record.id)
        .unwrap()
        .file
        .vector
        .clone();

    let mut rx = rig_a.bus.subscribe();
    rig_a.reconciler.run().await;

    // Conflict: no file events, no movement on either side.
    assert!(file_events(&mut rx).is_empty());
    assert_eq!(std::fs::read(&a_target).unwrap(), b"concurrent edit on A");
    let remote_after = provider_manifest(&backend, &seal)
        .await
        .record(&record.id)
        .unwrap()
        .file
        .vector
        .clone();
    assert_eq!(remote_after, remote_before);
}

#[tokio::test]
async fn sync_signals_bracket_every_run() {
    let rig = Rig::new().await;
    let mut rx = rig.bus.subscribe();

    rig.reconciler.run().await;

    let mut signals = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Sync(s) = event {
            signals.push(s);
        }
    }
    assert_eq!(signals, vec![SyncSignal::Begun, SyncSignal::Done]);
}

#[tokio::test]
async fn ghost_records_never_materialize_locally() {
    let rig = Rig::new().await;
    let backend = MemoryBackend::new();
    let seal = SealKey::mint();

    // Seed the provider with a metadata-only record before activation.
    let ghost_author = DeviceId::random();
    let mut ghost = mirror_types::FileRecord::create(
        &ghost_author,
        RelativePath::new("phantom.txt"),
        [0u8; 32],
        64,
        1_700_000_000_000,
    );
    ghost.ghost = true;
    let mut manifest = RemoteManifest::new();
    manifest.register_device(&ghost_author);
    manifest.upsert(mirror_types::RemoteFileRecord {
        file: ghost.clone(),
        key: mirror_types::FileKey::mint(),
        object: None,
    });
    let sealed = seal_blob(&seal, &manifest.to_bytes().unwrap()).unwrap();
    backend.put(&manifest_object(), &sealed).await.unwrap();

    rig.registry
        .activate(ProviderId::random(), Arc::new(backend.clone()), seal.clone())
        .await
        .unwrap();

    let mut rx = rig.bus.subscribe();
    rig.reconciler.run().await;

    // No local file, no local record, no file events.
    assert!(!rig.root.join("phantom.txt").exists());
    assert!(rig.local.manifest().await.record(&ghost.id).is_none());
    assert!(file_events(&mut rx).is_empty());
}
