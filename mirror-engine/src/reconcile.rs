//! The reconciler: gathers every replica's state, picks winners, and
//! propagates them.
//!
//! One run:
//! 1. Snapshot the currently active providers and collect every replica's
//!    records (each paired with its origin as a [`Provenience`]).
//! 2. Partition per-file groups into conflicting and coherent
//!    (mirror-core planning); conflicting files are logged and left
//!    untouched for manual resolution.
//! 3. Apply winners to the local replica one file at a time, skipping
//!    versions that are already local and ghost records (metadata-only,
//!    nothing to materialize).
//! 4. Fan winners out to every active provider in parallel; within one
//!    provider the write queue serializes the saves. A ghost winner keeps
//!    its original remote origin.
//!
//! Runs coalesce: triggering during a run queues exactly one follow-up
//! run, and any further triggers during that window collapse into it.

use crate::events::{EngineEvent, EventBus};
use crate::registry::ProviderRegistry;
use crate::repository::{LocalRepository, Provenience, Replica};
use futures_util::future::join_all;
use mirror_types::{FileId, SyncSignal, VersionVector};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RunState {
    running: bool,
    pending: bool,
}

/// Drives reconciliation runs across the local replica and all active
/// providers.
pub struct Reconciler {
    local: Arc<LocalRepository>,
    registry: Arc<ProviderRegistry>,
    events: EventBus,
    state: Mutex<RunState>,
}

impl Reconciler {
    /// Create a reconciler over the local replica and the provider
    /// registry.
    pub fn new(
        local: Arc<LocalRepository>,
        registry: Arc<ProviderRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            local,
            registry,
            events,
            state: Mutex::new(RunState::default()),
        }
    }

    /// Trigger reconciliation.
    ///
    /// If a run is already in progress this queues exactly one follow-up
    /// run and returns immediately; the in-progress caller performs it.
    /// Otherwise the call performs the run (and any follow-up queued
    /// while it worked) before returning.
    pub async fn run(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.running {
                state.pending = true;
                return;
            }
            state.running = true;
        }

        loop {
            self.run_once().await;

            let mut state = self.state.lock().unwrap();
            if state.pending {
                state.pending = false;
                // Keep `running` set and go again.
            } else {
                state.running = false;
                return;
            }
        }
    }

    async fn run_once(&self) {
        self.events.publish(EngineEvent::Sync(SyncSignal::Begun));

        // Gather every replica's records. A provider whose manifest cannot
        // be acquired this cycle is skipped entirely - both as a source
        // and as a fan-out target.
        let mut groups: BTreeMap<FileId, Vec<Provenience>> = BTreeMap::new();

        match self.local.records().await {
            Ok(records) => {
                let origin = Arc::clone(&self.local) as Arc<dyn Replica>;
                for record in records {
                    groups
                        .entry(record.id)
                        .or_default()
                        .push(Provenience::new(record, Arc::clone(&origin)));
                }
            }
            Err(e) => tracing::warn!("local snapshot failed: {}", e),
        }

        let mut targets = Vec::new();
        for repository in self.registry.currently_active() {
            match repository.records().await {
                Ok(records) => {
                    let origin = Arc::clone(&repository) as Arc<dyn Replica>;
                    for record in records {
                        groups
                            .entry(record.id)
                            .or_default()
                            .push(Provenience::new(record, Arc::clone(&origin)));
                    }
                    targets.push(repository);
                }
                Err(e) => {
                    tracing::warn!(provider = %repository.provider(), "skipping provider: {}", e);
                }
            }
        }

        let vectors: BTreeMap<FileId, Vec<VersionVector>> = groups
            .iter()
            .map(|(id, group)| {
                (
                    *id,
                    group.iter().map(|p| p.record.vector.clone()).collect(),
                )
            })
            .collect();
        let plan = mirror_core::plan(&vectors);

        for id in &plan.conflicts {
            tracing::warn!(file = %id, "concurrent versions detected, leaving for manual resolution");
        }

        let winners: Vec<Provenience> = plan
            .winners
            .iter()
            .filter_map(|(id, index)| groups.get(id).and_then(|g| g.get(*index)).cloned())
            .collect();

        // Local apply: strictly sequential, one file at a time.
        for winner in &winners {
            if winner.is_local() || winner.record.ghost {
                continue;
            }
            self.local.save(winner).await;
        }

        // Remote fan-out: providers in parallel, files serialized within
        // each provider by its write queue. Each winner travels with its
        // own origin; a ghost keeps the remote source it was read from.
        let fan_out = targets.iter().map(|repository| {
            let winners = winners.clone();
            async move {
                for winner in &winners {
                    repository.save(winner).await;
                }
            }
        });
        join_all(fan_out).await;

        self.events.publish(EngineEvent::Sync(SyncSignal::Done));
    }
}
