//! Drives the pure lease state machine against a real backend.
//!
//! The [`LeaseKeeper`] owns one driver task per provider. The task feeds
//! events into [`mirror_core::LeaseState`] and interprets the returned
//! actions: lock fetches and writes against the backend, grace/backoff/
//! expiry waits as tokio timers, and availability transitions as values on
//! a watch channel.
//!
//! Stopping the keeper halts scheduling of further retries; an operation
//! already started runs to completion (correctness is restored by the next
//! reconciliation pass, not by aborting in-flight I/O).

use crate::time::now_ms;
use mirror_core::{LeaseAction, LeaseEvent, LeaseState, LeaseTiming};
use mirror_store::{lock_object, open_blob, seal_blob, Backend, SealKey, StoreError};
use mirror_types::{DeviceId, Lease};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Externally visible lease session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    /// An attempt cycle is in flight; no verdict yet.
    Starting,
    /// The claim is confirmed; the manifest is safe to use.
    Available,
    /// This attempt cycle yielded no access; a retry is scheduled.
    Unavailable,
    /// The session ended without renewal; a fresh acquire restarts it.
    Expired,
    /// A protocol error other than "not found" ended the attempt.
    Error,
}

/// Asks the caller whether the session should be extended at expiry.
pub type ShouldExtend = Arc<dyn Fn() -> bool + Send + Sync>;

struct KeeperShared {
    device: DeviceId,
    timing: LeaseTiming,
    backend: Arc<dyn Backend>,
    seal: SealKey,
    should_extend: ShouldExtend,
    status_tx: watch::Sender<LeaseStatus>,
    restart: Notify,
    stop: Notify,
    stopped: AtomicBool,
}

/// Per-provider lease driver.
pub struct LeaseKeeper {
    shared: Arc<KeeperShared>,
}

impl LeaseKeeper {
    /// Spawn the driver task. The protocol does not start until the first
    /// [`LeaseKeeper::ensure_running`] call.
    pub fn spawn(
        device: DeviceId,
        timing: LeaseTiming,
        backend: Arc<dyn Backend>,
        seal: SealKey,
        should_extend: ShouldExtend,
    ) -> Self {
        let (status_tx, _) = watch::channel(LeaseStatus::Starting);
        let shared = Arc::new(KeeperShared {
            device,
            timing,
            backend,
            seal,
            should_extend,
            status_tx,
            restart: Notify::new(),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
        });
        tokio::spawn(drive(Arc::clone(&shared)));
        Self { shared }
    }

    /// Subscribe to session status transitions.
    pub fn status(&self) -> watch::Receiver<LeaseStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Start the protocol, or restart it after expiry or error. Idempotent
    /// while a protocol run is in flight.
    pub fn ensure_running(&self) {
        self.shared.restart.notify_one();
    }

    /// Halt scheduling of further retries. In-flight backend calls finish.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.stop.notify_waiters();
        self.shared.restart.notify_one();
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of one protocol run.
enum RunEnd {
    Expired,
    Error,
    Stopped,
}

async fn drive(shared: Arc<KeeperShared>) {
    loop {
        // Wait for the first acquire (or a restart after expiry/error).
        shared.restart.notified().await;
        if shared.stopped.load(Ordering::SeqCst) {
            return;
        }
        match run_protocol(&shared).await {
            RunEnd::Stopped => return,
            RunEnd::Expired | RunEnd::Error => continue,
        }
    }
}

async fn run_protocol(shared: &KeeperShared) -> RunEnd {
    shared.status_tx.send_replace(LeaseStatus::Starting);

    let mut state = LeaseState::new();
    let mut event = LeaseEvent::Start;

    loop {
        let (next, actions) = state.on_event(&shared.device, &shared.timing, event);
        state = next;

        let mut next_event = None;
        for action in actions {
            match action {
                LeaseAction::FetchLock => match fetch_lock(shared).await {
                    Ok(lease) => {
                        next_event = Some(LeaseEvent::LockFetched {
                            lease,
                            now_ms: now_ms(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!("lock fetch failed: {}", e);
                        shared.status_tx.send_replace(LeaseStatus::Error);
                        return RunEnd::Error;
                    }
                },
                LeaseAction::WriteLock(lease) => {
                    let ok = match write_lock(shared, &lease).await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!("lock write failed: {}", e);
                            false
                        }
                    };
                    next_event = Some(LeaseEvent::WriteFinished { ok });
                }
                LeaseAction::StartGraceTimer { delay_ms } => {
                    if !sleep_unless_stopped(shared, delay_ms).await {
                        return RunEnd::Stopped;
                    }
                    next_event = Some(LeaseEvent::GraceElapsed);
                }
                LeaseAction::StartBackoffTimer { delay_ms } => {
                    if !sleep_unless_stopped(shared, delay_ms).await {
                        return RunEnd::Stopped;
                    }
                    next_event = Some(LeaseEvent::BackoffElapsed);
                }
                LeaseAction::StartExpiryTimer { delay_ms } => {
                    if !sleep_unless_stopped(shared, delay_ms).await {
                        return RunEnd::Stopped;
                    }
                    next_event = Some(LeaseEvent::ExpiryElapsed {
                        extend: (shared.should_extend)(),
                        now_ms: now_ms(),
                    });
                }
                LeaseAction::EmitAvailable => {
                    tracing::debug!(device = %shared.device, "lease available");
                    shared.status_tx.send_replace(LeaseStatus::Available);
                }
                LeaseAction::EmitUnavailable => {
                    shared.status_tx.send_replace(LeaseStatus::Unavailable);
                }
                LeaseAction::EmitExpired => {
                    tracing::debug!(device = %shared.device, "lease expired");
                    shared.status_tx.send_replace(LeaseStatus::Expired);
                }
            }
        }

        match next_event {
            Some(e) => event = e,
            // No follow-up event: the machine reached a terminal state.
            None => return RunEnd::Expired,
        }
        if shared.stopped.load(Ordering::SeqCst) {
            return RunEnd::Stopped;
        }
    }
}

/// Fetch and open the lock object. "Not found" is an unset lock, not an
/// error.
async fn fetch_lock(shared: &KeeperShared) -> Result<Option<Lease>, StoreError> {
    match shared.backend.get(&lock_object()).await {
        Ok(sealed) => {
            let bytes = open_blob(&shared.seal, &sealed)?;
            let lease = Lease::from_bytes(&bytes)
                .map_err(|e| StoreError::Crypto(format!("corrupt lock object: {}", e)))?;
            Ok(Some(lease))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn write_lock(shared: &KeeperShared, lease: &Lease) -> Result<(), StoreError> {
    let bytes = lease
        .to_bytes()
        .map_err(|e| StoreError::Crypto(format!("encode lock object: {}", e)))?;
    let sealed = seal_blob(&shared.seal, &bytes)?;
    shared.backend.put(&lock_object(), &sealed).await
}

/// Sleep for `delay_ms`; returns false if the keeper was stopped first.
async fn sleep_unless_stopped(shared: &KeeperShared, delay_ms: u64) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        _ = shared.stop.notified() => false,
    }
}
