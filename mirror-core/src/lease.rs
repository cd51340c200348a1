//! Lease state machine for per-provider mutual exclusion.
//!
//! This module provides a pure, side-effect-free state machine for the
//! lease protocol over a provider's shared lock object. The machine takes
//! events as input and produces a new state plus a list of actions to
//! execute.
//!
//! The actual I/O (lock fetches, lock writes, timers) is performed by
//! mirror-engine, not by this module. Wall-clock time enters only as the
//! `now_ms` field on fetch events, so tests never sleep.
//!
//! Protocol, one attempt cycle:
//! 1. Fetch the lock object ("not found" is an unset lock).
//! 2. Unset, expired, or already mine: write a claim ending
//!    `duration_ms` from now. Held by someone else: back off for their
//!    remaining time plus jitter, then start over.
//! 3. Write failed: back off a fixed delay, then start over.
//! 4. Write succeeded: wait out a grace period, re-fetch, and only if the
//!    re-read still shows this device as owner emit availability and arm
//!    the expiry timer.
//! 5. Expiry timer fired: renew if the caller still has work in flight,
//!    otherwise emit expiry and stop until restarted.

use crate::backoff::contention_delay;
use mirror_types::{DeviceId, Lease};

/// Timing parameters of the lease protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    /// Total claim duration written into the lock object.
    pub duration_ms: u64,
    /// Grace period between a successful write and the confirming re-read.
    pub grace_ms: u64,
    /// Lower bound of the contention jitter window.
    pub min_contention_delay_ms: u64,
    /// Upper bound of the contention jitter window.
    pub max_contention_delay_ms: u64,
    /// Fixed delay before retrying after a failed lock write.
    pub write_retry_delay_ms: u64,
}

impl LeaseTiming {
    /// How long a confirmed claim is held before the expiry check:
    /// the claim duration minus the grace period already spent.
    pub fn hold_ms(&self) -> u64 {
        self.duration_ms.saturating_sub(self.grace_ms)
    }
}

/// Lease protocol state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// Not running. The initial state, and the state after `Stop`.
    Idle,
    /// Initial lock fetch in flight.
    Fetching,
    /// Claim write in flight.
    Writing {
        /// The claim being written.
        target: Lease,
    },
    /// Claim written; grace period running before the confirming re-read.
    Grace {
        /// The claim that was written.
        written: Lease,
    },
    /// Confirming re-read in flight.
    Confirming,
    /// Claim confirmed; availability emitted; expiry timer running.
    Held {
        /// The confirmed claim.
        lease: Lease,
    },
    /// Waiting out a contention or write-failure delay before retrying.
    Backoff,
    /// Renewal write in flight while the session stays available.
    Renewing {
        /// The renewed claim being written.
        target: Lease,
    },
    /// The session ended without renewal. Terminal until restarted.
    Expired,
}

impl LeaseState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller
    /// (mirror-engine) is responsible for executing the returned actions.
    pub fn on_event(
        self,
        device: &DeviceId,
        timing: &LeaseTiming,
        event: LeaseEvent,
    ) -> (Self, Vec<LeaseAction>) {
        match (self, event) {
            // From Idle
            (Self::Idle, LeaseEvent::Start) => (Self::Fetching, vec![LeaseAction::FetchLock]),

            // From Fetching: decide the target lock value.
            (Self::Fetching, LeaseEvent::LockFetched { lease, now_ms }) => {
                match lease {
                    // Unset or expired: claim it. Already mine: renew it.
                    None => claim(device, timing, now_ms),
                    Some(found) if found.is_expired(now_ms) || found.owner == *device => {
                        claim(device, timing, now_ms)
                    }
                    // Held by someone else: back off past their expiry.
                    Some(found) => {
                        let delay = contention_delay(
                            found.remaining_ms(now_ms),
                            timing.min_contention_delay_ms,
                            timing.max_contention_delay_ms,
                        );
                        (
                            Self::Backoff,
                            vec![
                                LeaseAction::EmitUnavailable,
                                LeaseAction::StartBackoffTimer { delay_ms: delay },
                            ],
                        )
                    }
                }
            }

            // From Writing
            (Self::Writing { target }, LeaseEvent::WriteFinished { ok: true }) => (
                Self::Grace { written: target },
                vec![LeaseAction::StartGraceTimer {
                    delay_ms: timing.grace_ms,
                }],
            ),
            (Self::Writing { .. }, LeaseEvent::WriteFinished { ok: false }) => (
                Self::Backoff,
                vec![
                    LeaseAction::EmitUnavailable,
                    LeaseAction::StartBackoffTimer {
                        delay_ms: timing.write_retry_delay_ms,
                    },
                ],
            ),

            // From Grace
            (Self::Grace { .. }, LeaseEvent::GraceElapsed) => {
                (Self::Confirming, vec![LeaseAction::FetchLock])
            }

            // From Confirming: only a re-read that still shows this device
            // as a live owner makes the session available.
            (Self::Confirming, LeaseEvent::LockFetched { lease, now_ms }) => match lease {
                Some(found) if found.held_by(device, now_ms) => (
                    Self::Held { lease: found },
                    vec![
                        LeaseAction::EmitAvailable,
                        LeaseAction::StartExpiryTimer {
                            delay_ms: timing.hold_ms(),
                        },
                    ],
                ),
                _ => (
                    Self::Fetching,
                    vec![LeaseAction::EmitUnavailable, LeaseAction::FetchLock],
                ),
            },

            // From Held: the expiry timer fired. The engine has already
            // asked the caller whether work is still in flight.
            (Self::Held { .. }, LeaseEvent::ExpiryElapsed {
                extend: true,
                now_ms,
            }) => {
                let target = Lease::claim(*device, now_ms, timing.duration_ms);
                (
                    Self::Renewing { target },
                    vec![LeaseAction::WriteLock(target)],
                )
            }
            (Self::Held { .. }, LeaseEvent::ExpiryElapsed { extend: false, .. }) => {
                (Self::Expired, vec![LeaseAction::EmitExpired])
            }

            // From Renewing: a successful renewal re-arms the expiry timer
            // without another grace/confirm round; the session never left
            // availability. A failed renewal degrades like any failed write.
            (Self::Renewing { target }, LeaseEvent::WriteFinished { ok: true }) => (
                Self::Held { lease: target },
                vec![LeaseAction::StartExpiryTimer {
                    delay_ms: timing.hold_ms(),
                }],
            ),
            (Self::Renewing { .. }, LeaseEvent::WriteFinished { ok: false }) => (
                Self::Backoff,
                vec![
                    LeaseAction::EmitUnavailable,
                    LeaseAction::StartBackoffTimer {
                        delay_ms: timing.write_retry_delay_ms,
                    },
                ],
            ),

            // From Backoff
            (Self::Backoff, LeaseEvent::BackoffElapsed) => {
                (Self::Fetching, vec![LeaseAction::FetchLock])
            }

            // Stop halts scheduling from any state.
            (_, LeaseEvent::Stop) => (Self::Idle, vec![]),

            // A fresh Start restarts the protocol after expiry.
            (Self::Expired, LeaseEvent::Start) => (Self::Fetching, vec![LeaseAction::FetchLock]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the session is currently available.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Held { .. } | Self::Renewing { .. })
    }

    /// Check if the machine is between Start and a terminal state.
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Idle | Self::Expired)
    }
}

impl Default for LeaseState {
    fn default() -> Self {
        Self::new()
    }
}

fn claim(
    device: &DeviceId,
    timing: &LeaseTiming,
    now_ms: u64,
) -> (LeaseState, Vec<LeaseAction>) {
    let target = Lease::claim(*device, now_ms, timing.duration_ms);
    (
        LeaseState::Writing { target },
        vec![LeaseAction::WriteLock(target)],
    )
}

/// Events that can occur in the lease protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent {
    /// The caller wants the provider's manifest.
    Start,
    /// A lock fetch completed. "Not found" arrives as `lease: None`.
    LockFetched {
        /// The lock object's current value, if any.
        lease: Option<Lease>,
        /// Wall clock at the fetch, milliseconds since the Unix epoch.
        now_ms: u64,
    },
    /// A lock write completed, successfully or not.
    WriteFinished {
        /// Whether the backend reported success.
        ok: bool,
    },
    /// The post-write grace period elapsed.
    GraceElapsed,
    /// The contention/write-failure backoff elapsed.
    BackoffElapsed,
    /// The expiry timer fired while the session was available.
    ExpiryElapsed {
        /// Whether the caller still has work in flight and wants the
        /// session extended.
        extend: bool,
        /// Wall clock at the timer, milliseconds since the Unix epoch.
        now_ms: u64,
    },
    /// The caller stopped observing; halt scheduling of further retries.
    Stop,
}

/// Actions to be executed by mirror-engine.
///
/// These are instructions, not side effects. The engine interprets them
/// and performs the actual I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseAction {
    /// Fetch the provider's lock object.
    FetchLock,
    /// Write this claim to the provider's lock object.
    WriteLock(Lease),
    /// Arm the post-write grace timer.
    StartGraceTimer {
        /// Timer duration.
        delay_ms: u64,
    },
    /// Arm the contention/write-failure backoff timer.
    StartBackoffTimer {
        /// Timer duration.
        delay_ms: u64,
    },
    /// Arm the session expiry timer.
    StartExpiryTimer {
        /// Timer duration.
        delay_ms: u64,
    },
    /// Tell observers the manifest is safe to use.
    EmitAvailable,
    /// Tell observers this attempt cycle yielded no access.
    EmitUnavailable,
    /// Tell observers the session ended; a fresh Start is required.
    EmitExpired,
}
