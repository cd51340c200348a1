//! # mirror-core
//!
//! Pure logic for vaultmirror (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms of the
//! synchronizer without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce
//! output without side effects. Wall-clock time only ever enters as a
//! `now_ms` parameter on events. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (backend calls, timers) is performed by `mirror-engine`,
//! which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod epilogue;
pub mod lease;
pub mod reconcile;

pub use backoff::contention_delay;
pub use epilogue::EpiloguePolicy;
pub use lease::{LeaseAction, LeaseEvent, LeaseState, LeaseTiming};
pub use reconcile::{has_conflict, plan, winner_index, ReconcilePlan};
