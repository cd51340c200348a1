//! Version vectors for causal ordering of file updates.
//!
//! Every tracked file carries a [`VersionVector`]: one monotonically
//! increasing counter per device that has ever updated it. Comparing two
//! vectors tells a replica whether one version descends from the other or
//! whether the two were produced concurrently.

use crate::DeviceId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Outcome of comparing two version vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOrdering {
    /// Both vectors describe the same update history.
    Equal,
    /// Self descends from other.
    Newer,
    /// Other descends from self.
    Older,
    /// Concurrent updates - neither descends from the other.
    Conflict,
}

impl VectorOrdering {
    /// The same comparison seen from the other vector's side.
    pub fn reversed(self) -> Self {
        match self {
            Self::Newer => Self::Older,
            Self::Older => Self::Newer,
            other => other,
        }
    }
}

/// Causal update history of one file: a counter per originating device.
///
/// Counters only ever increase. The vector is never trimmed - a device that
/// touched the file once stays represented forever.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionVector {
    counters: BTreeMap<DeviceId, u64>,
}

impl VersionVector {
    /// Create an empty vector (no updates recorded yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update originating at `device`.
    ///
    /// Creates the device's counter at zero first if it was absent, then
    /// increments it. Always moves the history forward.
    pub fn increment(&mut self, device: &DeviceId) {
        let counter = self.counters.entry(*device).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// The counter for one device, zero if the device never updated the file.
    pub fn counter(&self, device: &DeviceId) -> u64 {
        self.counters.get(device).copied().unwrap_or(0)
    }

    /// Number of distinct devices represented in this vector.
    pub fn device_count(&self) -> usize {
        self.counters.len()
    }

    /// Compare two update histories.
    ///
    /// Compatibility note: when the two vectors represent a different number
    /// of distinct devices, the result is decided by that cardinality alone -
    /// the larger device set counts as `Newer` without checking per-counter
    /// dominance. This can classify genuinely concurrent histories as
    /// ordered when one replica has simply seen more devices; it is kept
    /// because deployed replicas decide winners this way, and changing it
    /// unilaterally would make devices disagree on winners.
    ///
    /// At equal device counts the comparison is canonical: mismatched device
    /// sets are a conflict, otherwise per-counter dominance decides, with
    /// mutual strict-greater counters meaning concurrent updates.
    pub fn compare(&self, other: &VersionVector) -> VectorOrdering {
        match self.counters.len().cmp(&other.counters.len()) {
            Ordering::Greater => return VectorOrdering::Newer,
            Ordering::Less => return VectorOrdering::Older,
            Ordering::Equal => {}
        }

        // Equal device counts: any key mismatch means divergent histories.
        if !self
            .counters
            .keys()
            .all(|device| other.counters.contains_key(device))
        {
            return VectorOrdering::Conflict;
        }

        let mut newer = false;
        let mut older = false;
        for (device, mine) in &self.counters {
            let Some(theirs) = other.counters.get(device) else {
                return VectorOrdering::Conflict;
            };
            match mine.cmp(theirs) {
                Ordering::Greater => newer = true,
                Ordering::Less => older = true,
                Ordering::Equal => {}
            }
        }

        match (newer, older) {
            (true, true) => VectorOrdering::Conflict,
            (true, false) => VectorOrdering::Newer,
            (false, true) => VectorOrdering::Older,
            (false, false) => VectorOrdering::Equal,
        }
    }

    /// Iterate over `(device, counter)` pairs in device order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &u64)> {
        self.counters.iter()
    }
}
