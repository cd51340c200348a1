//! Reconciliation planning: conflict partitioning and winner selection.
//!
//! Given every replica's version of every file, decide per file which
//! replica's version wins and which files are in conflict. Conflicting
//! files are left untouched for manual resolution - concurrent histories
//! are detected, never auto-resolved.

use mirror_types::{FileId, VectorOrdering, VersionVector};
use std::collections::BTreeMap;

/// The outcome of planning one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcilePlan {
    /// Per coherent file: the index of the winning entry in that file's
    /// submitted group.
    pub winners: BTreeMap<FileId, usize>,
    /// Files whose replicas hold concurrent histories. Untouched this run.
    pub conflicts: Vec<FileId>,
}

/// Whether any pairwise comparison in the group detects concurrency.
pub fn has_conflict(vectors: &[VersionVector]) -> bool {
    for (i, a) in vectors.iter().enumerate() {
        for b in vectors.iter().skip(i + 1) {
            if a.compare(b) == VectorOrdering::Conflict {
                return true;
            }
        }
    }
    false
}

/// Index of the maximal vector in a coherent group.
///
/// Folds left keeping the current best and replacing it whenever a later
/// entry compares strictly newer. Ties are content-identical by invariant,
/// so keeping the earlier entry is as good as any choice.
pub fn winner_index(vectors: &[VersionVector]) -> Option<usize> {
    let mut best = 0;
    for (i, candidate) in vectors.iter().enumerate().skip(1) {
        if candidate.compare(&vectors[best]) == VectorOrdering::Newer {
            best = i;
        }
    }
    if vectors.is_empty() {
        None
    } else {
        Some(best)
    }
}

/// Partition file groups into conflicting and coherent, and pick each
/// coherent group's winner.
pub fn plan(groups: &BTreeMap<FileId, Vec<VersionVector>>) -> ReconcilePlan {
    let mut out = ReconcilePlan::default();
    for (id, vectors) in groups {
        if has_conflict(vectors) {
            out.conflicts.push(*id);
        } else if let Some(winner) = winner_index(vectors) {
            out.winners.insert(*id, winner);
        }
    }
    out
}
