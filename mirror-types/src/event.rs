//! Events published for external consumers (UI, log sinks).

use crate::{FileId, ProviderId, RelativePath};

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// A file version was materialized for the first time at a replica.
    Created,
    /// An existing replica copy was brought up to a newer version.
    Updated,
    /// A removal tombstone was applied at a replica.
    Removed,
    /// A deletion tombstone was applied at a replica.
    Deleted,
}

/// Which replica the event happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// The local file tree.
    Local,
    /// One remote provider.
    Remote(ProviderId),
}

/// A file-level change applied by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The file's stable id.
    pub file_id: FileId,
    /// Path relative to the synchronized root.
    pub path: RelativePath,
    /// What happened.
    pub kind: FileEventKind,
    /// Where it happened.
    pub location: Location,
}

/// Lifecycle signals around one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSignal {
    /// A reconciliation run started.
    Begun,
    /// The run finished (per-file failures included; they do not abort it).
    Done,
}

/// Progress of one content transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Bytes processed so far.
    Bytes(u64),
    /// The transfer finished.
    Completed,
    /// The transfer failed; the file resolves to a no-op this run.
    Failed,
}

/// A progress tick on a per-repository channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTick {
    /// The file being transferred.
    pub file_id: FileId,
    /// The provider the transfer targets.
    pub provider: ProviderId,
    /// How far along the transfer is.
    pub progress: Progress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_location() {
        let provider = ProviderId::random();
        let event = FileEvent {
            file_id: FileId::new(),
            path: RelativePath::new("a.txt"),
            kind: FileEventKind::Created,
            location: Location::Remote(provider),
        };
        assert_eq!(event.location, Location::Remote(provider));
        assert_ne!(event.location, Location::Local);
    }

    #[test]
    fn progress_variants_compare() {
        assert_eq!(Progress::Bytes(65_536), Progress::Bytes(65_536));
        assert_ne!(Progress::Bytes(0), Progress::Completed);
    }
}
