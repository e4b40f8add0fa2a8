use std::sync::Arc;

use parking_lot::Mutex;

use crate::format::SequenceNumber;


/// A frozen read point: every lookup through it sees the newest record at a
/// sequence at or below [`Self::sequence`].
#[derive(Debug)]
pub struct Snapshot {
    sequence: SequenceNumber,
}

impl Snapshot {
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

/// Shared handle to a [`Snapshot`].
pub type SnapshotRef = Arc<Snapshot>;

/// Live snapshots in acquisition order; the front is the oldest, which
/// floors the obsolete-key elimination during compaction.
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    snapshots: Mutex<Vec<SnapshotRef>>,
}

impl SnapshotList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquire(&self, sequence: SequenceNumber) -> SnapshotRef {
        let snapshot = Arc::new(Snapshot { sequence });
        self.snapshots.lock().push(Arc::clone(&snapshot));
        snapshot
    }

    /// Drop the list's reference to `snapshot`. Releasing a snapshot twice
    /// (or one from another database) is a no-op.
    pub(crate) fn release(&self, snapshot: &SnapshotRef) {
        let mut snapshots = self.snapshots.lock();
        if let Some(idx) = snapshots.iter().position(|s| Arc::ptr_eq(s, snapshot)) {
            snapshots.remove(idx);
        }
    }

    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.snapshots.lock().first().map(|s| s.sequence())
    }
}
