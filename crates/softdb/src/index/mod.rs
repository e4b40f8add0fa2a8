//! The concurrent interval index: maps `[inf, sup]` key ranges of frozen
//! tables to reference-counted interval handles, supporting stabbing
//! queries and range enumeration.

mod core;
mod interval;
mod node;

pub use self::interval::{Interval, IntervalRef};
pub(crate) use self::core::RangeStab;

use parking_lot::RwLock;

use crate::{
    comparator::{EntryComparator, UserComparator},
    format::Entry,
    table::NvmTable,
};
use self::core::IslCore;


/// Single-writer / many-reader interval skip list.
///
/// One reader–writer lock guards the whole structure; mutations are short
/// (insert and remove of one interval) and writers are preferred so
/// compaction latency stays bounded. Every query clones the interval
/// handles it returns *while holding the read lock*, so a concurrent
/// removal can never free a table a caller is about to probe.
pub struct IntervalSkipList<C: UserComparator> {
    core: RwLock<IslCore<C>>,
}

impl<C: UserComparator> std::fmt::Debug for IntervalSkipList<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.core.read().fmt(f)
    }
}

impl<C: UserComparator> IntervalSkipList<C> {
    #[must_use]
    pub fn new(cmp: EntryComparator<C>) -> Self {
        Self {
            core: RwLock::new(IslCore::new(cmp)),
        }
    }

    /// Number of indexed intervals.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.core.read().interval_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The timestamp the next insert will receive.
    #[must_use]
    pub fn next_timestamp(&self) -> u64 {
        self.core.read().next_timestamp()
    }

    /// Take the next timestamp for an upcoming batch of coeval intervals.
    /// Anything inserted afterwards (with timestamp 0) stamps strictly
    /// higher.
    #[must_use]
    pub fn reserve_timestamp(&self) -> u64 {
        let mut core = self.core.write();
        let stamp = core.next_timestamp();
        core.increment_timestamp();
        stamp
    }

    /// Index a table generation spanning `[inf, sup]`; `timestamp == 0`
    /// allocates the next timestamp (flush), a nonzero value stamps a
    /// compaction product. Returns a handle to the new interval (the index
    /// keeps its own).
    pub fn insert(
        &self,
        inf:       Entry,
        sup:       Entry,
        table:     NvmTable<C>,
        timestamp: u64,
    ) -> IntervalRef<C> {
        self.core.write().insert(inf, sup, table, timestamp)
    }

    /// Unlink an interval, dropping the index's handle to it. Removing an
    /// interval that is not a member is a no-op returning false.
    pub fn remove(&self, interval: &IntervalRef<C>) -> bool {
        self.core.write().remove(interval)
    }

    /// Unlink a batch of intervals under one write-lock acquisition, so
    /// readers never observe a partially retired compaction input set.
    /// Returns how many were members.
    pub fn remove_batch(&self, intervals: &[IntervalRef<C>]) -> usize {
        let mut core = self.core.write();
        intervals
            .iter()
            .filter(|interval| core.remove(interval))
            .count()
    }

    /// Point query: all intervals containing `search_key` (plus those
    /// starting at a directly following node with the same user key),
    /// newest stamp first, together with the overlap count at the point.
    #[must_use]
    pub fn stab_for_get(&self, search_key: &[u8]) -> (Vec<IntervalRef<C>>, usize) {
        let mut intervals = Vec::new();
        let overlaps = self.core.read().stab_point(search_key, &mut intervals);
        intervals.sort_by(|a, b| b.stamp().cmp(&a.stamp()));
        (intervals, overlaps)
    }

    /// Exact stab: the intervals whose range contains `search_key`, in
    /// index order. Used by the compaction expansion loops.
    #[must_use]
    pub fn stab(&self, search_key: &[u8]) -> Vec<IntervalRef<C>> {
        let mut intervals = Vec::new();
        self.core.read().stab_plain(search_key, &mut intervals);
        intervals
    }

    /// Overlap count only — the admission test for compaction scheduling.
    #[must_use]
    pub fn stab_count(&self, search_key: &[u8]) -> usize {
        self.core.read().stab_count(search_key)
    }

    /// Stab plus the left/right node keys at which a range scan must
    /// re-seek the index.
    #[must_use]
    pub(crate) fn stab_range(&self, search_key: &[u8]) -> RangeStab<C> {
        self.core.read().stab_range(search_key)
    }

    /// Stab at a node key plus the next interval start inside
    /// `(search_key, right_border)` under the time cut; drives the
    /// compaction frontier.
    #[must_use]
    pub(crate) fn stab_compaction(
        &self,
        search_key:   &[u8],
        right_border: &Entry,
        time_border:  u64,
    ) -> (Vec<IntervalRef<C>>, Option<Entry>) {
        let mut intervals = Vec::new();
        let right =
            self.core
                .read()
                .stab_compaction(search_key, right_border, time_border, &mut intervals);
        (intervals, right)
    }

    /// Key of the first indexed node, if any.
    #[must_use]
    pub fn first_key(&self) -> Option<Entry> {
        self.core.read().first_key()
    }

    /// Key of the last indexed node, if any.
    #[must_use]
    pub fn last_key(&self) -> Option<Entry> {
        self.core.read().last_key()
    }

    /// Drop every interval and reset the timestamp counter.
    pub fn clear(&self) {
        self.core.write().clear();
    }
}
