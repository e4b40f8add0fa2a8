//! The owner of the interval index: table births (flush and compaction),
//! deaths (after a merge), point reads, range scans, snapshots, and the
//! point-overlap-triggered compaction loop.

mod compaction;
mod iter;
mod snapshot;

#[cfg(test)]
mod tests;

pub use self::iter::NvmIterator;
pub use self::snapshot::{Snapshot, SnapshotRef};

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::{
    comparator::{EntryComparator, UserComparator},
    cursor::TableCursor,
    error::{Error, Result},
    format::{Entry, LookupKey, SequenceNumber},
    index::IntervalSkipList,
    options::Options,
    scheduler::Scheduler,
    table::{NvmTable, TableGet},
};
use self::compaction::CompactionCursor;
use self::snapshot::SnapshotList;


/// Counters consulted by the external log/recovery subsystem.
#[derive(Debug)]
struct FileNumbers {
    next_file_number: u64,
    log_number:       u64,
    /// Zero, or the backing log of a write buffer still being flushed.
    prev_log_number:  u64,
}

/// Compaction admission state. One compaction runs at a time; the flag is
/// the gate, `hotkey` is kept for observability.
struct BackgroundState {
    compaction_scheduled: bool,
    hotkey:               Option<Vec<u8>>,
    bg_error:             Option<Error>,
}

/// The persistent-memory data plane: owns the interval index and its
/// timestamp counter, builds tables out of flushed write buffers and
/// compaction merges, serves point reads, and schedules overlap-triggered
/// compactions on the injected [`Scheduler`].
///
/// Shared by handle: readers, the write path, and the compactor all hold
/// the same `Arc<VersionSet>`.
pub struct VersionSet<C: UserComparator, S: Scheduler> {
    options:             Options<C>,
    cmp:                 EntryComparator<C>,
    index:               IntervalSkipList<C>,
    scheduler:           S,
    snapshots:           SnapshotList,

    last_sequence:       AtomicU64,
    file_numbers:        Mutex<FileNumbers>,

    background:          Mutex<BackgroundState>,
    background_finished: Condvar,
    shutting_down:       AtomicBool,

    /// Handle to ourselves for the background closure; always upgradable
    /// while any caller holds the set.
    weak_self:           Weak<Self>,
}

impl<C: UserComparator, S: Scheduler> std::fmt::Debug for VersionSet<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("intervals", &self.index.len())
            .field("last_sequence", &self.last_sequence())
            .finish_non_exhaustive()
    }
}

impl<C: UserComparator, S: Scheduler> VersionSet<C, S> {
    #[must_use]
    pub fn new(options: Options<C>, scheduler: S) -> Arc<Self> {
        let options = options.sanitized();
        let cmp = EntryComparator::new(options.comparator.clone());
        Arc::new_cyclic(|weak_self| Self {
            index: IntervalSkipList::new(cmp.clone()),
            cmp,
            options,
            scheduler,
            snapshots: SnapshotList::new(),
            last_sequence: AtomicU64::new(0),
            file_numbers: Mutex::new(FileNumbers {
                next_file_number: 2,
                log_number:       0,
                prev_log_number:  0,
            }),
            background: Mutex::new(BackgroundState {
                compaction_scheduled: false,
                hotkey:               None,
                bg_error:             None,
            }),
            background_finished: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    #[inline]
    #[must_use]
    pub fn options(&self) -> &Options<C> {
        &self.options
    }

    /// Number of intervals currently indexed.
    #[must_use]
    pub fn num_intervals(&self) -> u64 {
        self.index.len()
    }

    /// The timestamp the next flushed table will receive.
    #[must_use]
    pub fn next_timestamp(&self) -> u64 {
        self.index.next_timestamp()
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> &IntervalSkipList<C> {
        &self.index
    }

    // ================================
    //  Log/recovery counters
    // ================================

    /// Allocate and return a new file number.
    pub fn new_file_number(&self) -> u64 {
        let mut numbers = self.file_numbers.lock();
        let number = numbers.next_file_number;
        numbers.next_file_number += 1;
        number
    }

    /// Arrange to reuse `file_number` unless a newer number has already
    /// been handed out.
    ///
    /// REQUIRES: `file_number` came from [`Self::new_file_number`].
    pub fn reuse_file_number(&self, file_number: u64) {
        let mut numbers = self.file_numbers.lock();
        if numbers.next_file_number == file_number + 1 {
            numbers.next_file_number = file_number;
        }
    }

    /// Advance the counter so `number` is never handed out again.
    pub fn mark_file_number_used(&self, number: u64) {
        let mut numbers = self.file_numbers.lock();
        if numbers.next_file_number <= number {
            numbers.next_file_number = number + 1;
        }
    }

    #[must_use]
    pub fn log_number(&self) -> u64 {
        self.file_numbers.lock().log_number
    }

    #[must_use]
    pub fn prev_log_number(&self) -> u64 {
        self.file_numbers.lock().prev_log_number
    }

    pub fn set_log_number(&self, number: u64) {
        self.file_numbers.lock().log_number = number;
    }

    pub fn set_prev_log_number(&self, number: u64) {
        self.file_numbers.lock().prev_log_number = number;
    }

    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// REQUIRES: `sequence` does not move backwards.
    pub fn set_last_sequence(&self, sequence: u64) {
        debug_assert!(sequence >= self.last_sequence());
        self.last_sequence.store(sequence, Ordering::Release);
    }

    // ================================
    //  Snapshots
    // ================================

    /// Freeze a read point at the current last sequence.
    #[must_use]
    pub fn snapshot(&self) -> SnapshotRef {
        self.snapshots
            .acquire(SequenceNumber::new(self.last_sequence()))
    }

    pub fn release_snapshot(&self, snapshot: &SnapshotRef) {
        self.snapshots.release(snapshot);
    }

    // ================================
    //  Table builds
    // ================================

    /// Build one table out of `iter` and index it.
    ///
    /// Called with `timestamp == 0` from the flush path — the table
    /// receives the next timestamp, and the overlap at its endpoints is
    /// measured as the admission test for compaction. A compaction passes
    /// its reserved merge timestamp instead (and thereby donates record
    /// handles rather than copying bytes).
    ///
    /// `count` caps the table's capacity; a compaction cursor left valid
    /// here simply continues into the next table.
    pub fn build_table<I: TableCursor + ?Sized>(
        &self,
        iter:      &mut I,
        count:     usize,
        timestamp: u64,
    ) -> Result<()> {
        if count == 0 {
            return Err(Error::invalid_argument("table capacity must be positive"));
        }
        if !iter.valid() {
            return Err(Error::invalid_argument("bulk-load cursor is not positioned"));
        }

        let table = NvmTable::build(
            self.cmp.clone(),
            count,
            self.options.use_cuckoo,
            iter,
            timestamp != 0,
        );
        debug_assert!(!table.is_empty());
        if !self.options.run_in_dram {
            table.flush();
        }

        let l_raw = table.first_raw();
        let r_raw = table.last_raw();
        let entries = table.len();
        self.index.insert(l_raw.clone(), r_raw.clone(), table, timestamp);
        debug!(entries, timestamp, intervals = self.index.len(), "indexed table");

        // A fresh flush is the moment hot spots form; measure the point
        // overlap at both endpoints and let the hotter one make the case.
        if timestamp == 0 {
            let l_count = self.index.stab_count(l_raw.as_bytes());
            let r_count = self.index.stab_count(r_raw.as_bytes());
            if l_count >= r_count {
                self.maybe_schedule_compaction(l_raw.as_bytes(), l_count);
            } else {
                self.maybe_schedule_compaction(r_raw.as_bytes(), r_count);
            }
        }
        Ok(())
    }

    // ================================
    //  Reads
    // ================================

    /// Point lookup at `key`'s sequence horizon.
    ///
    /// Stabs the index, takes interval handles while under its read lock,
    /// then probes the tables newest-stamp-first without any lock held.
    /// A malformed record makes that table act as absent; the corruption is
    /// reported only if nothing newer resolves the key.
    pub fn get(&self, key: &LookupKey) -> Result<Vec<u8>> {
        let (intervals, _) = self.index.stab_for_get(key.encoded());
        let overlap = intervals.len();

        let mut outcome: Option<Result<Vec<u8>>> = None;
        let mut corruption: Option<Error> = None;
        for interval in &intervals {
            match interval.table().get(key) {
                Ok(TableGet::Found(value)) => {
                    outcome = Some(Ok(value));
                    break;
                }
                Ok(TableGet::FoundTombstone) => {
                    outcome = Some(Err(Error::NotFound));
                    break;
                }
                Ok(TableGet::Missing) => {}
                Err(error) => {
                    debug_assert!(error.is_corruption());
                    corruption.get_or_insert(error);
                }
            }
        }
        drop(intervals);

        // Reads expose hot spots too.
        self.maybe_schedule_compaction(key.encoded(), overlap);

        match outcome {
            Some(result) => result,
            None => Err(corruption.unwrap_or(Error::NotFound)),
        }
    }

    /// A scan cursor over every indexed table, walking interval ranges and
    /// re-seeking the index at their frontiers.
    #[must_use]
    pub fn new_cursor(&self) -> NvmIterator<'_, C> {
        NvmIterator::new(self.cmp.clone(), &self.index)
    }

    // ================================
    //  Compaction
    // ================================

    #[must_use]
    pub fn compaction_scheduled(&self) -> bool {
        self.background.lock().compaction_scheduled
    }

    /// First background error, if any. Once set, no further compactions
    /// are admitted and writers should fail fast.
    #[must_use]
    pub fn background_error(&self) -> Option<Error> {
        self.background.lock().bg_error.clone()
    }

    /// Stop admitting background work. In-flight compaction finishes its
    /// current batch and abandons the rest.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Block until no compaction is scheduled or running.
    pub fn wait_for_background(&self) {
        let mut background = self.background.lock();
        while background.compaction_scheduled {
            self.background_finished.wait(&mut background);
        }
    }

    fn maybe_schedule_compaction(&self, hotkey: &[u8], overlaps: usize) {
        let mut background = self.background.lock();
        if background.compaction_scheduled {
            // Already scheduled.
        } else if self.is_shutting_down() {
            // The database is going away; no more background compactions.
        } else if background.bg_error.is_some() {
            // Already got an error; no more changes.
        } else if overlaps < self.options.max_overlap {
            // No work to be done.
        } else {
            background.compaction_scheduled = true;
            debug_assert!(background.hotkey.is_none());
            background.hotkey = Some(hotkey.to_vec());
            drop(background);

            debug!(overlaps, "scheduling point-overlap compaction");
            let this = self.weak_self.upgrade().expect("the set is alive: we are it");
            let hotkey = hotkey.to_vec();
            self.scheduler
                .schedule(Box::new(move || this.background_call(&hotkey)));
        }
    }

    fn background_call(&self, hotkey: &[u8]) {
        debug_assert!(self.compaction_scheduled());
        if self.is_shutting_down() {
            // No more background work when shutting down.
        } else if self.background_error().is_some() {
            // No more background work after a background error.
        } else {
            self.do_compaction_work(hotkey);
        }

        let mut background = self.background.lock();
        background.hotkey = None;
        background.compaction_scheduled = false;
        // Wake anyone waiting out the background work.
        self.background_finished.notify_all();
    }

    /// One full overlap-triggered compaction around `hotkey`; only ever
    /// runs on the single background slot.
    fn do_compaction_work(&self, hotkey: &[u8]) {
        let index = &self.index;

        // Average entry count per table steers the batch size. Slightly
        // stale under concurrent writes, which is fine.
        let avg_count = (self.last_sequence() / index.len().max(1)).max(1) as usize;

        // Reserve the timestamp for the replacement intervals first: any
        // interval born from here on stamps strictly above the cut and is
        // excluded from this compaction.
        let merge_time_line = index.reserve_timestamp();
        let time_border = merge_time_line - 1;

        // Union of the qualifying intervals stabbed at the hot key.
        let mut left: Option<Entry> = None;
        let mut right: Option<Entry> = None;
        for interval in index.stab(hotkey) {
            if interval.stamp() > time_border {
                continue;
            }
            left = Some(match left.take() {
                None => interval.inf().clone(),
                Some(best) => self.smaller_of(interval.inf(), best),
            });
            right = Some(match right.take() {
                None => interval.sup().clone(),
                Some(best) => self.larger_of(interval.sup(), best),
            });
        }
        let (Some(mut left), Some(mut right)) = (left, right) else {
            // Everything at the hot key was born after the cut; the next
            // overlap measurement will reschedule if it is still hot.
            debug!("compaction found no intervals under the time cut");
            return;
        };

        // Expand to the maximal overlapping cluster: any interval stabbed
        // at the current border may itself reach further out.
        loop {
            let mut expanded = false;
            for interval in index.stab(left.as_bytes()) {
                if interval.stamp() <= time_border
                    && self
                        .cmp
                        .cmp_raw(interval.inf().as_bytes(), left.as_bytes())
                        .is_lt()
                {
                    left = interval.inf().clone();
                    expanded = true;
                }
            }
            if !expanded {
                break;
            }
        }
        loop {
            let mut expanded = false;
            for interval in index.stab(right.as_bytes()) {
                if interval.stamp() <= time_border
                    && self
                        .cmp
                        .cmp_raw(interval.sup().as_bytes(), right.as_bytes())
                        .is_gt()
                {
                    right = interval.sup().clone();
                    expanded = true;
                }
            }
            if !expanded {
                break;
            }
        }

        // Records in [left, right] with stamps at or under the cut are
        // rewritten into coeval, non-overlapping intervals.
        let smallest_snapshot = self
            .snapshots
            .oldest()
            .map_or_else(|| self.last_sequence(), |seq| seq.inner())
            .min(self.last_sequence());

        info!(
            merge_time_line,
            smallest_snapshot,
            intervals_before = index.len(),
            "compacting overlap cluster",
        );

        let mut iter = CompactionCursor::new(
            self.cmp.clone(),
            index,
            left,
            right,
            merge_time_line,
            smallest_snapshot,
        );
        iter.seek_to_first();

        let mut abandoned = false;
        while iter.valid() {
            if self.is_shutting_down() {
                abandoned = true;
                break;
            }
            if let Err(error) = self.build_table(&mut iter, avg_count, merge_time_line) {
                warn!(%error, "compaction failed; latching background error");
                self.record_background_error(error);
                return;
            }
        }

        if abandoned {
            // Leave the sources indexed: the rewritten prefix coexists with
            // them and reads resolve newest-stamp-first. Every interval is
            // still freed by its final handle drop.
            info!("compaction abandoned for shutdown");
            return;
        }

        let old_intervals = iter.into_old_intervals();
        let removed = self.index.remove_batch(&old_intervals);
        debug_assert_eq!(removed, old_intervals.len());
        info!(
            removed,
            intervals_after = self.index.len(),
            "compaction finished",
        );
    }

    fn record_background_error(&self, error: Error) {
        self.background.lock().bg_error.get_or_insert(error);
    }

    fn smaller_of(&self, a: &Entry, b: Entry) -> Entry {
        if self.cmp.cmp_raw(a.as_bytes(), b.as_bytes()).is_lt() {
            a.clone()
        } else {
            b
        }
    }

    fn larger_of(&self, a: &Entry, b: Entry) -> Entry {
        if self.cmp.cmp_raw(a.as_bytes(), b.as_bytes()).is_gt() {
            a.clone()
        } else {
            b
        }
    }
}
