use crate::{
    comparator::{EntryComparator, UserComparator},
    cursor::TableCursor,
    format::{Entry, EntryType, ParsedInternalKey, SequenceNumber},
    index::{IntervalRef, IntervalSkipList},
    iter::MergingCursor,
};


/// Forward-only cursor feeding a compaction merge.
///
/// Scans `[left_border, right_border]` across interval boundaries by
/// re-seeking the index with the compaction enumeration, which also hands
/// back the next frontier key under the time cut. Obsolete records are
/// dropped on the fly:
///
///   * the first occurrence of each user key (its newest sequence) is
///     always kept;
///   * a later record for the same user key is dropped once the record
///     before it is at or below `smallest_snapshot` — no reader can get
///     past the newer one (rule A);
///   * a deletion marker at or below `smallest_snapshot` is dropped — no
///     reader can observe it (rule B);
///   * records that fail to parse are kept, and reset the duplicate
///     tracking.
///
/// The distinct source intervals the scan touches accumulate in
/// `old_intervals`; after the rewrite the caller removes exactly those from
/// the index.
pub(crate) struct CompactionCursor<'a, C: UserComparator> {
    cmp:               EntryComparator<C>,
    index:             &'a IntervalSkipList<C>,

    left_border:       Entry,
    right_border:      Entry,
    /// Next interval start inside the remaining frontier, if any.
    right:             Option<Entry>,

    /// The reserved merge timestamp; only intervals stamped strictly below
    /// it take part.
    time_border:       u64,
    smallest_snapshot: u64,

    seeked:            bool,
    /// Set once the right border record has been delivered.
    finished:          bool,

    old_intervals:     Vec<IntervalRef<C>>,
    merge:             Option<MergingCursor<C>>,

    current_user_key:      Option<Vec<u8>>,
    last_sequence_for_key: u64,
}

impl<'a, C: UserComparator> CompactionCursor<'a, C> {
    pub(crate) fn new(
        cmp:               EntryComparator<C>,
        index:             &'a IntervalSkipList<C>,
        left_border:       Entry,
        right_border:      Entry,
        time_border:       u64,
        smallest_snapshot: u64,
    ) -> Self {
        Self {
            cmp,
            index,
            left_border,
            right_border,
            right: None,
            time_border,
            smallest_snapshot,
            seeked: false,
            finished: false,
            old_intervals: Vec::new(),
            merge: None,
            current_user_key: None,
            last_sequence_for_key: SequenceNumber::MAX.inner(),
        }
    }

    /// The distinct source intervals this scan overlapped.
    pub(crate) fn into_old_intervals(self) -> Vec<IntervalRef<C>> {
        self.old_intervals
    }

    /// Re-seek the index at `target` (a node key of the cluster) and
    /// rebuild the merge over the qualifying intervals there.
    fn help_seek(&mut self, target: &Entry) {
        self.merge = None;

        let (stabbed, right) =
            self.index
                .stab_compaction(target.as_bytes(), &self.right_border, self.time_border);
        self.right = right;

        let mut children = Vec::new();
        for interval in &stabbed {
            if interval.stamp() >= self.time_border {
                // Born during this compaction; its contents are ours.
                continue;
            }
            let unseen = !self
                .old_intervals
                .iter()
                .any(|seen| std::sync::Arc::ptr_eq(seen, interval));
            if unseen {
                let disjoint = self
                    .cmp
                    .cmp_raw(interval.sup().as_bytes(), self.left_border.as_bytes())
                    .is_lt()
                    || self
                        .cmp
                        .cmp_raw(interval.inf().as_bytes(), self.right_border.as_bytes())
                        .is_gt();
                if !disjoint {
                    self.old_intervals.push(interval.clone());
                }
            }
            children.push(interval.table().cursor());
        }

        self.merge = (!children.is_empty())
            .then(|| MergingCursor::new(self.cmp.internal_comparator().clone(), children));
        if let Some(merge) = self.merge.as_mut() {
            merge.seek(target.as_bytes());
        }
    }

    fn help_next(&mut self) {
        assert!(self.valid());
        let merge = self.merge.as_mut().expect("valid implies a merge");

        if merge.raw().ptr_eq(&self.right_border) {
            self.finished = true;
        }
        merge.next();

        // Past the last frontier: the current range runs out the scan.
        let Some(right) = self.right.clone() else {
            return;
        };

        let crossed = match self.merge.as_ref() {
            Some(merge) if merge.valid() => merge.raw().ptr_eq(&right),
            _ => true,
        };
        if crossed {
            self.help_seek(&right);
        }
    }

    /// Duplicate/tombstone bookkeeping for the current record; true when it
    /// must be dropped.
    fn skip_obsolete_key(&mut self) -> bool {
        // Decode into owned state first; the bookkeeping below rewrites the
        // fields the borrowed key would otherwise pin.
        let decoded = {
            let merge = self.merge.as_ref().expect("valid implies a merge");
            match ParsedInternalKey::decode(merge.key()) {
                Err(_) => None,
                Ok(ikey) => {
                    let first_occurrence =
                        self.current_user_key.as_deref().is_none_or(|current| {
                            !self
                                .cmp
                                .user_comparator()
                                .cmp(ikey.user_key, current)
                                .is_eq()
                        });
                    Some((
                        first_occurrence.then(|| ikey.user_key.to_vec()),
                        ikey.sequence.inner(),
                        ikey.entry_type == EntryType::Deletion,
                    ))
                }
            }
        };

        let Some((new_user_key, sequence, is_deletion)) = decoded else {
            // Do not hide malformed records.
            self.current_user_key = None;
            self.last_sequence_for_key = SequenceNumber::MAX.inner();
            return false;
        };

        if let Some(user_key) = new_user_key {
            // The newest sequence of this user key; always kept.
            self.current_user_key = Some(user_key);
            self.last_sequence_for_key = SequenceNumber::MAX.inner();
        }

        let mut drop = false;
        if self.last_sequence_for_key <= self.smallest_snapshot {
            // Hidden by a newer record for the same user key. (A)
            drop = true;
        } else if is_deletion && sequence <= self.smallest_snapshot {
            // No snapshot can observe the deletion, and any older records
            // for this user key fall to rule (A) right after it. The
            // marker carries no information.
            drop = true;
        }

        self.last_sequence_for_key = sequence;
        drop
    }
}

impl<C: UserComparator> TableCursor for CompactionCursor<'_, C> {
    fn valid(&self) -> bool {
        if !self.seeked || self.finished {
            return false;
        }
        self.merge.as_ref().is_some_and(MergingCursor::valid)
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.help_next();
        while self.valid() && self.skip_obsolete_key() {
            self.help_next();
        }
    }

    /// Only the scan from the left border is meaningful here.
    fn seek(&mut self, _target: &[u8]) {}

    fn seek_to_first(&mut self) {
        self.seeked = true;
        let left_border = self.left_border.clone();
        self.help_seek(&left_border);
        assert!(self.valid());
        // The cluster may open on droppable records (e.g. a tombstone no
        // snapshot can observe); land on the first kept one.
        while self.valid() && self.skip_obsolete_key() {
            self.help_next();
        }
    }

    /// Forward-only.
    fn seek_to_last(&mut self) {}

    /// Forward-only.
    fn prev(&mut self) {}

    fn key(&self) -> &[u8] {
        self.merge.as_ref().expect("valid cursor").key()
    }

    fn value(&self) -> &[u8] {
        self.merge.as_ref().expect("valid cursor").value()
    }

    fn raw(&self) -> Entry {
        self.merge.as_ref().expect("valid cursor").raw()
    }
}

impl<C: UserComparator> std::fmt::Debug for CompactionCursor<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionCursor")
            .field("time_border", &self.time_border)
            .field("smallest_snapshot", &self.smallest_snapshot)
            .field("finished", &self.finished)
            .field("sources", &self.old_intervals.len())
            .finish_non_exhaustive()
    }
}
