use crate::{
    comparator::{EntryComparator, UserComparator},
    cursor::TableCursor,
    format::Entry,
    index::{IntervalRef, IntervalSkipList},
    iter::MergingCursor,
};


/// User-facing scan cursor over the whole index.
///
/// Positions inside one `[left, right]` node range at a time, merging the
/// cursors of every interval stabbed there. Whenever navigation crosses the
/// range — by stepping onto a border record or running off the merged
/// stream — the cursor re-seeks the index, picks up a fresh interval set,
/// and drops the previous one.
///
/// The held interval handles are what make scenario-of-record reads safe:
/// intervals removed by a concurrent compaction stay alive (and their
/// tables readable) until this cursor re-seeks past them or is dropped.
pub struct NvmIterator<'a, C: UserComparator> {
    cmp:       EntryComparator<C>,
    index:     &'a IntervalSkipList<C>,

    /// Node key of the current range's left frontier; `None` at the head.
    left:      Option<Entry>,
    /// Node key of the current range's right frontier; `None` past the end.
    right:     Option<Entry>,
    /// Never positioned; `left`/`right` are meaningless.
    unseeked:  bool,

    intervals: Vec<IntervalRef<C>>,
    merge:     Option<MergingCursor<C>>,
}

impl<'a, C: UserComparator> NvmIterator<'a, C> {
    pub(crate) fn new(cmp: EntryComparator<C>, index: &'a IntervalSkipList<C>) -> Self {
        Self {
            cmp,
            index,
            left: None,
            right: None,
            unseeked: true,
            intervals: Vec::new(),
            merge: None,
        }
    }

    /// Number of intervals backing the current range.
    #[must_use]
    pub fn range_width(&self) -> usize {
        self.intervals.len()
    }

    fn clear_range(&mut self) {
        // Dropping the merge first, then the handles it fed from.
        self.merge = None;
        self.intervals.clear();
    }

    fn install_range(&mut self, intervals: Vec<IntervalRef<C>>) {
        let children: Vec<_> = intervals.iter().map(|iv| iv.table().cursor()).collect();
        self.intervals = intervals;
        self.merge = (!children.is_empty())
            .then(|| MergingCursor::new(self.cmp.internal_comparator().clone(), children));
    }

    /// Re-seek the index at `target` (a length-prefixed internal key) and
    /// position the fresh merge at the first record `>= target`.
    fn help_seek(&mut self, target: &[u8]) {
        self.clear_range();
        self.unseeked = false;

        let range = self.index.stab_range(target);
        self.left = range.left;
        self.right = range.right;
        self.install_range(range.intervals);

        if let Some(merge) = self.merge.as_mut() {
            merge.seek(target);
        }
    }
}

impl<C: UserComparator> TableCursor for NvmIterator<'_, C> {
    fn valid(&self) -> bool {
        if self.unseeked {
            return false;
        }
        self.merge.as_ref().is_some_and(MergingCursor::valid)
    }

    fn seek(&mut self, target: &[u8]) {
        let outside = self.unseeked
            || self
                .left
                .as_ref()
                .is_some_and(|left| self.cmp.cmp_raw(target, left.as_bytes()).is_le())
            || self
                .right
                .as_ref()
                .is_some_and(|right| self.cmp.cmp_raw(target, right.as_bytes()).is_ge());
        if outside {
            self.help_seek(target);
        } else if let Some(merge) = self.merge.as_mut() {
            // The current range already covers the target.
            merge.seek(target);
        }
    }

    fn seek_to_first(&mut self) {
        match self.index.first_key() {
            None => {
                self.clear_range();
                self.unseeked = false;
                self.left = None;
                self.right = None;
            }
            Some(first) => {
                self.help_seek(first.as_bytes());
                if let Some(merge) = self.merge.as_mut() {
                    merge.seek_to_first();
                }
            }
        }
    }

    fn seek_to_last(&mut self) {
        match self.index.last_key() {
            None => {
                self.clear_range();
                self.unseeked = false;
                self.left = None;
                self.right = None;
            }
            Some(last) => {
                self.help_seek(last.as_bytes());
                if let Some(merge) = self.merge.as_mut() {
                    merge.seek_to_last();
                }
            }
        }
    }

    fn next(&mut self) {
        assert!(self.valid());
        let merge = self.merge.as_mut().expect("valid cursor");
        merge.next();

        // Nothing starts beyond this range; run it out.
        let Some(right) = self.right.clone() else {
            return;
        };

        let crossed = match self.merge.as_ref() {
            // Stepping onto the right frontier's record means intervals
            // starting there are not in the merge yet.
            Some(merge) if merge.valid() => merge.raw().ptr_eq(&right),
            _ => true,
        };
        if crossed {
            self.help_seek(right.as_bytes());
        }
    }

    fn prev(&mut self) {
        assert!(self.valid());
        let merge = self.merge.as_mut().expect("valid cursor");
        merge.prev();

        // Nothing precedes this range.
        let Some(left) = self.left.clone() else {
            return;
        };

        let crossed = match self.merge.as_ref() {
            Some(merge) if merge.valid() => merge.raw().ptr_eq(&left),
            _ => true,
        };
        if crossed {
            // Re-seeking at the left frontier rebuilds the range around it
            // and lands exactly on its record.
            self.help_seek(left.as_bytes());
        }
    }

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

impl<C: UserComparator> std::fmt::Debug for NvmIterator<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvmIterator")
            .field("range_width", &self.intervals.len())
            .field("valid", &self.valid())
            .finish_non_exhaustive()
    }
}
