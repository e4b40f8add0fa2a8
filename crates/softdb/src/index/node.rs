use crate::{comparator::UserComparator, format::Entry};
use super::interval::{IntervalRef, same_interval};


/// A bag of interval markers, compared by handle identity.
///
/// Node-local marker sets are tiny (bounded by the point overlap, which
/// compaction keeps near `max_overlap`), so a vector beats a linked
/// structure on every axis that matters here.
pub(super) struct MarkerList<C: UserComparator> {
    marks: Vec<IntervalRef<C>>,
}

impl<C: UserComparator> std::fmt::Debug for MarkerList<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerList").field("count", &self.marks.len()).finish()
    }
}

impl<C: UserComparator> MarkerList<C> {
    pub(super) fn new() -> Self {
        Self { marks: Vec::new() }
    }

    #[inline]
    pub(super) fn count(&self) -> usize {
        self.marks.len()
    }

    #[inline]
    pub(super) fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub(super) fn insert(&mut self, interval: IntervalRef<C>) {
        self.marks.push(interval);
    }

    /// Remove one occurrence of `interval`, if present.
    pub(super) fn remove(&mut self, interval: &IntervalRef<C>) {
        if let Some(idx) = self.marks.iter().position(|m| same_interval(m, interval)) {
            self.marks.swap_remove(idx);
        }
    }

    pub(super) fn remove_all(&mut self, from: &MarkerList<C>) {
        for interval in &from.marks {
            self.remove(interval);
        }
    }

    /// Append every mark of `from`.
    pub(super) fn append_from(&mut self, from: &MarkerList<C>) {
        self.marks.extend(from.marks.iter().cloned());
    }

    pub(super) fn append_cloned(&mut self, from: &[IntervalRef<C>]) {
        self.marks.extend(from.iter().cloned());
    }

    pub(super) fn contains(&self, interval: &IntervalRef<C>) -> bool {
        self.marks.iter().any(|m| same_interval(m, interval))
    }

    pub(super) fn clear(&mut self) {
        self.marks.clear();
    }

    pub(super) fn first(&self) -> Option<&IntervalRef<C>> {
        self.marks.first()
    }

    /// Cheap handle-clone snapshot, for iterating one node's marks while
    /// other nodes are being rewritten.
    pub(super) fn snapshot(&self) -> Vec<IntervalRef<C>> {
        self.marks.clone()
    }

    pub(super) fn copy_into(&self, out: &mut Vec<IntervalRef<C>>) {
        out.extend(self.marks.iter().cloned());
    }
}

/// One node of the interval skip list.
///
/// A node exists exactly as long as some interval starts or ends at its key
/// (`owner_count` tracks how many). `markers[level]` carries the intervals
/// marked on the outgoing edge at that level, `eq_markers` every interval
/// covering the key itself, and `start_marker`/`end_marker` the intervals
/// whose endpoints sit here.
pub(super) struct IslNode<C: UserComparator> {
    /// `None` only for the header sentinel.
    key:                  Option<Entry>,
    forward:              Vec<u32>,
    pub(super) markers:   Vec<MarkerList<C>>,
    pub(super) eq_markers:   MarkerList<C>,
    pub(super) start_marker: MarkerList<C>,
    pub(super) end_marker:   MarkerList<C>,
    pub(super) owner_count:  u32,
}

impl<C: UserComparator> std::fmt::Debug for IslNode<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IslNode")
            .field("key", &self.key)
            .field("levels", &self.level())
            .field("owner_count", &self.owner_count)
            .finish_non_exhaustive()
    }
}

impl<C: UserComparator> IslNode<C> {
    /// A key-bearing node with levels `0..=top_level`.
    pub(super) fn new(key: Entry, top_level: usize, nil: u32) -> Self {
        Self {
            key:          Some(key),
            forward:      vec![nil; top_level + 1],
            markers:      (0..=top_level).map(|_| MarkerList::new()).collect(),
            eq_markers:   MarkerList::new(),
            start_marker: MarkerList::new(),
            end_marker:   MarkerList::new(),
            owner_count:  0,
        }
    }

    /// The header sentinel, tall enough for every reachable level.
    pub(super) fn header(top_level: usize, nil: u32) -> Self {
        Self {
            key:          None,
            forward:      vec![nil; top_level + 1],
            markers:      (0..=top_level).map(|_| MarkerList::new()).collect(),
            eq_markers:   MarkerList::new(),
            start_marker: MarkerList::new(),
            end_marker:   MarkerList::new(),
            owner_count:  0,
        }
    }

    /// Number of levels (top level index plus one).
    #[inline]
    pub(super) fn level(&self) -> usize {
        self.forward.len()
    }

    #[inline]
    pub(super) fn is_header(&self) -> bool {
        self.key.is_none()
    }

    /// # Panics
    /// Panics on the header sentinel; callers guard with [`Self::is_header`].
    #[inline]
    pub(super) fn key(&self) -> &Entry {
        self.key.as_ref().expect("the header sentinel has no key")
    }

    #[inline]
    pub(super) fn forward(&self, level: usize) -> u32 {
        self.forward[level]
    }

    #[inline]
    pub(super) fn set_forward(&mut self, level: usize, target: u32) {
        self.forward[level] = target;
    }
}
