use std::sync::Arc;

use crate::{comparator::UserComparator, format::Entry, table::NvmTable};


/// One indexed generation: the key range `[inf, sup]` of an [`NvmTable`],
/// stamped with the index's monotonic timestamp.
///
/// Intervals are only created by the index. `inf`/`sup` are handles to the
/// table's first and last records, so endpoint comparisons by identity work
/// across donation.
pub struct Interval<C: UserComparator> {
    inf:   Entry,
    sup:   Entry,
    stamp: u64,
    table: NvmTable<C>,
}

/// Shared handle to an [`Interval`].
///
/// The index holds one strong reference per indexed interval; readers clone
/// the handle before the index's read lock is released and drop it after
/// use. When a compaction removes the interval, the index's reference goes
/// away and the last holder frees the table — and with it every record byte
/// the table still owns.
pub type IntervalRef<C> = Arc<Interval<C>>;

impl<C: UserComparator> Interval<C> {
    pub(super) fn new(inf: Entry, sup: Entry, stamp: u64, table: NvmTable<C>) -> IntervalRef<C> {
        Arc::new(Self { inf, sup, stamp, table })
    }

    #[inline]
    #[must_use]
    pub fn inf(&self) -> &Entry {
        &self.inf
    }

    #[inline]
    #[must_use]
    pub fn sup(&self) -> &Entry {
        &self.sup
    }

    /// Fresh intervals have greater timestamps; two intervals covering the
    /// same user key resolve newest-stamp-first.
    #[inline]
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    #[inline]
    #[must_use]
    pub fn table(&self) -> &NvmTable<C> {
        &self.table
    }
}

impl<C: UserComparator> std::fmt::Debug for Interval<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interval")
            .field("inf", &self.inf)
            .field("sup", &self.sup)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

/// Identity, not range equality: two handles to the same interval.
#[inline]
pub(crate) fn same_interval<C: UserComparator>(a: &IntervalRef<C>, b: &IntervalRef<C>) -> bool {
    Arc::ptr_eq(a, b)
}
