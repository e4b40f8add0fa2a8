use crate::comparator::{BytewiseComparator, UserComparator};


/// Knobs recognized by the data plane.
#[derive(Debug, Clone)]
pub struct Options<Cmp> {
    /// User-key comparator.
    pub comparator:        Cmp,

    /// Memtable flush threshold, in bytes. The core only consumes the entry
    /// counts that result from it; the write buffer itself lives upstream.
    pub write_buffer_size: usize,

    /// Attach a cuckoo side-index to every table for O(1) point-lookup
    /// anchors.
    pub use_cuckoo:        bool,

    /// Point-overlap threshold that admits a compaction. At least 1.
    pub max_overlap:       usize,

    /// Skip persist barriers (`clflush`) entirely. On for pure-DRAM runs and
    /// tests.
    pub run_in_dram:       bool,

    /// Soft cap on index size consulted by write admission control upstream.
    /// Advisory; the core does not enforce it.
    pub peak:              usize,
}

impl<Cmp: UserComparator> Options<Cmp> {
    #[must_use]
    pub fn new(comparator: Cmp) -> Self {
        let mib: usize = 1 << 20;
        Self {
            comparator,
            write_buffer_size: 4 * mib,
            use_cuckoo:        true,
            max_overlap:       2,
            run_in_dram:       true,
            peak:              100,
        }
    }

    /// `max_overlap` below 1 would admit a compaction for every flush;
    /// clamp it the way the open path sanitizes options.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.max_overlap = self.max_overlap.max(1);
        self
    }
}

impl Default for Options<BytewiseComparator> {
    #[inline]
    fn default() -> Self {
        Self::new(BytewiseComparator)
    }
}
