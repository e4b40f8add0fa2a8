use crate::{
    comparator::{EntryComparator, UserComparator},
    format::{self, Entry},
};


/// A bidirectional cursor over encoded records in internal-key order.
///
/// This is the bulk-load contract between the core and its upstreams, and
/// the surface every internal iterator (table, merge, range walk,
/// compaction) presents.
///
/// `seek` targets use the same length-prefix encoding as a record's internal
/// key (see [`LookupKey`]); `key`/`value` borrow decoded slices and require a
/// valid position; [`raw`] hands out the shared record handle, which is what
/// bulk loads donate across tables and what border checks compare by
/// identity.
///
/// [`LookupKey`]: crate::format::LookupKey
/// [`raw`]: TableCursor::raw
pub trait TableCursor {
    #[must_use]
    fn valid(&self) -> bool;

    /// Advance to the next record.
    /// REQUIRES: `valid()`.
    fn next(&mut self);

    /// Retreat to the previous record.
    /// REQUIRES: `valid()`.
    fn prev(&mut self);

    /// Position at the first record whose internal key is `>= target`,
    /// where `target` is a length-prefixed internal key.
    fn seek(&mut self, target: &[u8]);

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// The current record's internal key (un-prefixed).
    /// REQUIRES: `valid()`.
    #[must_use]
    fn key(&self) -> &[u8];

    /// The current record's value slice.
    /// REQUIRES: `valid()`.
    #[must_use]
    fn value(&self) -> &[u8];

    /// The shared handle to the current record's full encoding.
    /// REQUIRES: `valid()`.
    #[must_use]
    fn raw(&self) -> Entry;
}

/// A cursor over an in-memory vector of records, already sorted by internal
/// key. This is the shape in which the external write buffer hands a flush
/// to the core, and what tests bulk-load tables from.
#[derive(Debug, Clone)]
pub struct VecCursor<C> {
    cmp:     EntryComparator<C>,
    entries: Vec<Entry>,
    /// 0 = before the first entry (invalid); entries are at `1..=len`.
    pos:     usize,
}

impl<C: UserComparator> VecCursor<C> {
    /// `entries` must be sorted by internal key, duplicates excluded.
    #[must_use]
    pub fn new(comparator: C, entries: Vec<Entry>) -> Self {
        Self {
            cmp: EntryComparator::new(comparator),
            entries,
            pos: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn current(&self) -> &Entry {
        assert!(self.valid());
        &self.entries[self.pos - 1]
    }
}

impl<C: UserComparator> TableCursor for VecCursor<C> {
    fn valid(&self) -> bool {
        1 <= self.pos && self.pos <= self.entries.len()
    }

    fn next(&mut self) {
        assert!(self.valid());
        self.pos += 1;
    }

    fn prev(&mut self) {
        assert!(self.valid());
        self.pos -= 1;
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self
            .entries
            .partition_point(|entry| self.cmp.cmp_raw(entry.as_bytes(), target).is_lt())
            + 1;
    }

    fn seek_to_first(&mut self) {
        self.pos = usize::from(!self.entries.is_empty());
    }

    fn seek_to_last(&mut self) {
        self.pos = self.entries.len();
    }

    fn key(&self) -> &[u8] {
        format::decode_prefixed(self.current().as_bytes())
            .expect("flush records are well formed")
            .0
    }

    fn value(&self) -> &[u8] {
        self.current()
            .parse()
            .expect("flush records are well formed")
            .value
    }

    fn raw(&self) -> Entry {
        self.current().clone()
    }
}


#[cfg(test)]
mod tests {
    use crate::comparator::BytewiseComparator;
    use crate::format::{EntryType, LookupKey, SequenceNumber};
    use super::*;

    fn entries() -> Vec<Entry> {
        vec![
            Entry::encode(b"a", SequenceNumber::new(3), EntryType::Value, b"3"),
            Entry::encode(b"a", SequenceNumber::new(1), EntryType::Value, b"1"),
            Entry::encode(b"b", SequenceNumber::new(2), EntryType::Deletion, b""),
        ]
    }

    #[test]
    fn walk_and_seek() {
        let mut cursor = VecCursor::new(BytewiseComparator, entries());
        assert!(!cursor.valid());

        cursor.seek_to_first();
        assert!(cursor.valid());
        assert_eq!(cursor.value(), b"3");
        cursor.next();
        assert_eq!(cursor.value(), b"1");
        cursor.prev();
        assert_eq!(cursor.value(), b"3");

        // Seek at sequence 2 skips the seq-3 record for "a".
        cursor.seek(LookupKey::new(b"a", SequenceNumber::new(2)).encoded());
        assert_eq!(cursor.value(), b"1");

        cursor.seek(LookupKey::new(b"z", SequenceNumber::MAX).encoded());
        assert!(!cursor.valid());

        cursor.seek_to_last();
        let raw = cursor.raw();
        assert_eq!(raw.parse().unwrap().entry_type, EntryType::Deletion);
    }
}
