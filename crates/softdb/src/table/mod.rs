//! One immutable generation of keys: a frozen skip list of encoded records
//! plus an optional cuckoo side-index for O(1) point-lookup anchors.

mod iter;

pub use self::iter::TableIter;

use std::sync::Arc;

use softdb_nvm::{FrozenSkiplist, SkiplistCursor, SkiplistWriter, cuckoo::CuckooHash};

use crate::{
    comparator::{EntryComparator, UserComparator},
    cursor::TableCursor,
    error::Result,
    format::{self, Entry, EntryType, LookupKey},
};


/// Outcome of a point lookup against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableGet {
    /// A live value for the user key.
    Found(Vec<u8>),
    /// The newest visible record for the user key is a deletion marker.
    FoundTombstone,
    /// The table holds nothing visible for the user key.
    Missing,
}

pub(crate) struct TableInner<C: UserComparator> {
    cmp:  EntryComparator<C>,
    list: FrozenSkiplist<Entry, EntryComparator<C>>,
    hash: Option<CuckooHash>,
}

/// An immutable table of one generation of records.
///
/// Built exactly once by [`NvmTable::build`], then shared: clones are cheap
/// handles onto the same storage, which is how cursors keep their table alive
/// without borrowing from it.
pub struct NvmTable<C: UserComparator> {
    inner: Arc<TableInner<C>>,
}

impl<C: UserComparator> Clone for NvmTable<C> {
    #[inline]
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: UserComparator> std::fmt::Debug for NvmTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvmTable")
            .field("len", &self.len())
            .field("hashed", &self.inner.hash.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: UserComparator> NvmTable<C> {
    /// Bulk-load a table sized for `capacity` records from `iter`.
    ///
    /// Every record is copied — unless `is_compaction` is set, in which case
    /// the cursor donates its record handles and the old and new tables
    /// alias the same bytes. When the table fills up mid-cursor during a
    /// compaction, the cursor is advanced one step past the last inserted
    /// record so the next table begins strictly after this one ends.
    ///
    /// When hashing is enabled, the first-occurrence position of every user
    /// key (its highest sequence) is recorded in the side-index as the
    /// records stream in.
    ///
    /// REQUIRES: `iter.valid()` and `capacity > 0`.
    pub(crate) fn build<I: TableCursor + ?Sized>(
        cmp:           EntryComparator<C>,
        capacity:      usize,
        use_cuckoo:    bool,
        iter:          &mut I,
        is_compaction: bool,
    ) -> Self {
        assert!(iter.valid());
        assert!(capacity > 0);

        let mut list = FrozenSkiplist::new(cmp.clone(), capacity);
        let mut hash = use_cuckoo.then(|| CuckooHash::new(capacity));

        {
            let mut writer = SkiplistWriter::new(&mut list);
            let mut pos: u32 = 0;
            // First occurrence (highest sequence) of the user key currently
            // streaming in.
            let mut current_user_key = user_key_of_cursor(iter).to_vec();
            let mut current_pos: u32 = 1;

            while iter.valid() {
                if let Some(hash) = hash.as_mut() {
                    pos += 1;
                    let user_key = user_key_of_cursor(iter);
                    if !cmp
                        .user_comparator()
                        .cmp(user_key, &current_user_key)
                        .is_eq()
                    {
                        hash.add(&current_user_key, current_pos);
                        current_user_key = user_key.to_vec();
                        current_pos = pos;
                    }
                }

                let entry = if is_compaction {
                    // The compaction cursor donates ownership; the record
                    // keeps its address across the merge.
                    iter.raw()
                } else {
                    Entry::copy_from_encoded(iter.raw().as_bytes())
                };
                if !writer.insert(entry) {
                    break;
                }
                iter.next();
            }
            writer.finish();

            if let Some(hash) = hash.as_mut() {
                hash.add(&current_user_key, current_pos);
            }
        }

        // Stopped at capacity mid-cursor: step past the last inserted record
        // so the follow-up table starts strictly after this one.
        if is_compaction && iter.valid() {
            iter.next();
        }

        Self {
            inner: Arc::new(TableInner { cmp, list, hash }),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.list.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.list.is_empty()
    }

    /// Bytes held by the node array, towers and side-index.
    #[must_use]
    pub fn approximate_bytes(&self) -> usize {
        self.inner.list.size_in_bytes()
            + self.inner.hash.as_ref().map_or(0, CuckooHash::size_in_bytes)
    }

    /// The first (smallest) record. REQUIRES: non-empty.
    #[must_use]
    pub fn first_raw(&self) -> Entry {
        let mut cursor = self.inner.list.cursor();
        cursor.seek_to_first();
        cursor.key().clone()
    }

    /// The last (largest) record. REQUIRES: non-empty.
    #[must_use]
    pub fn last_raw(&self) -> Entry {
        let mut cursor = self.inner.list.cursor();
        cursor.seek_to_last();
        cursor.key().clone()
    }

    /// Point lookup.
    ///
    /// With hashing enabled the probe jumps to the recorded anchor, verifies
    /// the user key, and wave-searches forward to the first record at or
    /// below the lookup sequence. The side-index is advisory: on a miss or a
    /// foreign anchor the lookup falls back to a full skip-list seek.
    ///
    /// A malformed record surfaces as `Corruption`.
    pub fn get(&self, key: &LookupKey) -> Result<TableGet> {
        let inner = &*self.inner;
        let target = Entry::copy_from_encoded(key.encoded());

        let mut cursor = inner.list.cursor();
        if !inner.anchored_probe(&mut cursor, key.user_key(), &target) {
            cursor.seek(&target);
        }

        if cursor.valid() {
            let parsed = cursor.key().parse()?;
            // Same user key: the seek already skipped every record newer
            // than the lookup sequence.
            if inner
                .cmp
                .user_comparator()
                .cmp(parsed.user_key, key.user_key())
                .is_eq()
            {
                return Ok(match parsed.entry_type {
                    EntryType::Value    => TableGet::Found(parsed.value.to_vec()),
                    EntryType::Deletion => TableGet::FoundTombstone,
                });
            }
        }
        Ok(TableGet::Missing)
    }

    /// A cursor over this table's records. The cursor holds a handle to the
    /// table, so it stays usable after the index drops the table.
    #[must_use]
    pub fn cursor(&self) -> TableIter<C> {
        TableIter::new(self.clone())
    }

    /// Cache-line flush the node array and hash buckets. Durability only;
    /// skipped entirely by DRAM-resident configurations.
    pub fn flush(&self) {
        self.inner.list.flush();
        if let Some(hash) = &self.inner.hash {
            hash.flush();
        }
    }

    pub(crate) fn inner(&self) -> &TableInner<C> {
        &self.inner
    }
}

impl<C: UserComparator> TableInner<C> {
    pub(crate) fn list(&self) -> &FrozenSkiplist<Entry, EntryComparator<C>> {
        &self.list
    }

    pub(crate) fn has_hash(&self) -> bool {
        self.hash.is_some()
    }

    /// Try to position `cursor` via the side-index: jump to the anchor
    /// recorded for `user_key`, verify it, then wave-search to the first
    /// record `>= target`. Returns false when the probe cannot be trusted.
    pub(crate) fn anchored_probe(
        &self,
        cursor:   &mut SkiplistCursor<'_, Entry, EntryComparator<C>>,
        user_key: &[u8],
        target:   &Entry,
    ) -> bool {
        let Some(hash) = &self.hash else {
            return false;
        };
        let Some(pos) = hash.find(user_key) else {
            return false;
        };
        debug_assert!(pos > 0);
        if pos as usize > self.list.len() {
            // A collision fabricated a position this table never recorded.
            return false;
        }
        cursor.jump(pos);
        match format::user_key_of(cursor.key().as_bytes()) {
            Ok(anchored) if self.cmp.user_comparator().cmp(anchored, user_key).is_eq() => {
                cursor.wave_seek(target);
                true
            }
            _ => false,
        }
    }
}

/// The user key of the cursor's current record.
fn user_key_of_cursor<I: TableCursor + ?Sized>(iter: &I) -> &[u8] {
    let internal_key = iter.key();
    &internal_key[..internal_key.len() - 8]
}


#[cfg(test)]
mod tests {
    use crate::comparator::BytewiseComparator;
    use crate::cursor::VecCursor;
    use crate::format::SequenceNumber;
    use super::*;

    fn cmp() -> EntryComparator<BytewiseComparator> {
        EntryComparator::new(BytewiseComparator)
    }

    fn record(user_key: &str, sequence: u64, value: &str) -> Entry {
        Entry::encode(
            user_key.as_bytes(),
            SequenceNumber::new(sequence),
            EntryType::Value,
            value.as_bytes(),
        )
    }

    fn tombstone(user_key: &str, sequence: u64) -> Entry {
        Entry::encode(
            user_key.as_bytes(),
            SequenceNumber::new(sequence),
            EntryType::Deletion,
            b"",
        )
    }

    fn build(entries: Vec<Entry>, use_cuckoo: bool) -> NvmTable<BytewiseComparator> {
        let capacity = entries.len();
        let mut iter = VecCursor::new(BytewiseComparator, entries);
        iter.seek_to_first();
        NvmTable::build(cmp(), capacity, use_cuckoo, &mut iter, false)
    }

    fn lookup(user_key: &str, sequence: u64) -> LookupKey {
        LookupKey::new(user_key.as_bytes(), SequenceNumber::new(sequence))
    }

    #[test]
    fn transport_then_get_round_trip() {
        for use_cuckoo in [false, true] {
            let table = build(
                vec![
                    record("apple", 5, "red"),
                    record("apple", 2, "green"),
                    tombstone("banana", 4),
                    record("cherry", 3, "dark"),
                ],
                use_cuckoo,
            );
            assert_eq!(table.len(), 4);

            assert_eq!(
                table.get(&lookup("apple", 10)).unwrap(),
                TableGet::Found(b"red".to_vec()),
            );
            // Sequence-bounded lookup sees the older record.
            assert_eq!(
                table.get(&lookup("apple", 2)).unwrap(),
                TableGet::Found(b"green".to_vec()),
            );
            assert_eq!(
                table.get(&lookup("banana", 9)).unwrap(),
                TableGet::FoundTombstone,
            );
            assert_eq!(
                table.get(&lookup("cherry", 3)).unwrap(),
                TableGet::Found(b"dark".to_vec()),
            );
            assert_eq!(table.get(&lookup("durian", 9)).unwrap(), TableGet::Missing);
            // Visible sequence below the only record for the key.
            assert_eq!(table.get(&lookup("apple", 1)).unwrap(), TableGet::Missing);
        }
    }

    #[test]
    fn transport_donation_shares_bytes() {
        let source = vec![record("k", 3, "v")];
        let original = source[0].clone();

        let mut iter = VecCursor::new(BytewiseComparator, source);
        iter.seek_to_first();
        let donated = NvmTable::build(cmp(), 1, false, &mut iter, true);
        assert!(donated.first_raw().ptr_eq(&original));

        let mut iter = VecCursor::new(BytewiseComparator, vec![original.clone()]);
        iter.seek_to_first();
        let copied = NvmTable::build(cmp(), 1, false, &mut iter, false);
        assert!(!copied.first_raw().ptr_eq(&original));
        assert_eq!(copied.first_raw().as_bytes(), original.as_bytes());
    }

    #[test]
    fn capacity_stop_advances_compaction_cursor() {
        let entries = vec![
            record("a", 1, "1"),
            record("b", 2, "2"),
            record("c", 3, "3"),
        ];
        let mut iter = VecCursor::new(BytewiseComparator, entries);
        iter.seek_to_first();

        let first = NvmTable::build(cmp(), 2, false, &mut iter, true);
        assert_eq!(first.len(), 2);
        // The cursor was advanced past "b"; the next table starts at "c".
        assert!(iter.valid());
        let second = NvmTable::build(cmp(), 2, false, &mut iter, true);
        assert_eq!(second.len(), 1);
        assert_eq!(second.first_raw().parse().unwrap().user_key, b"c");
        assert!(!iter.valid());
    }

    #[test]
    fn first_and_last_raw() {
        let table = build(vec![record("a", 1, "1"), record("z", 2, "26")], true);
        assert_eq!(table.first_raw().parse().unwrap().user_key, b"a");
        assert_eq!(table.last_raw().parse().unwrap().user_key, b"z");
    }

    #[test]
    fn hashed_lookup_matches_plain_lookup_on_duplicates() {
        // Many sequences per user key: the anchor must land on the first
        // occurrence and wave forward to the right sequence.
        let mut entries = Vec::new();
        for key in ["a", "b", "c", "d", "e"] {
            for seq in (1..=20).rev() {
                entries.push(record(key, seq, &format!("{key}@{seq}")));
            }
        }
        let plain = build(entries.clone(), false);
        let hashed = build(entries, true);

        for key in ["a", "c", "e"] {
            for seq in [1_u64, 7, 20, 50] {
                assert_eq!(
                    plain.get(&lookup(key, seq)).unwrap(),
                    hashed.get(&lookup(key, seq)).unwrap(),
                );
            }
        }
    }

    #[test]
    fn flush_keeps_table_readable() {
        let table = build(vec![record("k", 1, "v")], true);
        table.flush();
        assert_eq!(
            table.get(&lookup("k", 1)).unwrap(),
            TableGet::Found(b"v".to_vec()),
        );
        assert!(table.approximate_bytes() > 0);
    }
}
