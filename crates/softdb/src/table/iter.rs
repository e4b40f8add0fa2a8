use crate::{
    comparator::UserComparator,
    cursor::TableCursor,
    format::{self, Entry},
};
use super::NvmTable;


/// Cursor over one [`NvmTable`].
///
/// Owns a handle to its table, so it remains usable after the interval index
/// has dropped the table — exactly what lets readers keep scanning through a
/// concurrent compaction. Positions mirror the frozen skip list's: `0` is
/// the head, `count + 1` the tail.
#[derive(Debug, Clone)]
pub struct TableIter<C: UserComparator> {
    table: NvmTable<C>,
    pos:   u32,
}

impl<C: UserComparator> TableIter<C> {
    pub(super) fn new(table: NvmTable<C>) -> Self {
        Self { table, pos: 0 }
    }

    fn current(&self) -> &Entry {
        self.table.inner().list().cursor_at(self.pos).key()
    }
}

impl<C: UserComparator> TableCursor for TableIter<C> {
    fn valid(&self) -> bool {
        1 <= self.pos && self.pos as usize <= self.table.len()
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
        let inner = self.table.inner();
        let target = Entry::copy_from_encoded(target);
        let mut cursor = inner.list().cursor();

        // Anchor through the side-index when the target's user key is
        // present; otherwise (or without a hash) run the full descent.
        let anchored = inner.has_hash()
            && format::user_key_of(target.as_bytes())
                .is_ok_and(|user_key| inner.anchored_probe(&mut cursor, user_key, &target));
        if !anchored {
            cursor.seek(&target);
        }
        self.pos = cursor.raw_position();
    }

    fn seek_to_first(&mut self) {
        self.pos = 1;
    }

    fn seek_to_last(&mut self) {
        self.pos = self.table.len() as u32;
    }

    fn key(&self) -> &[u8] {
        format::decode_prefixed(self.current().as_bytes())
            .expect("stored records are well formed")
            .0
    }

    fn value(&self) -> &[u8] {
        let (_, rest) = format::decode_prefixed(self.current().as_bytes())
            .expect("stored records are well formed");
        format::decode_prefixed(rest)
            .expect("stored records are well formed")
            .0
    }

    fn raw(&self) -> Entry {
        self.current().clone()
    }
}
