use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use oorandom::Rand32;

use crate::{interface::Compare, node_heights::random_height, persist};


/// Maximum tower height. One node in ~4 million reaches it.
const MAX_HEIGHT: usize = 12;

/// Tower slot marking "no further node on this level", i.e. the tail.
const NIL: u32 = u32::MAX;

/// The head sentinel's position.
const HEAD: u32 = 0;

struct Node<K> {
    key:      K,
    /// Forward positions, one per level; length is this node's height.
    next:     Box<[u32]>,
    /// Set by [`SkiplistCursor::abandon`]; reserved for a future GC pass.
    obsolete: AtomicBool,
}

/// A multi-level skip list built over a contiguous node array.
///
/// The list is bulk-loaded in ascending key order through a
/// [`SkiplistWriter`] and frozen afterwards; there is no online insert and
/// no per-node allocator churn. Storing nodes in one array gives O(1)
/// seek-to-first/seek-to-last and O(1) positional [`jump`], which is what the
/// cuckoo side-index exploits: a hash hit supplies a slot number, and
/// [`wave_seek`] finishes the lookup from that anchor without a full descent
/// from the head.
///
/// Positions are 1-based; `0` is the head sentinel and `count + 1` the tail.
///
/// [`jump`]: SkiplistCursor::jump
/// [`wave_seek`]: SkiplistCursor::wave_seek
pub struct FrozenSkiplist<K, C> {
    cmp:        C,
    nodes:      Vec<Node<K>>,
    head_tower: [u32; MAX_HEIGHT],
    capacity:   usize,
    max_height: usize,
    rng:        Rand32,
}

impl<K, C> std::fmt::Debug for FrozenSkiplist<K, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenSkiplist")
            .field("len", &self.nodes.len())
            .field("capacity", &self.capacity)
            .field("max_height", &self.max_height)
            .finish_non_exhaustive()
    }
}

impl<K, C: Compare<K>> FrozenSkiplist<K, C> {
    /// Create an empty list able to hold `capacity` keys.
    #[must_use]
    pub fn new(cmp: C, capacity: usize) -> Self {
        Self::new_seeded(cmp, capacity, 0x_dead_beef)
    }

    #[must_use]
    pub fn new_seeded(cmp: C, capacity: usize, seed: u64) -> Self {
        Self {
            cmp,
            nodes: Vec::with_capacity(capacity),
            head_tower: [NIL; MAX_HEIGHT],
            capacity,
            max_height: 1,
            rng: Rand32::new(seed),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true iff a key comparing equal to `key` is in the list.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let pos = self.find_greater_or_equal(key);
        pos != NIL && self.cmp.eq(key, self.key_at(pos))
    }

    #[inline]
    #[must_use]
    pub fn cursor(&self) -> SkiplistCursor<'_, K, C> {
        SkiplistCursor { list: self, pos: 0 }
    }

    /// A cursor restored to a previously observed [`raw position`].
    ///
    /// `pos` must be in `[0, count + 1]` (head and tail included).
    ///
    /// [`raw position`]: SkiplistCursor::raw_position
    #[inline]
    #[must_use]
    pub fn cursor_at(&self, pos: u32) -> SkiplistCursor<'_, K, C> {
        assert!(pos as usize <= self.len() + 1);
        SkiplistCursor { list: self, pos }
    }

    /// Total bytes held by the node array and the forward towers.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        let towers: usize = self.nodes.iter().map(|node| node.next.len()).sum();
        size_of::<Self>()
            + self.nodes.capacity() * size_of::<Node<K>>()
            + towers * size_of::<u32>()
    }

    /// Cache-line flush every node's forward tower, then the node array.
    /// No logical effect; durability only.
    pub fn flush(&self) {
        for node in &self.nodes {
            persist::clflush_slice(&node.next);
            persist::clflush_value(node);
        }
        persist::clflush_slice(&self.nodes);
        persist::mfence();
    }

    /// Key at 1-based position `pos`; `pos` must address a stored key.
    #[inline]
    fn key_at(&self, pos: u32) -> &K {
        &self.nodes[pos as usize - 1].key
    }

    #[inline]
    fn height_at(&self, pos: u32) -> usize {
        self.nodes[pos as usize - 1].next.len()
    }

    /// Forward position from `pos` at `level`. `pos` may be the head.
    #[inline]
    fn next_pos(&self, pos: u32, level: usize) -> u32 {
        if pos == HEAD {
            self.head_tower[level]
        } else {
            self.nodes[pos as usize - 1].next[level]
        }
    }

    fn set_next(&mut self, pos: u32, level: usize, target: u32) {
        if pos == HEAD {
            self.head_tower[level] = target;
        } else {
            self.nodes[pos as usize - 1].next[level] = target;
        }
    }

    /// True iff `key` sorts strictly after the node at `pos` (the tail is
    /// treated as infinite).
    #[inline]
    fn key_is_after_node(&self, key: &K, pos: u32) -> bool {
        pos != NIL && self.cmp.cmp(self.key_at(pos), key).is_lt()
    }

    /// First position whose key is `>= key`, or [`NIL`].
    fn find_greater_or_equal(&self, key: &K) -> u32 {
        let mut x = HEAD;
        let mut level = self.max_height - 1;
        let mut next = self.next_pos(x, level);
        // Cache the position already compared on the level above, so the
        // descent never compares the same key twice.
        let mut compared: Option<u32> = None;
        loop {
            if compared != Some(next) && self.key_is_after_node(key, next) {
                // Keep searching in this level's list.
                x = next;
            } else if level == 0 {
                return next;
            } else {
                // Switch to the next level down.
                level -= 1;
                compared = Some(next);
            }
            next = self.next_pos(x, level);
        }
    }

    /// First position `>= key`, searching only forward from `anchor`.
    ///
    /// The anchor is the first occurrence of a user key (its highest
    /// sequence), so any entry `>= key` for that user key lies at or after
    /// it. The walk first rides each node's own top level forward
    /// (non-descending), then descends like a normal search (non-ascending).
    fn wave_search(&self, anchor: u32, key: &K) -> u32 {
        if !self.key_is_after_node(key, anchor) {
            return anchor;
        }
        let mut x = anchor;
        let mut next = self.next_pos(x, self.height_at(x) - 1);
        while self.key_is_after_node(key, next) {
            x = next;
            next = self.next_pos(x, self.height_at(x) - 1);
        }
        // Now x.key < key <= next.key at x's top level.
        let mut level = self.height_at(x) - 1;
        next = self.next_pos(x, level);
        let mut compared: Option<u32> = None;
        loop {
            if compared != Some(next) && self.key_is_after_node(key, next) {
                x = next;
            } else if level == 0 {
                return next;
            } else {
                level -= 1;
                compared = Some(next);
            }
            next = self.next_pos(x, level);
        }
    }
}

/// Single-pass bulk loader.
///
/// Maintains a `prev` tower of the rightmost node reached on every level and
/// links each arriving key into all levels of its freshly drawn height. Keys
/// must arrive in strictly ascending order.
#[derive(Debug)]
pub struct SkiplistWriter<'a, K, C> {
    list: &'a mut FrozenSkiplist<K, C>,
    prev: [u32; MAX_HEIGHT],
}

impl<'a, K, C: Compare<K>> SkiplistWriter<'a, K, C> {
    #[must_use]
    pub fn new(list: &'a mut FrozenSkiplist<K, C>) -> Self {
        Self {
            list,
            prev: [HEAD; MAX_HEIGHT],
        }
    }

    /// Append `key` after every key inserted so far. Returns false when the
    /// list has just reached capacity, i.e. when no further insert may
    /// follow.
    pub fn insert(&mut self, key: K) -> bool {
        let list = &mut *self.list;
        debug_assert!(list.nodes.len() < list.capacity);
        debug_assert!(
            list.nodes
                .last()
                .is_none_or(|last| list.cmp.cmp(&last.key, &key).is_lt()),
            "bulk-loaded keys must be strictly ascending",
        );

        let pos = list.nodes.len() as u32 + 1;
        let height = random_height(&mut list.rng, MAX_HEIGHT);
        list.nodes.push(Node {
            key,
            next: vec![NIL; height].into_boxed_slice(),
            obsolete: AtomicBool::new(false),
        });
        if height > list.max_height {
            list.max_height = height;
        }
        for level in 0..height {
            list.set_next(self.prev[level], level, pos);
            self.prev[level] = pos;
        }
        list.nodes.len() != list.capacity
    }

    /// Seal the list. Every tower already terminates at the tail (slots are
    /// initialized to the tail marker), so this only consumes the writer.
    pub fn finish(self) {}
}

/// Cursor over a [`FrozenSkiplist`].
///
/// The cursor is at head, at tail, or on a stored key; navigation other than
/// `seek*`/`jump` requires a valid position. Stepping is positional (the
/// nodes are physically sorted), towers are only consulted by seeks.
#[derive(Debug)]
pub struct SkiplistCursor<'a, K, C> {
    list: &'a FrozenSkiplist<K, C>,
    pos:  u32,
}

impl<'a, K, C: Compare<K>> SkiplistCursor<'a, K, C> {
    #[inline]
    #[must_use]
    pub fn valid(&self) -> bool {
        1 <= self.pos && self.pos as usize <= self.list.len()
    }

    /// # Panics
    /// Panics if the cursor is not on a stored key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &'a K {
        assert!(self.valid());
        self.list.key_at(self.pos)
    }

    /// Current 1-based position. Stable for the life of the list, so it can
    /// be recorded in a side-index.
    #[inline]
    #[must_use]
    pub fn position(&self) -> u32 {
        assert!(self.valid());
        self.pos
    }

    /// Current position without the validity requirement: `0` at head,
    /// `count + 1` at tail. Lets a by-value cursor persist its state and
    /// restore it with [`FrozenSkiplist::cursor_at`].
    #[inline]
    #[must_use]
    pub fn raw_position(&self) -> u32 {
        self.pos
    }

    pub fn next(&mut self) {
        assert!(self.valid());
        self.pos += 1;
    }

    pub fn prev(&mut self) {
        assert!(self.valid());
        self.pos -= 1;
    }

    /// Advance to the first key `>= target`.
    pub fn seek(&mut self, target: &K) {
        self.pos = self.tail_clamped(self.list.find_greater_or_equal(target));
    }

    pub fn seek_to_first(&mut self) {
        self.pos = 1;
    }

    pub fn seek_to_last(&mut self) {
        self.pos = self.list.len() as u32;
    }

    /// Jump straight to a side-index position in `[1, count]`.
    pub fn jump(&mut self, pos: u32) {
        assert!(1 <= pos && pos as usize <= self.list.len());
        self.pos = pos;
    }

    /// Anchored search forward from the current position.
    ///
    /// REQUIRES: [`Self::jump`] was called and the anchor's user key matched
    /// the target's.
    pub fn wave_seek(&mut self, target: &K) {
        assert!(self.valid());
        self.pos = self.tail_clamped(self.list.wave_search(self.pos, target));
    }

    /// Mark the current key obsolete without removing it. Nothing consults
    /// the flag yet; it is reserved for a future GC pass.
    pub fn abandon(&self) {
        assert!(self.valid());
        self.list.nodes[self.pos as usize - 1]
            .obsolete
            .store(true, AtomicOrdering::Relaxed);
    }

    #[must_use]
    pub fn key_is_obsolete(&self) -> bool {
        assert!(self.valid());
        self.list.nodes[self.pos as usize - 1]
            .obsolete
            .load(AtomicOrdering::Relaxed)
    }

    /// Map the seek result [`NIL`] onto the tail position so that positional
    /// stepping keeps working after a failed seek.
    #[inline]
    fn tail_clamped(&self, pos: u32) -> u32 {
        if pos == NIL {
            self.list.len() as u32 + 1
        } else {
            pos
        }
    }
}


#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;

    #[derive(Clone, Copy, Debug)]
    struct U64Cmp;

    impl Compare<u64> for U64Cmp {
        fn cmp(&self, lhs: &u64, rhs: &u64) -> Ordering {
            lhs.cmp(rhs)
        }
    }

    fn load(values: &[u64]) -> FrozenSkiplist<u64, U64Cmp> {
        let mut list = FrozenSkiplist::new(U64Cmp, values.len());
        let mut writer = SkiplistWriter::new(&mut list);
        for (idx, &v) in values.iter().enumerate() {
            let has_room = writer.insert(v);
            assert_eq!(has_room, idx + 1 != values.len());
        }
        writer.finish();
        list
    }

    #[test]
    fn empty_list() {
        let list: FrozenSkiplist<u64, U64Cmp> = FrozenSkiplist::new(U64Cmp, 8);
        assert!(list.is_empty());
        assert!(!list.contains(&42));

        let mut cursor = list.cursor();
        assert!(!cursor.valid());
        cursor.seek_to_first();
        assert!(!cursor.valid());
        cursor.seek(&42);
        assert!(!cursor.valid());
    }

    #[test]
    fn ordered_iteration() {
        let values: Vec<u64> = (0..500).map(|i| i * 3).collect();
        let list = load(&values);
        let mut cursor = list.cursor();

        cursor.seek_to_first();
        for &v in &values {
            assert!(cursor.valid());
            assert_eq!(*cursor.key(), v);
            cursor.next();
        }
        assert!(!cursor.valid());

        cursor.seek_to_last();
        for &v in values.iter().rev() {
            assert!(cursor.valid());
            assert_eq!(*cursor.key(), v);
            cursor.prev();
        }
        assert!(!cursor.valid());
    }

    #[test]
    fn seek_matches_linear_scan() {
        let mut rng = Rand32::new(0x_5eed);
        let mut values: Vec<u64> = (0..300).map(|_| u64::from(rng.rand_u32() % 10_000)).collect();
        values.sort_unstable();
        values.dedup();
        let list = load(&values);
        let mut cursor = list.cursor();

        for _ in 0..1000 {
            let target = u64::from(rng.rand_u32() % 10_500);
            cursor.seek(&target);
            match values.iter().find(|&&v| v >= target) {
                Some(&expected) => {
                    assert!(cursor.valid());
                    assert_eq!(*cursor.key(), expected);
                }
                None => assert!(!cursor.valid()),
            }
        }
    }

    #[test]
    fn wave_seek_from_anchor() {
        let values: Vec<u64> = (1..=200).map(|i| i * 5).collect();
        let list = load(&values);
        let mut cursor = list.cursor();

        // Anchor at position 1, target far ahead.
        cursor.jump(1);
        cursor.wave_seek(&503);
        assert_eq!(*cursor.key(), 505);

        // Target at or before the anchor stays put.
        cursor.jump(40);
        let anchored = *cursor.key();
        cursor.wave_seek(&anchored);
        assert_eq!(*cursor.key(), anchored);

        // Target past the end invalidates.
        cursor.jump(195);
        cursor.wave_seek(&10_000);
        assert!(!cursor.valid());
    }

    #[test]
    fn wave_seek_agrees_with_seek() {
        let mut rng = Rand32::new(99);
        let mut values: Vec<u64> = (0..400).map(|_| u64::from(rng.rand_u32() % 50_000)).collect();
        values.sort_unstable();
        values.dedup();
        let list = load(&values);

        for _ in 0..500 {
            let anchor_idx = rng.rand_u32() % values.len() as u32;
            let target = values[anchor_idx as usize] + u64::from(rng.rand_u32() % 1000);

            let mut plain = list.cursor();
            plain.seek(&target);

            let mut anchored = list.cursor();
            anchored.jump(anchor_idx + 1);
            anchored.wave_seek(&target);

            assert_eq!(plain.valid(), anchored.valid());
            if plain.valid() {
                assert_eq!(plain.key(), anchored.key());
            }
        }
    }

    #[test]
    fn contains_and_positions() {
        let values = [10_u64, 20, 30];
        let list = load(&values);
        assert!(list.contains(&20));
        assert!(!list.contains(&25));

        let mut cursor = list.cursor();
        cursor.seek(&20);
        assert_eq!(cursor.position(), 2);
        cursor.jump(3);
        assert_eq!(*cursor.key(), 30);
    }

    #[test]
    fn flush_preserves_contents() {
        let values: Vec<u64> = (0..100).collect();
        let list = load(&values);
        list.flush();
        let mut cursor = list.cursor();
        cursor.seek(&57);
        assert_eq!(*cursor.key(), 57);
        assert!(list.size_in_bytes() > 0);
    }
}
