//! The unlocked interval-skip-list state and its marker algebra.
//!
//! Nodes live in an index-addressed arena; `u32::MAX` marks "no node". The
//! header sits at slot 0 and never moves. All operations here assume the
//! caller holds the appropriate side of the index lock.
//!
//! The marker invariant maintained throughout: for every interval `I` and
//! every edge lying strictly inside `[inf(I), sup(I)]`, exactly one marker
//! for `I` rides the highest such edge, and `I` appears in the `eq_markers`
//! of every node whose key `I` covers. Stabbing then collects, per level,
//! the markers of the edge it descends from — `O(log n + k)`.

use std::cmp::Ordering;

use oorandom::Rand32;

use softdb_nvm::random_height;

use crate::{
    comparator::{EntryComparator, UserComparator},
    format::Entry,
    table::NvmTable,
};
use super::{
    interval::{Interval, IntervalRef},
    node::{IslNode, MarkerList},
};


/// Maximum top-level index of a node tower.
pub(super) const MAX_FORWARD: usize = 32;

/// Update vectors reach one past the highest possible top level.
pub(super) const MAX_LEVELS: usize = MAX_FORWARD + 1;

const NIL: u32 = u32::MAX;
const HEADER: u32 = 0;

/// Range stab result for the scan path: the intervals covering the probe
/// point plus the node keys at which an iterator must re-seek the index.
pub(crate) struct RangeStab<C: UserComparator> {
    pub(crate) intervals: Vec<IntervalRef<C>>,
    /// Key of the last node at or before the probe; `None` at the head.
    pub(crate) left:      Option<Entry>,
    /// Key of the next node after the probe at which some interval starts;
    /// `None` past the last one.
    pub(crate) right:     Option<Entry>,
    pub(crate) overlaps:  usize,
}

pub(super) struct IslCore<C: UserComparator> {
    cmp:            EntryComparator<C>,
    nodes:          Vec<Option<IslNode<C>>>,
    free:           Vec<u32>,
    /// Highest level index currently in use.
    max_level:      usize,
    rng:            Rand32,
    /// Next timestamp to hand out; starts at 1.
    timestamp:      u64,
    interval_count: u64,
}

impl<C: UserComparator> std::fmt::Debug for IslCore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IslCore")
            .field("intervals", &self.interval_count)
            .field("max_level", &self.max_level)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl<C: UserComparator> IslCore<C> {
    pub(super) fn new(cmp: EntryComparator<C>) -> Self {
        Self {
            cmp,
            nodes: vec![Some(IslNode::header(MAX_FORWARD, NIL))],
            free: Vec::new(),
            max_level: 0,
            rng: Rand32::new(0x_dead_beef),
            timestamp: 1,
            interval_count: 0,
        }
    }

    #[inline]
    pub(super) fn interval_count(&self) -> u64 {
        self.interval_count
    }

    #[inline]
    pub(super) fn next_timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub(super) fn increment_timestamp(&mut self) {
        self.timestamp += 1;
    }

    /// Reset to the empty state. Dropping the marker lists drops the
    /// index's interval references; tables still pinned by readers survive
    /// until those readers finish.
    pub(super) fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Some(IslNode::header(MAX_FORWARD, NIL)));
        self.free.clear();
        self.max_level = 0;
        self.timestamp = 1;
        self.interval_count = 0;
    }

    // ================================
    //  Arena plumbing
    // ================================

    #[inline]
    fn node(&self, idx: u32) -> &IslNode<C> {
        self.nodes[idx as usize].as_ref().expect("live node index")
    }

    #[inline]
    fn node_mut(&mut self, idx: u32) -> &mut IslNode<C> {
        self.nodes[idx as usize].as_mut().expect("live node index")
    }

    #[inline]
    fn forward_of(&self, idx: u32, level: usize) -> u32 {
        self.node(idx).forward(level)
    }

    fn alloc_node(&mut self, node: IslNode<C>) -> u32 {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            u32::try_from(self.nodes.len() - 1).expect("node arena stays below 2^32")
        }
    }

    fn free_node(&mut self, idx: u32) {
        self.nodes[idx as usize] = None;
        self.free.push(idx);
    }

    // ================================
    //  Comparisons
    // ================================

    #[inline]
    fn cmp_key(&self, idx: u32, key: &[u8]) -> Ordering {
        self.cmp.cmp_raw(self.node(idx).key().as_bytes(), key)
    }

    #[inline]
    fn node_keys_equal(&self, idx: u32, key: &Entry) -> bool {
        self.cmp
            .cmp_raw(self.node(idx).key().as_bytes(), key.as_bytes())
            .is_eq()
    }

    /// `inf(I) <= key(node) <= sup(I)`.
    fn interval_contains(&self, interval: &IntervalRef<C>, node: u32) -> bool {
        let key = self.node(node).key().as_bytes();
        self.cmp.cmp_raw(interval.inf().as_bytes(), key).is_le()
            && self.cmp.cmp_raw(key, interval.sup().as_bytes()).is_le()
    }

    /// `inf(I) <= key(a)` and `key(b) <= sup(I)`: the edge `(a, b)` lies
    /// inside `I`.
    fn interval_contains_edge(&self, interval: &IntervalRef<C>, a: u32, b: u32) -> bool {
        self.cmp
            .cmp_raw(interval.inf().as_bytes(), self.node(a).key().as_bytes())
            .is_le()
            && self
                .cmp
                .cmp_raw(self.node(b).key().as_bytes(), interval.sup().as_bytes())
                .is_le()
    }

    // ================================
    //  Search
    // ================================

    /// Locate `search_key`, filling `update` with the rightmost node before
    /// it on every level. Returns the first node at or after the key
    /// (`NIL` when past the end).
    fn search(&self, search_key: &[u8], update: &mut [u32; MAX_LEVELS]) -> u32 {
        let mut x = HEADER;
        for i in (0..=self.max_level).rev() {
            loop {
                let next = self.forward_of(x, i);
                if next != NIL && self.cmp_key(next, search_key).is_lt() {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }
        self.forward_of(x, 0)
    }

    /// The last node in the list, or the header when empty.
    fn find_last(&self) -> u32 {
        let mut x = HEADER;
        let mut level = self.max_level;
        loop {
            let next = self.forward_of(x, level);
            if next != NIL {
                x = next;
            } else if level == 0 {
                return x;
            } else {
                level -= 1;
            }
        }
    }

    pub(super) fn first_key(&self) -> Option<Entry> {
        let first = self.forward_of(HEADER, 0);
        (first != NIL).then(|| self.node(first).key().clone())
    }

    pub(super) fn last_key(&self) -> Option<Entry> {
        let last = self.find_last();
        (last != HEADER).then(|| self.node(last).key().clone())
    }

    // ================================
    //  Stabbing queries
    // ================================

    /// Shared descent: walk levels top to bottom; as each level drops, hand
    /// the visitor the markers of the edge descended from — or the node's
    /// `eq_markers` when sitting exactly on the key. Returns the landing
    /// node (last node `<=` the key, or the header).
    fn stab_descent<F: FnMut(&MarkerList<C>)>(&self, search_key: &[u8], mut visit: F) -> u32 {
        let mut x = HEADER;
        let mut i = self.max_level as isize;
        while i >= 0 && (self.node(x).is_header() || !self.cmp_key(x, search_key).is_eq()) {
            let level = i as usize;
            loop {
                let next = self.forward_of(x, level);
                // Advance while the next key is <= the probe.
                if next != NIL && self.cmp_key(next, search_key).is_le() {
                    x = next;
                } else {
                    break;
                }
            }
            let node = self.node(x);
            if !node.is_header() && !self.cmp_key(x, search_key).is_eq() {
                visit(&node.markers[level]);
            } else if !node.is_header() {
                // Sitting on the probe key itself.
                visit(&node.eq_markers);
            }
            i -= 1;
        }
        x
    }

    /// Point stab: every interval containing `search_key`, plus the start
    /// markers of a directly following node with an equal *user* key (so
    /// deletion-vs-write visibility for equal user keys is respected).
    /// Returns the overlap count of the descent (the extra peek does not
    /// count toward it).
    pub(super) fn stab_point(&self, search_key: &[u8], out: &mut Vec<IntervalRef<C>>) -> usize {
        let mut overlaps = 0;
        let x = self.stab_descent(search_key, |list| {
            overlaps += list.count();
            list.copy_into(out);
        });

        let next = self.forward_of(x, 0);
        if next != NIL
            && self
                .cmp
                .cmp_user_raw(self.node(next).key().as_bytes(), search_key)
                .is_eq()
        {
            self.node(next).start_marker.copy_into(out);
        }
        overlaps
    }

    /// Overlap count only; the fast admission test for compaction.
    pub(super) fn stab_count(&self, search_key: &[u8]) -> usize {
        let mut overlaps = 0;
        self.stab_descent(search_key, |list| overlaps += list.count());
        overlaps
    }

    /// Plain stab without the user-key peek, used by the compaction
    /// expansion loops.
    pub(super) fn stab_plain(&self, search_key: &[u8], out: &mut Vec<IntervalRef<C>>) {
        self.stab_descent(search_key, |list| list.copy_into(out));
    }

    /// Range stab for the scan path; see [`RangeStab`].
    pub(super) fn stab_range(&self, search_key: &[u8]) -> RangeStab<C> {
        let mut intervals = Vec::new();
        let mut overlaps = 0;

        if self.interval_count == 0 {
            return RangeStab { intervals, left: None, right: None, overlaps };
        }

        let mut x = HEADER;
        let mut before = HEADER;
        let mut equal = false;
        let mut i = self.max_level as isize;
        while i >= 0 && (self.node(x).is_header() || !self.cmp_key(x, search_key).is_eq()) {
            let level = i as usize;
            loop {
                let next = self.forward_of(x, level);
                if next != NIL && self.cmp_key(next, search_key).is_le() {
                    before = x;
                    x = next;
                } else {
                    break;
                }
            }
            let node = self.node(x);
            if !node.is_header() && !self.cmp_key(x, search_key).is_eq() {
                node.markers[level].copy_into(&mut intervals);
                overlaps += node.markers[level].count();
            } else if !node.is_header() {
                node.eq_markers.copy_into(&mut intervals);
                overlaps += node.eq_markers.count();
                equal = true;
            }
            i -= 1;
        }

        if !equal {
            // x itself is the last node at or before the probe.
            before = x;
        } else {
            // Walk `before` down so its bottom link leads straight to x.
            while i >= 0 {
                let level = i as usize;
                while self.forward_of(before, level) != x {
                    before = self.forward_of(before, level);
                }
                i -= 1;
            }
            debug_assert_eq!(self.forward_of(before, 0), x);
        }

        if before != HEADER {
            self.node(before).end_marker.copy_into(&mut intervals);
        }
        let left = (before != HEADER).then(|| self.node(before).key().clone());

        // Right frontier: the next node after the probe at which some
        // interval starts. Nodes where nothing starts are skipped so the
        // iterator does not re-seek uselessly.
        let mut x = x;
        if x == HEADER {
            x = self.forward_of(x, 0);
            self.node(x).start_marker.copy_into(&mut intervals);
        }
        x = self.forward_of(x, 0);

        while x != NIL {
            if !self.node(x).start_marker.is_empty() {
                // A merge can briefly stack several endpoints here; once it
                // settles, start + end markers sum to one per node.
                self.node(x).start_marker.copy_into(&mut intervals);
                break;
            }
            x = self.forward_of(x, 0);
        }

        let right = (x != NIL).then(|| self.node(x).key().clone());

        RangeStab { intervals, left, right, overlaps }
    }

    /// Compaction stab: the intervals at `search_key` (which must be a node
    /// key) plus the next interval starting strictly inside
    /// `(search_key, right_border)` with a stamp below `time_border`.
    /// Returns that interval's start key, or `None` when the frontier is
    /// exhausted.
    pub(super) fn stab_compaction(
        &self,
        search_key:   &[u8],
        right_border: &Entry,
        time_border:  u64,
        out:          &mut Vec<IntervalRef<C>>,
    ) -> Option<Entry> {
        let x = self.stab_descent(search_key, |list| list.copy_into(out));
        debug_assert!(x != HEADER);
        debug_assert!(self.cmp_key(x, search_key).is_eq());

        let mut after = self.forward_of(x, 0);
        while after != NIL && !self.node(after).key().ptr_eq(right_border) {
            // Start markers are in insertion order, so the first one is the
            // oldest; a racing flush can add a younger one behind it
            // without hiding the frontier.
            let start = &self.node(after).start_marker;
            if start.first().is_some_and(|first| first.stamp() < time_border) {
                start.copy_into(out);
                break;
            }
            after = self.forward_of(after, 0);
        }

        (after != NIL && !self.node(after).key().ptr_eq(right_border))
            .then(|| self.node(after).key().clone())
    }

    // ================================
    //  Insertion
    // ================================

    /// Index a new table generation covering `[inf, sup]`. A zero
    /// `timestamp` allocates the next one (the flush path); compactions
    /// pass their reserved merge timestamp.
    pub(super) fn insert(
        &mut self,
        inf:       Entry,
        sup:       Entry,
        table:     NvmTable<C>,
        timestamp: u64,
    ) -> IntervalRef<C> {
        let stamp = if timestamp == 0 {
            let stamp = self.timestamp;
            self.timestamp += 1;
            stamp
        } else {
            timestamp
        };
        let interval = Interval::new(inf, sup, stamp, table);
        self.link_interval(&interval);
        interval
    }

    fn link_interval(&mut self, interval: &IntervalRef<C>) {
        let inf = interval.inf().clone();
        let sup = interval.sup().clone();
        let left = self.insert_key(&inf);
        let right = self.insert_key(&sup);

        self.node_mut(left).owner_count += 1;
        self.node_mut(left).start_marker.insert(interval.clone());
        self.node_mut(right).owner_count += 1;
        self.node_mut(right).end_marker.insert(interval.clone());

        self.place_markers(left, right, interval);
        self.interval_count += 1;
    }

    /// Find or create the node for `key`, restoring the marker invariant
    /// around a newly spliced-in node.
    fn insert_key(&mut self, key: &Entry) -> u32 {
        let mut update = [HEADER; MAX_LEVELS];
        let x = self.search(key.as_bytes(), &mut update);
        if x != NIL && self.node_keys_equal(x, key) {
            return x;
        }

        let new_top = random_height(&mut self.rng, MAX_FORWARD);
        if new_top > self.max_level {
            // update[max_level+1..=new_top] already point at the header.
            self.max_level = new_top;
        }
        let x = self.alloc_node(IslNode::new(key.clone(), new_top, NIL));

        for i in 0..=new_top {
            let next = self.forward_of(update[i], i);
            self.node_mut(x).set_forward(i, next);
            self.node_mut(update[i]).set_forward(i, x);
        }

        self.adjust_markers_on_insert(x, &update);
        x
    }

    /// Restore the marker invariant after node `x` was spliced in with
    /// update vector `update`.
    ///
    /// Phase 1 fixes the edges leading out of x: markers that still span
    /// the next-higher outgoing edge through x are promoted level by level,
    /// the rest settle on x's level-i edge. Phase 2 mirrors this for the
    /// edges leading into x, where markers may rise at most to the top edge
    /// coming into x. The `promoted` / `new_promoted` / `remove_promoted`
    /// working sets carry state between levels; the phase order is what
    /// keeps every marker on the single highest edge its interval spans.
    fn adjust_markers_on_insert(&mut self, x: u32, update: &[u32; MAX_LEVELS]) {
        let mut promoted: MarkerList<C> = MarkerList::new();
        let mut new_promoted: MarkerList<C> = MarkerList::new();
        let mut remove_promoted: MarkerList<C> = MarkerList::new();

        let x_level = self.node(x).level();

        // Phase 1: edges leading out of x.
        let mut i = 0_usize;
        while i + 2 <= x_level && self.forward_of(x, i + 1) != NIL {
            let x_next = self.forward_of(x, i);
            let x_next_up = self.forward_of(x, i + 1);

            let edge_marks = self.node(update[i]).markers[i].snapshot();
            for m in &edge_marks {
                if self.interval_contains_edge(m, x, x_next_up) {
                    // Promote m off the level-i path it no longer rides.
                    self.remove_mark_from_level(m, i, x_next, x_next_up);
                    new_promoted.insert(m.clone());
                } else {
                    // m stays at this level, now on the edge out of x.
                    // (x->forward[i] already carries it in eq_markers.)
                    self.node_mut(x).markers[i].insert(m.clone());
                }
            }

            let carried = promoted.snapshot();
            for m in &carried {
                if !self.interval_contains_edge(m, x, x_next_up) {
                    // m rises no further; settle it on x's level-i edge.
                    self.node_mut(x).markers[i].insert(m.clone());
                    if self.interval_contains(m, x_next) {
                        self.node_mut(x_next).eq_markers.insert(m.clone());
                    }
                    remove_promoted.insert(m.clone());
                } else {
                    self.remove_mark_from_level(m, i, x_next, x_next_up);
                }
            }
            promoted.remove_all(&remove_promoted);
            remove_promoted.clear();
            promoted.append_from(&new_promoted);
            new_promoted.clear();
            i += 1;
        }

        // Deposit what is still promoted on the top non-null edge out of x,
        // together with the markers riding the same-level edge into x.
        {
            let upd_marks = self.node(update[i]).markers[i].snapshot();
            self.node_mut(x).markers[i].append_from(&promoted);
            self.node_mut(x).markers[i].append_cloned(&upd_marks);

            let x_next = self.forward_of(x, i);
            let carried = promoted.snapshot();
            for m in &carried {
                if x_next != NIL && self.interval_contains(m, x_next) {
                    self.node_mut(x_next).eq_markers.insert(m.clone());
                }
            }
        }

        // Phase 2: edges leading into x. Markers may be promoted as high as
        // the top edge coming into x, but never higher.
        promoted.clear();
        let mut i = 0_usize;
        while i + 2 <= x_level && !self.node(update[i + 1]).is_header() {
            let temp_marks = self.node(update[i]).markers[i].snapshot();
            for m in &temp_marks {
                if self.interval_contains_edge(m, update[i + 1], x) {
                    // m was on every level-i edge between update[i+1] and x,
                    // or the invariant was already broken.
                    new_promoted.insert(m.clone());
                    self.remove_mark_from_level(m, i, update[i + 1], x);
                }
            }

            let carried = promoted.snapshot();
            for m in &carried {
                let keep_here = !self.node(update[i]).is_header()
                    && self.interval_contains_edge(m, update[i], x)
                    && !self.node(update[i + 1]).is_header()
                    && !self.interval_contains_edge(m, update[i + 1], x);
                if keep_here {
                    self.node_mut(update[i]).markers[i].insert(m.clone());
                    if self.interval_contains(m, update[i]) {
                        self.node_mut(update[i]).eq_markers.insert(m.clone());
                    }
                    remove_promoted.insert(m.clone());
                } else {
                    self.remove_mark_from_level(m, i, update[i + 1], x);
                }
            }
            promoted.remove_all(&remove_promoted);
            remove_promoted.clear();
            promoted.append_from(&new_promoted);
            new_promoted.clear();
            i += 1;
        }

        // Either i reached x's top level or update[i+1] is the header; in
        // both cases everything still promoted belongs on the current
        // level-i edge into x. An edge out of the header is never marked —
        // when update[i] is the header, promoted is necessarily empty.
        {
            self.node_mut(update[i]).markers[i].append_from(&promoted);
            let carried = promoted.snapshot();
            for m in &carried {
                if !self.node(update[i]).is_header() && self.interval_contains(m, update[i]) {
                    self.node_mut(update[i]).eq_markers.insert(m.clone());
                }
            }
        }

        // Since x is new, every marker crossing x also covers it.
        for level in 0..x_level {
            let marks = self.node(x).markers[level].snapshot();
            self.node_mut(x).eq_markers.append_cloned(&marks);
        }
    }

    /// Remove `m`'s marker from `markers[level]` and `eq_markers` of every
    /// node on the level-`level` path `[l, r)`, and from `eq_markers` of
    /// `r` itself.
    fn remove_mark_from_level(&mut self, m: &IntervalRef<C>, level: usize, l: u32, r: u32) {
        let mut x = l;
        while x != NIL && x != r {
            self.node_mut(x).markers[level].remove(m);
            self.node_mut(x).eq_markers.remove(m);
            x = self.forward_of(x, level);
        }
        if x != NIL {
            self.node_mut(x).eq_markers.remove(m);
        }
    }

    /// Place the markers for `interval`, whose endpoint nodes are `left`
    /// and `right`: climb the ascending staircase from `left`, marking the
    /// highest edge fully inside the interval at each step, then walk the
    /// non-ascending staircase down to `right`. Every covered node key
    /// picks the interval up in its `eq_markers`.
    fn place_markers(&mut self, left: u32, right: u32, interval: &IntervalRef<C>) {
        let mut x = left;
        if self.interval_contains(interval, x) {
            self.node_mut(x).eq_markers.insert(interval.clone());
        }

        let mut i = 0_usize;
        // Ascending path.
        loop {
            let next = self.forward_of(x, i);
            if next == NIL || !self.interval_contains_edge(interval, x, next) {
                break;
            }
            // Rise to the highest edge out of x inside the interval.
            while i != self.node(x).level() - 1
                && self.forward_of(x, i + 1) != NIL
                && self.interval_contains_edge(interval, x, self.forward_of(x, i + 1))
            {
                i += 1;
            }
            // A null edge is never marked.
            let next = self.forward_of(x, i);
            if next != NIL {
                self.node_mut(x).markers[i].insert(interval.clone());
                x = next;
                if self.interval_contains(interval, x) {
                    self.node_mut(x).eq_markers.insert(interval.clone());
                }
            }
        }

        // Non-ascending path down to the right endpoint.
        while x != right {
            // Drop levels until the edge out of x fits in the interval.
            // i = 0 implies it fits, because x lies strictly inside.
            while i != 0
                && (self.forward_of(x, i) == NIL
                    || !self.interval_contains_edge(interval, x, self.forward_of(x, i)))
            {
                i -= 1;
            }
            self.node_mut(x).markers[i].insert(interval.clone());
            x = self.forward_of(x, i);
            if self.interval_contains(interval, x) {
                self.node_mut(x).eq_markers.insert(interval.clone());
            }
        }
    }

    // ================================
    //  Removal
    // ================================

    /// Unlink `interval`. Returns false — with the index untouched — when
    /// the interval is not currently a member.
    pub(super) fn remove(&mut self, interval: &IntervalRef<C>) -> bool {
        let mut update = [HEADER; MAX_LEVELS];

        let left = self.search(interval.inf().as_bytes(), &mut update);
        if left == NIL
            || self.node(left).owner_count == 0
            || !self.node(left).start_marker.contains(interval)
        {
            return false;
        }
        debug_assert!(self.node_keys_equal(left, interval.inf()));

        self.delete_markers(left, interval);

        self.node_mut(left).start_marker.remove(interval);
        self.node_mut(left).owner_count -= 1;
        if self.node(left).owner_count == 0 {
            self.remove_node(left, &update);
        }

        // Search for the right endpoint only after the left node is gone:
        // some of its forward pointers may have led to the right node, and
        // the update vector must not reference a freed slot.
        let right = self.search(interval.sup().as_bytes(), &mut update);
        if right == NIL || self.node(right).owner_count == 0 {
            return false;
        }
        debug_assert!(self.node_keys_equal(right, interval.sup()));

        self.node_mut(right).end_marker.remove(interval);
        self.node_mut(right).owner_count -= 1;
        if self.node(right).owner_count == 0 {
            self.remove_node(right, &update);
        }

        self.interval_count -= 1;
        true
    }

    /// Mirror of [`Self::place_markers`]: strip the interval's markers
    /// along the same staircase, starting at its left endpoint node.
    fn delete_markers(&mut self, left: u32, interval: &IntervalRef<C>) {
        let mut x = left;
        if self.interval_contains(interval, x) {
            self.node_mut(x).eq_markers.remove(interval);
        }

        let mut i = 0_usize;
        // Ascending path.
        loop {
            let next = self.forward_of(x, i);
            if next == NIL || !self.interval_contains_edge(interval, x, next) {
                break;
            }
            while i != self.node(x).level() - 1
                && self.forward_of(x, i + 1) != NIL
                && self.interval_contains_edge(interval, x, self.forward_of(x, i + 1))
            {
                i += 1;
            }
            let next = self.forward_of(x, i);
            if next != NIL {
                self.node_mut(x).markers[i].remove(interval);
                x = next;
                if self.interval_contains(interval, x) {
                    self.node_mut(x).eq_markers.remove(interval);
                }
            }
        }

        // Non-ascending path down to the right endpoint.
        while !self.node_keys_equal(x, interval.sup()) {
            while i != 0
                && (self.forward_of(x, i) == NIL
                    || !self.interval_contains_edge(interval, x, self.forward_of(x, i)))
            {
                i -= 1;
            }
            self.node_mut(x).markers[i].remove(interval);
            x = self.forward_of(x, i);
            if self.interval_contains(interval, x) {
                self.node_mut(x).eq_markers.remove(interval);
            }
        }
    }

    /// Splice out node `x` (whose own interval markers are already gone),
    /// demoting markers that rode its levels first.
    fn remove_node(&mut self, x: u32, update: &[u32; MAX_LEVELS]) {
        self.adjust_markers_on_delete(x, update);

        let x_level = self.node(x).level();
        for i in 0..x_level {
            let next = self.forward_of(x, i);
            self.node_mut(update[i]).set_forward(i, next);
        }
        self.free_node(x);
    }

    /// Mirror of [`Self::adjust_markers_on_insert`], run before node `x` is
    /// spliced out: markers that rode a level only because x was there are
    /// demoted onto the lower-level paths that remain.
    fn adjust_markers_on_delete(&mut self, x: u32, update: &[u32; MAX_LEVELS]) {
        let mut demoted: MarkerList<C> = MarkerList::new();
        let mut new_demoted: MarkerList<C> = MarkerList::new();
        let mut temp_removed: MarkerList<C> = MarkerList::new();

        let x_level = self.node(x).level();

        // Phase 1: lower markers on the edges entering x from the left.
        for i in (0..x_level).rev() {
            let x_next = self.forward_of(x, i);

            // Marks on the level-i edge into x that no longer span the
            // edge that will replace it.
            let edge_marks = self.node(update[i]).markers[i].snapshot();
            for m in &edge_marks {
                if x_next == NIL || !self.interval_contains_edge(m, update[i], x_next) {
                    new_demoted.insert(m.clone());
                }
            }
            self.node_mut(update[i]).markers[i].remove_all(&new_demoted);
            // update[i]'s eq_markers stay as they are: whatever was there
            // before demotion must still be there afterwards.

            let carried = demoted.snapshot();
            for m in &carried {
                // Re-mark level i from update[i+1] to update[i]. update[i+1]
                // itself needs only the edge mark; its eq_markers already
                // carry m.
                let mut y = update[i + 1];
                while y != NIL && y != update[i] {
                    if y != update[i + 1] && self.interval_contains(m, y) {
                        self.node_mut(y).eq_markers.insert(m.clone());
                    }
                    self.node_mut(y).markers[i].insert(m.clone());
                    y = self.forward_of(y, i);
                }
                if y != NIL && y != update[i + 1] && self.interval_contains(m, y) {
                    self.node_mut(y).eq_markers.insert(m.clone());
                }

                // If this is the lowest level m must drop to, settle it on
                // the level-i edge out of update[i].
                if x_next != NIL && self.interval_contains_edge(m, update[i], x_next) {
                    self.node_mut(update[i]).markers[i].insert(m.clone());
                    temp_removed.insert(m.clone());
                }
            }
            demoted.remove_all(&temp_removed);
            temp_removed.clear();
            demoted.append_from(&new_demoted);
            new_demoted.clear();
        }

        // Phase 2: lower markers on the edges leaving x to the right.
        demoted.clear();

        for i in (0..x_level).rev() {
            let x_next = self.forward_of(x, i);

            let x_marks = self.node(x).markers[i].snapshot();
            for m in &x_marks {
                if x_next != NIL
                    && (self.node(update[i]).is_header()
                        || !self.interval_contains_edge(m, update[i], x_next))
                {
                    new_demoted.insert(m.clone());
                }
            }

            let carried = demoted.snapshot();
            if !carried.is_empty() {
                // carried is empty at x's top level, so i + 1 is in range
                // whenever this runs.
                let stop = self.forward_of(x, i + 1);
                for m in &carried {
                    // Re-mark level i from x->forward[i] up to but not
                    // including x->forward[i+1], which is already marked.
                    let mut y = x_next;
                    while y != stop {
                        self.node_mut(y).eq_markers.insert(m.clone());
                        self.node_mut(y).markers[i].insert(m.clone());
                        y = self.forward_of(y, i);
                    }

                    if x_next != NIL
                        && !self.node(update[i]).is_header()
                        && self.interval_contains_edge(m, update[i], x_next)
                    {
                        temp_removed.insert(m.clone());
                    }
                }
            }
            demoted.remove_all(&temp_removed);
            temp_removed.clear();
            demoted.append_from(&new_demoted);
            new_demoted.clear();
        }
    }
}
