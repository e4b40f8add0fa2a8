use crate::{
    comparator::{InternalKeyComparator, UserComparator},
    cursor::TableCursor,
    format::{self, Entry},
    table::TableIter,
};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// K-way merge over per-table cursors in internal-key order.
///
/// A simple linear scan over the children picks the current winner; the
/// child counts here are bounded by the point overlap of one index range,
/// which compaction keeps small, so a heap would be overkill.
///
/// Duplicate user keys across children are expected (the same record can
/// transiently live in an old and a replacement table); they surface in
/// order and are deduplicated downstream.
#[derive(Debug)]
pub(crate) struct MergingCursor<C: UserComparator> {
    cmp:       InternalKeyComparator<C>,
    children:  Vec<TableIter<C>>,
    current:   Option<usize>,
    direction: Direction,
}

impl<C: UserComparator> MergingCursor<C> {
    pub(crate) fn new(cmp: InternalKeyComparator<C>, children: Vec<TableIter<C>>) -> Self {
        Self {
            cmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for idx in 0..self.children.len() {
            if !self.children[idx].valid() {
                continue;
            }
            match smallest {
                None => smallest = Some(idx),
                Some(best)
                    if self
                        .cmp
                        .cmp(self.children[idx].key(), self.children[best].key())
                        .is_lt() =>
                {
                    smallest = Some(idx);
                }
                Some(_) => {}
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for idx in (0..self.children.len()).rev() {
            if !self.children[idx].valid() {
                continue;
            }
            match largest {
                None => largest = Some(idx),
                Some(best)
                    if self
                        .cmp
                        .cmp(self.children[idx].key(), self.children[best].key())
                        .is_gt() =>
                {
                    largest = Some(idx);
                }
                Some(_) => {}
            }
        }
        self.current = largest;
    }

    fn current_child(&self) -> &TableIter<C> {
        &self.children[self.current.expect("cursor must be valid")]
    }
}

impl<C: UserComparator> TableCursor for MergingCursor<C> {
    fn valid(&self) -> bool {
        self.current.is_some_and(|idx| self.children[idx].valid())
    }

    fn next(&mut self) {
        assert!(self.valid());
        let current = self.current.expect("checked valid");

        // Ensure every child sits after key(). Moving forward this already
        // holds for the non-current children; after a direction switch they
        // must be repositioned explicitly.
        if self.direction != Direction::Forward {
            let target = format::prefix_internal_key(self.children[current].key());
            let current_key = self.children[current].key().to_vec();
            for idx in 0..self.children.len() {
                if idx == current {
                    continue;
                }
                let child = &mut self.children[idx];
                child.seek(&target);
                if child.valid() && self.cmp.cmp(&current_key, child.key()).is_eq() {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        assert!(self.valid());
        let current = self.current.expect("checked valid");

        // Mirror image of `next`: put every other child strictly before
        // key() after a direction switch.
        if self.direction != Direction::Reverse {
            let target = format::prefix_internal_key(self.children[current].key());
            for idx in 0..self.children.len() {
                if idx == current {
                    continue;
                }
                let child = &mut self.children[idx];
                child.seek(&target);
                if child.valid() {
                    // Child is at the first record >= key(); step back.
                    child.prev();
                } else {
                    // No record >= key(); the child's last record precedes it.
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
        self.direction = Direction::Forward;
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.find_largest();
        self.direction = Direction::Reverse;
    }

    fn key(&self) -> &[u8] {
        self.current_child().key()
    }

    fn value(&self) -> &[u8] {
        self.current_child().value()
    }

    fn raw(&self) -> Entry {
        self.current_child().raw()
    }
}
