use oorandom::Rand32;

use super::{ASSOC, kick_slot};


/// Outcome of offering a slot to a bucket.
pub(super) enum SlotInsert {
    /// Stored in a free slot.
    Stored,
    /// Bucket full and kicking was not allowed.
    Rejected,
    /// Bucket full; a random resident was displaced and is returned.
    Kicked(u64),
}

/// Flat bucket storage of 64-bit slots: the high 32 bits hold a non-zero tag,
/// the low 32 bits a payload position. A zero slot is empty.
#[derive(Debug)]
pub(super) struct SlotTable {
    slots:       Vec<u64>,
    num_buckets: usize,
}

impl SlotTable {
    pub(super) fn new(num_buckets: usize) -> Self {
        Self {
            slots: vec![0; num_buckets * ASSOC],
            num_buckets,
        }
    }

    #[inline]
    pub(super) fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub(super) fn size_in_bytes(&self) -> usize {
        self.slots.len() * size_of::<u64>()
    }

    pub(super) fn slots(&self) -> &[u64] {
        &self.slots
    }

    #[inline]
    fn read_slot(&self, bucket: usize, slot: usize) -> u64 {
        self.slots[bucket * ASSOC + slot]
    }

    #[inline]
    fn write_slot(&mut self, bucket: usize, slot: usize, value: u64) {
        self.slots[bucket * ASSOC + slot] = value;
    }

    /// Search both candidate buckets for `tag`, interleaved, returning the
    /// first matching slot's payload.
    pub(super) fn find_slot(&self, bucket1: usize, bucket2: usize, tag: u32) -> Option<u32> {
        for slot in 0..ASSOC {
            let candidate = self.read_slot(bucket1, slot);
            if candidate != 0 && (candidate >> 32) as u32 == tag {
                return Some(candidate as u32);
            }
            if bucket2 != bucket1 {
                let candidate = self.read_slot(bucket2, slot);
                if candidate != 0 && (candidate >> 32) as u32 == tag {
                    return Some(candidate as u32);
                }
            }
        }
        None
    }

    /// Clear the first slot in `bucket` holding `tag`.
    pub(super) fn delete_tag(&mut self, bucket: usize, tag: u32) -> bool {
        for slot in 0..ASSOC {
            if (self.read_slot(bucket, slot) >> 32) as u32 == tag {
                self.write_slot(bucket, slot, 0);
                return true;
            }
        }
        false
    }

    pub(super) fn insert_slot(
        &mut self,
        bucket:  usize,
        value:   u64,
        kickout: bool,
        rng:     &mut Rand32,
    ) -> SlotInsert {
        for slot in 0..ASSOC {
            if self.read_slot(bucket, slot) == 0 {
                self.write_slot(bucket, slot, value);
                return SlotInsert::Stored;
            }
        }
        if kickout {
            let slot = kick_slot(rng);
            let displaced = self.read_slot(bucket, slot);
            self.write_slot(bucket, slot, value);
            SlotInsert::Kicked(displaced)
        } else {
            SlotInsert::Rejected
        }
    }
}

/// Tag-only sibling of [`SlotTable`], used by the membership filter.
/// A zero tag is empty.
#[derive(Debug)]
pub(super) struct TagTable {
    tags:        Vec<u32>,
    num_buckets: usize,
}

impl TagTable {
    pub(super) fn new(num_buckets: usize) -> Self {
        Self {
            tags: vec![0; num_buckets * ASSOC],
            num_buckets,
        }
    }

    #[inline]
    pub(super) fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub(super) fn size_in_bytes(&self) -> usize {
        self.tags.len() * size_of::<u32>()
    }

    #[inline]
    fn read_tag(&self, bucket: usize, slot: usize) -> u32 {
        self.tags[bucket * ASSOC + slot]
    }

    #[inline]
    fn write_tag(&mut self, bucket: usize, slot: usize, tag: u32) {
        self.tags[bucket * ASSOC + slot] = tag;
    }

    pub(super) fn find_tag(&self, bucket1: usize, bucket2: usize, tag: u32) -> bool {
        for slot in 0..ASSOC {
            if self.read_tag(bucket1, slot) == tag {
                return true;
            }
            if bucket2 != bucket1 && self.read_tag(bucket2, slot) == tag {
                return true;
            }
        }
        false
    }

    pub(super) fn delete_tag(&mut self, bucket: usize, tag: u32) -> bool {
        for slot in 0..ASSOC {
            if self.read_tag(bucket, slot) == tag {
                self.write_tag(bucket, slot, 0);
                return true;
            }
        }
        false
    }

    pub(super) fn insert_tag(
        &mut self,
        bucket:  usize,
        tag:     u32,
        kickout: bool,
        rng:     &mut Rand32,
    ) -> SlotInsert {
        for slot in 0..ASSOC {
            if self.read_tag(bucket, slot) == 0 {
                self.write_tag(bucket, slot, tag);
                return SlotInsert::Stored;
            }
        }
        if kickout {
            let slot = kick_slot(rng);
            let displaced = self.read_tag(bucket, slot);
            self.write_tag(bucket, slot, tag);
            SlotInsert::Kicked(u64::from(displaced))
        } else {
            SlotInsert::Rejected
        }
    }
}
