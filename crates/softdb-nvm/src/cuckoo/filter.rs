use oorandom::Rand32;

use super::{MAX_KICK_COUNT, alt_index, bucket_count, hash_key, index_hash, tag_hash};
use super::table::{SlotInsert, TagTable};


#[derive(Debug, Clone, Copy)]
struct Victim {
    bucket: usize,
    tag:    u32,
}

/// Tag-only membership filter with the same bucket geometry as
/// [`CuckooHash`](super::CuckooHash).
///
/// Answers "possibly present" / "definitely absent" with the usual cuckoo
/// filter false-positive rate; unlike a Bloom filter it supports deletion.
#[derive(Debug)]
pub struct CuckooFilter {
    table:     TagTable,
    num_items: usize,
    victim:    Option<Victim>,
    rng:       Rand32,
}

impl CuckooFilter {
    /// A filter sized for `max_num_keys` distinct keys.
    #[must_use]
    pub fn new(max_num_keys: usize) -> Self {
        Self {
            table:     TagTable::new(bucket_count(max_num_keys)),
            num_items: 0,
            victim:    None,
            rng:       Rand32::new(0x_f117_e4),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_items
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_items == 0
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.table.size_in_bytes()
    }

    /// Returns false only when the victim slot is already occupied.
    pub fn add(&mut self, key: &[u8]) -> bool {
        if self.victim.is_some() {
            return false;
        }
        let (bucket, tag) = self.index_and_tag(key);
        self.add_tag(bucket, tag);
        true
    }

    fn add_tag(&mut self, bucket: usize, tag: u32) {
        let mut cur_bucket = bucket;
        let mut cur_tag = tag;
        for count in 0..MAX_KICK_COUNT {
            let kickout = count > 0;
            match self.table.insert_tag(cur_bucket, cur_tag, kickout, &mut self.rng) {
                SlotInsert::Stored => {
                    self.num_items += 1;
                    return;
                }
                SlotInsert::Kicked(displaced) => cur_tag = displaced as u32,
                SlotInsert::Rejected => {}
            }
            cur_bucket = alt_index(cur_bucket, cur_tag, self.table.num_buckets());
        }
        self.victim = Some(Victim {
            bucket: cur_bucket,
            tag:    cur_tag,
        });
        self.num_items += 1;
    }

    /// Possibly-present check, subject to the tag false-positive rate.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        let (bucket1, tag) = self.index_and_tag(key);
        let bucket2 = alt_index(bucket1, tag, self.table.num_buckets());

        if let Some(victim) = self.victim {
            if victim.tag == tag && (bucket1 == victim.bucket || bucket2 == victim.bucket) {
                return true;
            }
        }
        self.table.find_tag(bucket1, bucket2, tag)
    }

    /// Remove one occurrence of `key`'s tag and re-seat the parked victim.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let (bucket1, tag) = self.index_and_tag(key);
        let bucket2 = alt_index(bucket1, tag, self.table.num_buckets());

        if self.table.delete_tag(bucket1, tag) || self.table.delete_tag(bucket2, tag) {
            self.num_items -= 1;
            if let Some(victim) = self.victim.take() {
                self.num_items -= 1;
                self.add_tag(victim.bucket, victim.tag);
            }
            true
        } else if let Some(victim) = self.victim {
            if victim.tag == tag && (bucket1 == victim.bucket || bucket2 == victim.bucket) {
                self.num_items -= 1;
                self.victim = None;
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    #[inline]
    fn index_and_tag(&self, key: &[u8]) -> (usize, u32) {
        let hash = hash_key(key);
        (
            index_hash((hash >> 32) as u32, self.table.num_buckets()),
            tag_hash(hash as u32),
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_are_contained() {
        let mut filter = CuckooFilter::new(200);
        for i in 0..200_u32 {
            assert!(filter.add(format!("item-{i}").as_bytes()));
        }
        for i in 0..200_u32 {
            assert!(filter.contains(format!("item-{i}").as_bytes()));
        }
    }

    #[test]
    fn absent_keys_mostly_miss() {
        let mut filter = CuckooFilter::new(200);
        for i in 0..200_u32 {
            assert!(filter.add(format!("item-{i}").as_bytes()));
        }
        let mut false_positives = 0;
        for i in 0..2000_u32 {
            if filter.contains(format!("ghost-{i}").as_bytes()) {
                false_positives += 1;
            }
        }
        assert!(false_positives <= 2);
    }

    #[test]
    fn delete_removes_membership() {
        let mut filter = CuckooFilter::new(32);
        assert!(filter.add(b"gone"));
        assert!(filter.contains(b"gone"));
        assert!(filter.delete(b"gone"));
        assert!(!filter.contains(b"gone"));
        assert!(!filter.delete(b"gone"));
        assert!(filter.is_empty());
    }
}
