use oorandom::Rand32;

use crate::persist;
use super::{MAX_KICK_COUNT, alt_index, bucket_count, hash_key, index_hash, tag_hash};
use super::table::{SlotInsert, SlotTable};


#[derive(Debug, Clone, Copy)]
struct Victim {
    bucket: usize,
    slot:   u64,
}

/// Cuckoo hash from user keys to 32-bit slot positions.
///
/// Each stored item packs a 32-bit tag (derived from the key hash) with the
/// position recorded at insertion time. An item displaced through a kick
/// chain longer than [`MAX_KICK_COUNT`] lands in a single-item victim cache;
/// once the victim cache is occupied, further inserts are refused and the
/// caller simply goes without an anchor for those keys.
///
/// Two different keys can collide on both bucket and tag; the position
/// recorded first then shadows the other key. Callers must therefore verify
/// the anchored key before trusting a hit.
#[derive(Debug)]
pub struct CuckooHash {
    table:             SlotTable,
    num_items:         usize,
    victim:            Option<Victim>,
    rng:               Rand32,
    max_kick_recorded: usize,
}

impl CuckooHash {
    /// A hash sized for `max_num_keys` distinct keys.
    #[must_use]
    pub fn new(max_num_keys: usize) -> Self {
        Self {
            table:             SlotTable::new(bucket_count(max_num_keys)),
            num_items:         0,
            victim:            None,
            rng:               Rand32::new(0x_c0c0_0a),
            max_kick_recorded: 0,
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

    #[inline]
    #[must_use]
    pub fn has_victim(&self) -> bool {
        self.victim.is_some()
    }

    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.table.size_in_bytes()
    }

    /// Longest kick chain observed so far.
    #[must_use]
    pub fn max_kick_recorded(&self) -> usize {
        self.max_kick_recorded
    }

    /// Record `position` for `key`. Positions are 1-based; `0` is reserved
    /// for "empty". Returns false only when the victim slot is already
    /// occupied, in which case nothing is stored.
    pub fn add(&mut self, key: &[u8], position: u32) -> bool {
        if self.victim.is_some() {
            return false;
        }
        let (bucket, tag) = self.index_and_tag(key);
        self.add_slot(bucket, (u64::from(tag) << 32) | u64::from(position));
        true
    }

    fn add_slot(&mut self, bucket: usize, slot: u64) {
        let mut cur_bucket = bucket;
        let mut cur_slot = slot;
        for count in 0..MAX_KICK_COUNT {
            let kickout = count > 0;
            match self.table.insert_slot(cur_bucket, cur_slot, kickout, &mut self.rng) {
                SlotInsert::Stored => {
                    self.num_items += 1;
                    self.max_kick_recorded = self.max_kick_recorded.max(count);
                    return;
                }
                SlotInsert::Kicked(displaced) => cur_slot = displaced,
                SlotInsert::Rejected => {}
            }
            // Kicking starts once both candidate buckets have been tried.
            cur_bucket = alt_index(
                cur_bucket,
                (cur_slot >> 32) as u32,
                self.table.num_buckets(),
            );
        }
        self.max_kick_recorded = MAX_KICK_COUNT;
        self.victim = Some(Victim {
            bucket: cur_bucket,
            slot:   cur_slot,
        });
        self.num_items += 1;
    }

    /// Position recorded for `key`, if a slot with a matching tag exists in
    /// either candidate bucket (or the victim cache).
    #[must_use]
    pub fn find(&self, key: &[u8]) -> Option<u32> {
        let (bucket1, tag) = self.index_and_tag(key);
        let bucket2 = alt_index(bucket1, tag, self.table.num_buckets());
        debug_assert_eq!(bucket1, alt_index(bucket2, tag, self.table.num_buckets()));

        if let Some(victim) = self.victim {
            if (victim.slot >> 32) as u32 == tag
                && (bucket1 == victim.bucket || bucket2 == victim.bucket)
            {
                return Some(victim.slot as u32);
            }
        }
        self.table.find_slot(bucket1, bucket2, tag)
    }

    /// Remove the record for `key` and re-seat the parked victim, if any.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let (bucket1, tag) = self.index_and_tag(key);
        let bucket2 = alt_index(bucket1, tag, self.table.num_buckets());

        if self.table.delete_tag(bucket1, tag) || self.table.delete_tag(bucket2, tag) {
            self.num_items -= 1;
            if let Some(victim) = self.victim.take() {
                // The freed slot may let the victim's kick chain complete.
                self.num_items -= 1;
                self.add_slot(victim.bucket, victim.slot);
            }
            true
        } else if let Some(victim) = self.victim {
            if (victim.slot >> 32) as u32 == tag
                && (bucket1 == victim.bucket || bucket2 == victim.bucket)
            {
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

    /// Cache-line flush the bucket array.
    pub fn flush(&self) {
        persist::clflush_slice(self.table.slots());
        persist::mfence();
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
