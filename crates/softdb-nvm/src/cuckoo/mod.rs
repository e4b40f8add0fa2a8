//! Bucketed cuckoo structures keyed by raw bytes.
//!
//! [`CuckooHash`] maps a user key to the 32-bit slot position it occupied at
//! insertion time inside one frozen table; [`CuckooFilter`] is the tag-only
//! membership sibling. Both are *advisory*: a miss, or a hit whose anchor
//! turns out to hold a different key, must fall back to the skip-list seek.
//! Correctness never depends on hash fidelity.

mod filter;
mod hash;
mod table;

pub use self::{filter::CuckooFilter, hash::CuckooHash};

use oorandom::Rand32;

/// Slots per bucket.
const ASSOC: usize = 4;

/// Maximum number of cuckoo kicks before an item is parked in the victim
/// cache.
const MAX_KICK_COUNT: usize = 500;

/// Multiplier of the partial-key alternate-bucket derivation.
const ALT_INDEX_MULTIPLIER: u32 = 0x5bd1_e995;

/// Fold a 128-bit city hash into the 64 bits the bucket math consumes.
#[inline]
fn hash_key(key: &[u8]) -> u64 {
    let digest = cityhash_rs::cityhash_110_128(key);
    ((digest >> 64) as u64) ^ (digest as u64)
}

/// Bucket count for `max_num_keys` items: a power of two sized so the load
/// factor stays at or below 0.96.
fn bucket_count(max_num_keys: usize) -> usize {
    let mut num_buckets = std::cmp::max(1, max_num_keys / ASSOC).next_power_of_two();
    let frac = max_num_keys as f64 / num_buckets as f64 / ASSOC as f64;
    if frac > 0.96 {
        num_buckets <<= 1;
    }
    num_buckets
}

/// Non-zero 32-bit tag from the low hash half.
#[inline]
fn tag_hash(hash_value: u32) -> u32 {
    if hash_value == 0 { 1 } else { hash_value }
}

#[inline]
fn index_hash(hash_value: u32, num_buckets: usize) -> usize {
    // num_buckets is always a power of two, so modulo can be replaced
    // with bitwise-and.
    hash_value as usize & (num_buckets - 1)
}

#[inline]
fn alt_index(index: usize, tag: u32, num_buckets: usize) -> usize {
    index_hash(index as u32 ^ tag.wrapping_mul(ALT_INDEX_MULTIPLIER), num_buckets)
}

/// Victim slot index within a bucket, chosen at random when kicking.
#[inline]
fn kick_slot(rng: &mut Rand32) -> usize {
    rng.rand_u32() as usize & (ASSOC - 1)
}
