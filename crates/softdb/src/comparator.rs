use std::cmp::Ordering;

use softdb_nvm::Compare;

use crate::format::{self, Entry};


/// A total order over user keys.
///
/// The comparator is a type parameter throughout the crate so comparisons
/// inline into the seek and marker-placement loops.
pub trait UserComparator: Clone + Send + Sync + 'static {
    /// A unique identifier for the comparator's behavior.
    #[must_use]
    fn name(&self) -> &'static str;

    /// Compare two user keys. Analogous to [`Ord::cmp`].
    #[must_use]
    fn cmp(&self, lhs: &[u8], rhs: &[u8]) -> Ordering;
}

/// Lexicographic byte order; the default comparator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BytewiseComparator;

impl UserComparator for BytewiseComparator {
    #[inline]
    fn name(&self) -> &'static str {
        "softdb.BytewiseComparator"
    }

    #[inline]
    fn cmp(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        lhs.cmp(rhs)
    }
}

/// Order over un-prefixed internal keys (user key ++ 8 tag bytes): user keys
/// ascending per the user comparator, ties broken by *descending* tag, so
/// the newest sequence for a user key sorts first.
#[derive(Debug, Clone, Copy)]
pub struct InternalKeyComparator<C> {
    user: C,
}

impl<C: UserComparator> InternalKeyComparator<C> {
    #[inline]
    #[must_use]
    pub fn new(user: C) -> Self {
        Self { user }
    }

    #[inline]
    #[must_use]
    pub fn user_comparator(&self) -> &C {
        &self.user
    }

    /// # Panics
    /// Panics if either key is shorter than its 8-byte tag; internal keys
    /// are produced by this crate and always carry one.
    #[must_use]
    pub fn cmp(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        let (lhs_user, lhs_tag) = split_tag(lhs);
        let (rhs_user, rhs_tag) = split_tag(rhs);
        self.user
            .cmp(lhs_user, rhs_user)
            // Descending: the higher sequence is the smaller key.
            .then_with(|| rhs_tag.cmp(&lhs_tag))
    }
}

#[inline]
fn split_tag(internal_key: &[u8]) -> (&[u8], u64) {
    let user_key_len = internal_key
        .len()
        .checked_sub(8)
        .expect("internal keys carry an 8-byte tag");
    let (user_key, tag_bytes) = internal_key.split_at(user_key_len);
    (
        user_key,
        u64::from_le_bytes(tag_bytes.try_into().expect("split of length 8")),
    )
}

/// Order over length-prefixed encoded records (and seek targets, which use
/// the same prefix encoding). Strips the prefix, then compares internal
/// keys; a user-key-only mode serves the interval index's equal-user-key
/// frontier checks.
#[derive(Debug, Clone, Copy)]
pub struct EntryComparator<C> {
    internal: InternalKeyComparator<C>,
}

impl<C: UserComparator> EntryComparator<C> {
    #[inline]
    #[must_use]
    pub fn new(user: C) -> Self {
        Self {
            internal: InternalKeyComparator::new(user),
        }
    }

    #[inline]
    #[must_use]
    pub fn internal_comparator(&self) -> &InternalKeyComparator<C> {
        &self.internal
    }

    #[inline]
    #[must_use]
    pub fn user_comparator(&self) -> &C {
        self.internal.user_comparator()
    }

    /// Compare two length-prefixed records by internal key.
    ///
    /// # Panics
    /// Panics on records whose length prefix is malformed; all compared
    /// records are produced by this crate.
    #[must_use]
    pub fn cmp_raw(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        self.internal.cmp(internal_key_unchecked(lhs), internal_key_unchecked(rhs))
    }

    /// Compare only the user keys of two length-prefixed records.
    #[must_use]
    pub fn cmp_user_raw(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        let lhs_user = split_tag(internal_key_unchecked(lhs)).0;
        let rhs_user = split_tag(internal_key_unchecked(rhs)).0;
        self.internal.user_comparator().cmp(lhs_user, rhs_user)
    }
}

#[inline]
fn internal_key_unchecked(prefixed: &[u8]) -> &[u8] {
    format::decode_prefixed(prefixed)
        .expect("record built by this crate is well formed")
        .0
}

impl<C: UserComparator> Compare<Entry> for EntryComparator<C> {
    #[inline]
    fn cmp(&self, lhs: &Entry, rhs: &Entry) -> Ordering {
        self.cmp_raw(lhs.as_bytes(), rhs.as_bytes())
    }
}


#[cfg(test)]
mod tests {
    use crate::format::{EntryType, LookupKey, SequenceNumber};
    use super::*;

    fn entry(user_key: &[u8], sequence: u64, entry_type: EntryType) -> Entry {
        Entry::encode(user_key, SequenceNumber::new(sequence), entry_type, b"v")
    }

    #[test]
    fn user_keys_order_ascending() {
        let cmp = EntryComparator::new(BytewiseComparator);
        let a = entry(b"a", 1, EntryType::Value);
        let b = entry(b"b", 1, EntryType::Value);
        assert_eq!(Compare::cmp(&cmp, &a, &b), Ordering::Less);
    }

    #[test]
    fn newer_sequence_sorts_first() {
        let cmp = EntryComparator::new(BytewiseComparator);
        let older = entry(b"k", 3, EntryType::Value);
        let newer = entry(b"k", 9, EntryType::Value);
        assert_eq!(Compare::cmp(&cmp, &newer, &older), Ordering::Less);
    }

    #[test]
    fn lookup_key_lands_on_newest_visible() {
        let cmp = EntryComparator::new(BytewiseComparator);
        let lookup = LookupKey::new(b"k", SequenceNumber::new(5));
        let seq5 = entry(b"k", 5, EntryType::Value);
        let seq6 = entry(b"k", 6, EntryType::Value);
        // seq 6 is invisible at snapshot 5: it sorts before the target.
        assert_eq!(cmp.cmp_raw(seq6.as_bytes(), lookup.encoded()), Ordering::Less);
        // seq 5 with type Value is exactly the target.
        assert_eq!(cmp.cmp_raw(seq5.as_bytes(), lookup.encoded()), Ordering::Equal);
    }

    #[test]
    fn deletion_sorts_after_value_at_same_sequence() {
        let cmp = EntryComparator::new(BytewiseComparator);
        let value = entry(b"k", 4, EntryType::Value);
        let tombstone = entry(b"k", 4, EntryType::Deletion);
        assert_eq!(
            cmp.cmp_raw(value.as_bytes(), tombstone.as_bytes()),
            Ordering::Less,
        );
    }

    #[test]
    fn user_key_mode_ignores_tags() {
        let cmp = EntryComparator::new(BytewiseComparator);
        let a = entry(b"same", 1, EntryType::Value);
        let b = entry(b"same", 100, EntryType::Deletion);
        assert_eq!(cmp.cmp_user_raw(a.as_bytes(), b.as_bytes()), Ordering::Equal);
    }
}
