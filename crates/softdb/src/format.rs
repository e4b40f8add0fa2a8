//! The stable on-media record encoding and the shared handles over it.
//!
//! Every stored record is a length-prefixed pair:
//!
//! ```text
//! key_len  : varint32
//! user_key : bytes[key_len - 8]
//! tag      : uint64 little-endian = (sequence << 8) | value_type
//! val_len  : varint32
//! value    : bytes[val_len]
//! ```
//!
//! `key_len` counts the user key plus the 8 tag bytes; the prefixed portion
//! up to and including the tag is the *internal key*, which is what all
//! comparators and seek targets operate on.

use std::sync::Arc;

use integer_encoding::VarInt;

use crate::error::{Error, Result};


// ================================
//  Sequence numbers and entry types
// ================================

/// A 56-bit, monotonically increasing database sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self((1 << 56) - 1);

    /// `sequence` must fit in 56 bits.
    #[inline]
    #[must_use]
    pub const fn new(sequence: u64) -> Self {
        debug_assert!(sequence <= Self::MAX.0);
        Self(sequence)
    }

    #[inline]
    #[must_use]
    pub const fn inner(self) -> u64 {
        self.0
    }
}

/// Discriminates live values from deletion markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Deletion,
    Value,
}

impl EntryType {
    /// The type used in seek targets. `Value` sorts before `Deletion` for
    /// the same (user key, sequence) because tags compare descending, so a
    /// seek with this type lands on the newest visible record.
    pub const FOR_SEEK: Self = Self::Value;
}

impl From<EntryType> for u8 {
    #[inline]
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::Deletion => 0,
            EntryType::Value    => 1,
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = ();

    #[inline]
    fn try_from(byte: u8) -> std::result::Result<Self, ()> {
        match byte {
            0 => Ok(Self::Deletion),
            1 => Ok(Self::Value),
            _ => Err(()),
        }
    }
}

#[inline]
#[must_use]
pub(crate) fn sequence_and_type_tag(sequence: SequenceNumber, entry_type: EntryType) -> u64 {
    (sequence.inner() << 8) | u64::from(u8::from(entry_type))
}

// ================================
//  Entry handles
// ================================

/// A shared handle to one encoded record.
///
/// Tables, interval endpoints and interval-index node keys all alias the same
/// record bytes; the bytes are freed exactly once, when the last handle
/// drops. Cloning is how a compaction "donates" a record to its replacement
/// table without copying, and [`Entry::ptr_eq`] is the identity test the
/// range-walking iterators use to recognize border records.
#[derive(Clone)]
pub struct Entry(Arc<[u8]>);

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.parse() {
            Ok(parsed) => f
                .debug_struct("Entry")
                .field("user_key", &String::from_utf8_lossy(parsed.user_key))
                .field("sequence", &parsed.sequence.inner())
                .field("entry_type", &parsed.entry_type)
                .finish_non_exhaustive(),
            Err(_) => f.debug_struct("Entry").field("malformed", &true).finish(),
        }
    }
}

impl Entry {
    /// Encode a fresh record.
    #[must_use]
    pub fn encode(
        user_key:   &[u8],
        sequence:   SequenceNumber,
        entry_type: EntryType,
        value:      &[u8],
    ) -> Self {
        let internal_key_len =
            u32::try_from(user_key.len() + 8).expect("user keys are far below 4 GiB");
        let value_len = u32::try_from(value.len()).expect("values are far below 4 GiB");

        let mut buf = Vec::with_capacity(
            internal_key_len.required_space()
                + user_key.len()
                + 8
                + value_len.required_space()
                + value.len(),
        );
        buf.extend(internal_key_len.encode_var_vec());
        buf.extend_from_slice(user_key);
        buf.extend(sequence_and_type_tag(sequence, entry_type).to_le_bytes());
        buf.extend(value_len.encode_var_vec());
        buf.extend_from_slice(value);

        Self(Arc::from(buf))
    }

    /// Copy possibly-foreign record bytes into an owned handle (the
    /// memtable-flush path; compactions clone handles instead).
    #[must_use]
    pub fn copy_from_encoded(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Identity, not equality: do the two handles alias the same bytes?
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The length-prefixed internal key portion, i.e. the prefix all seek
    /// targets are encoded as.
    ///
    /// # Panics
    /// Panics if the record is malformed; only use on records built by this
    /// crate.
    #[inline]
    #[must_use]
    pub(crate) fn prefixed_internal_key(&self) -> &[u8] {
        prefixed_internal_key(&self.0).expect("entry built by this crate is well formed")
    }

    /// Decode all fields.
    pub fn parse(&self) -> Result<ParsedEntry<'_>> {
        parse_entry(&self.0)
    }
}

/// A fully decoded record, borrowing from its [`Entry`].
#[derive(Debug, Clone, Copy)]
pub struct ParsedEntry<'a> {
    pub user_key:   &'a [u8],
    pub sequence:   SequenceNumber,
    pub entry_type: EntryType,
    pub value:      &'a [u8],
}

/// A decoded internal key (no value part).
#[derive(Debug, Clone, Copy)]
pub struct ParsedInternalKey<'a> {
    pub user_key:   &'a [u8],
    pub sequence:   SequenceNumber,
    pub entry_type: EntryType,
}

impl<'a> ParsedInternalKey<'a> {
    /// Decode an un-prefixed internal key slice (user key ++ 8 tag bytes).
    pub fn decode(internal_key: &'a [u8]) -> Result<Self> {
        let user_key_len = internal_key
            .len()
            .checked_sub(8)
            .ok_or_else(|| Error::corruption("internal key shorter than its tag"))?;
        let (user_key, tag_bytes) = internal_key.split_at(user_key_len);
        let tag = u64::from_le_bytes(tag_bytes.try_into().expect("split of length 8"));

        let entry_type = EntryType::try_from((tag & 0xff) as u8)
            .map_err(|()| Error::corruption("unknown value type in tag"))?;

        Ok(Self {
            user_key,
            sequence: SequenceNumber::new(tag >> 8),
            entry_type,
        })
    }
}

// ================================
//  Raw-slice decoding
// ================================

/// Split one varint32 length prefix off `bytes`, returning the prefixed data
/// and whatever follows it.
pub(crate) fn decode_prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, prefix_len) = u32::decode_var(bytes)
        .ok_or_else(|| Error::corruption("bad varint32 length prefix"))?;
    let data_end = prefix_len + len as usize;
    if bytes.len() < data_end {
        return Err(Error::corruption("length prefix overruns the record"));
    }
    Ok((&bytes[prefix_len..data_end], &bytes[data_end..]))
}

/// The length-prefixed internal key at the head of an encoded record
/// (prefix included), i.e. the slice seek targets compare against.
pub(crate) fn prefixed_internal_key(bytes: &[u8]) -> Result<&[u8]> {
    let (len, prefix_len) = u32::decode_var(bytes)
        .ok_or_else(|| Error::corruption("bad varint32 length prefix"))?;
    if len < 8 {
        return Err(Error::corruption("internal key shorter than its tag"));
    }
    let end = prefix_len + len as usize;
    if bytes.len() < end {
        return Err(Error::corruption("length prefix overruns the record"));
    }
    Ok(&bytes[..end])
}

/// Re-attach the varint32 length prefix to an un-prefixed internal key,
/// producing a seek target.
#[must_use]
pub(crate) fn prefix_internal_key(internal_key: &[u8]) -> Vec<u8> {
    let len = u32::try_from(internal_key.len()).expect("internal keys are far below 4 GiB");
    let mut bytes = Vec::with_capacity(len.required_space() + internal_key.len());
    bytes.extend(len.encode_var_vec());
    bytes.extend_from_slice(internal_key);
    bytes
}

/// The user key inside an encoded record.
pub(crate) fn user_key_of(bytes: &[u8]) -> Result<&[u8]> {
    let (internal_key, _) = decode_prefixed(bytes)?;
    internal_key
        .len()
        .checked_sub(8)
        .map(|len| &internal_key[..len])
        .ok_or_else(|| Error::corruption("internal key shorter than its tag"))
}

/// Decode a full record: internal key fields plus the value.
pub(crate) fn parse_entry(bytes: &[u8]) -> Result<ParsedEntry<'_>> {
    let (internal_key, rest) = decode_prefixed(bytes)?;
    let key = ParsedInternalKey::decode(internal_key)?;
    let (value, trailing) = decode_prefixed(rest)?;
    if !trailing.is_empty() {
        return Err(Error::corruption("trailing bytes after the value"));
    }
    Ok(ParsedEntry {
        user_key:   key.user_key,
        sequence:   key.sequence,
        entry_type: key.entry_type,
        value,
    })
}

// ================================
//  Lookup keys
// ================================

/// An owned seek target for a `(user_key, sequence)` pair.
///
/// Encoded exactly like a record's prefixed internal key, with
/// [`EntryType::FOR_SEEK`] in the tag so that the first record `>=` the
/// target is the newest one visible at `sequence`.
#[derive(Debug, Clone)]
pub struct LookupKey {
    bytes:        Vec<u8>,
    user_key_len: usize,
}

impl LookupKey {
    #[must_use]
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let internal_key_len =
            u32::try_from(user_key.len() + 8).expect("user keys are far below 4 GiB");
        let mut bytes =
            Vec::with_capacity(internal_key_len.required_space() + user_key.len() + 8);
        bytes.extend(internal_key_len.encode_var_vec());
        bytes.extend_from_slice(user_key);
        bytes.extend(sequence_and_type_tag(sequence, EntryType::FOR_SEEK).to_le_bytes());
        Self {
            bytes,
            user_key_len: user_key.len(),
        }
    }

    /// The full seek encoding (length-prefixed internal key).
    #[inline]
    #[must_use]
    pub fn encoded(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    #[must_use]
    pub fn user_key(&self) -> &[u8] {
        let prefix_len = self.bytes.len() - self.user_key_len - 8;
        &self.bytes[prefix_len..prefix_len + self.user_key_len]
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_parse_round_trip() {
        let entry = Entry::encode(b"apple", SequenceNumber::new(42), EntryType::Value, b"fruit");
        let parsed = entry.parse().unwrap();
        assert_eq!(parsed.user_key, b"apple");
        assert_eq!(parsed.sequence, SequenceNumber::new(42));
        assert_eq!(parsed.entry_type, EntryType::Value);
        assert_eq!(parsed.value, b"fruit");
    }

    #[test]
    fn deletion_round_trip() {
        let entry = Entry::encode(b"gone", SequenceNumber::new(7), EntryType::Deletion, b"");
        let parsed = entry.parse().unwrap();
        assert_eq!(parsed.entry_type, EntryType::Deletion);
        assert_eq!(parsed.value, b"");
    }

    #[test]
    fn lookup_key_matches_entry_prefix() {
        let entry = Entry::encode(b"k", SequenceNumber::new(9), EntryType::Value, b"v");
        let lookup = LookupKey::new(b"k", SequenceNumber::new(9));
        // Same user key; the lookup's FOR_SEEK type equals Value, so the
        // prefixes are byte-identical here.
        assert_eq!(lookup.encoded(), entry.prefixed_internal_key());
        assert_eq!(lookup.user_key(), b"k");
    }

    #[test]
    fn handle_identity() {
        let a = Entry::encode(b"x", SequenceNumber::new(1), EntryType::Value, b"1");
        let b = a.clone();
        let c = Entry::copy_from_encoded(a.as_bytes());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn corruption_is_reported() {
        assert!(parse_entry(&[0x96]).is_err());
        let mut bytes = Entry::encode(b"k", SequenceNumber::new(1), EntryType::Value, b"v")
            .as_bytes()
            .to_vec();
        bytes.truncate(bytes.len() - 1);
        assert!(parse_entry(&bytes).is_err());

        // Unknown value type.
        let internal_key = [b'k', 9, 0, 0, 0, 0, 0, 0, 0];
        assert!(ParsedInternalKey::decode(&internal_key).is_err());
    }

    #[test]
    fn tag_orders_sequences() {
        let older = sequence_and_type_tag(SequenceNumber::new(5), EntryType::Value);
        let newer = sequence_and_type_tag(SequenceNumber::new(6), EntryType::Deletion);
        assert!(newer > older);
    }
}
