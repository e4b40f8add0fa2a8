//! SoftDB's persistent-memory data plane: an embedded ordered key-value
//! core where flushed write buffers become immutable, array-backed
//! [`NvmTable`] generations, a concurrent [`IntervalSkipList`] indexes the
//! key range of every generation, and compaction is admitted by *point
//! overlap* at hot keys rather than by level sizes.
//!
//! The [`VersionSet`] is the entry point: it owns the index and its
//! timestamp counter, builds tables from flush cursors, answers point reads
//! newest-generation-first, hands out range scans that walk interval
//! frontiers, and drives the background compaction loop through an injected
//! [`Scheduler`].
//!
//! ```
//! use softdb::{
//!     Entry, EntryType, LookupKey, Options, SequenceNumber, SerialScheduler, VecCursor,
//!     VersionSet,
//! };
//! use softdb::{BytewiseComparator, TableCursor as _};
//!
//! let vs = VersionSet::new(Options::default(), SerialScheduler);
//!
//! // A flushed write buffer arrives as a cursor over encoded records.
//! let records = vec![
//!     Entry::encode(b"apple", SequenceNumber::new(1), EntryType::Value, b"red"),
//!     Entry::encode(b"pear", SequenceNumber::new(2), EntryType::Value, b"green"),
//! ];
//! vs.set_last_sequence(2);
//! let mut flush = VecCursor::new(BytewiseComparator, records);
//! flush.seek_to_first();
//! vs.build_table(&mut flush, 2, 0).unwrap();
//!
//! let value = vs.get(&LookupKey::new(b"apple", SequenceNumber::new(2))).unwrap();
//! assert_eq!(value, b"red");
//! ```

mod comparator;
mod cursor;
mod error;
mod format;
mod index;
mod iter;
mod options;
mod scheduler;
mod table;
mod version;


pub use self::{
    comparator::{BytewiseComparator, EntryComparator, InternalKeyComparator, UserComparator},
    cursor::{TableCursor, VecCursor},
    error::{Error, Result},
    format::{Entry, EntryType, LookupKey, ParsedEntry, ParsedInternalKey, SequenceNumber},
    index::{Interval, IntervalRef, IntervalSkipList},
    options::Options,
    scheduler::{BackgroundJob, Scheduler, SerialScheduler, ThreadScheduler},
    table::{NvmTable, TableGet, TableIter},
    version::{NvmIterator, Snapshot, SnapshotRef, VersionSet},
};
