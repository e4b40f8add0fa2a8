//! Persistent-memory building blocks for softdb.
//!
//! Everything in this crate is a *frozen* structure: it is bulk-loaded once,
//! single-threaded, and read-only (and therefore freely shared) afterwards.
//! The two key-bearing containers store their nodes in one contiguous
//! allocation so that a slot number doubles as a stable address, which is what
//! lets the [cuckoo side-index](cuckoo::CuckooHash) hand out O(1) anchors into
//! a [`FrozenSkiplist`].

pub mod cuckoo;
pub mod persist;

mod array;
mod interface;
mod node_heights;
mod skiplist;


pub use self::{
    array::{ArrayCursor, ArrayWriter, FrozenArray},
    interface::Compare,
    node_heights::{BRANCHING, random_height},
    skiplist::{FrozenSkiplist, SkiplistCursor, SkiplistWriter},
};
