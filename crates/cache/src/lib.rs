//! # Cache - Shared Lookup Caches
//!
//! Bounded, LRU-evicting caches that let the insert and read paths avoid
//! scanning a table:
//!
//! | Cache                   | Key                          | Value        |
//! |-------------------------|------------------------------|--------------|
//! | [`SequenceAllocator`]   | `(table, group)`             | last seq     |
//! | [`LocationIndex`] fwd   | `(table, location)`          | seq          |
//! | [`LocationIndex`] rev   | `(table, group, seq)`        | location     |
//! | [`ContentCache`]        | `(table, group, seq, column)`| decoded bytes|
//!
//! All of them are built on [`BoundedCache`], an open-addressing table with
//! tombstones, an index-linked LRU list and a free list, and each is guarded
//! by its own `parking_lot::RwLock`. Because a lookup promotes the entry in
//! LRU order, lookups take the lock exclusively; only statistics reads use
//! the shared mode.
//!
//! A miss is never an error: callers fall back to the authoritative (slower)
//! path and repopulate. A full cache degrades to dropping the write.
pub mod content;
pub mod diag;
pub mod location;
pub mod lru;
pub mod sequence;
pub mod stats;

pub use content::{ContentCache, ContentKey, ContentStats};
pub use diag::LogOnce;
pub use location::{Location, LocationIndex, LocationStats};
pub use lru::{BoundedCache, InsertOutcome};
pub use sequence::SequenceAllocator;
pub use stats::CacheStats;

#[cfg(test)]
mod tests;
