//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk components of an LSM index.
//!
//! When the mutable [`memtable::Memtable`] is flushed, or when several disk
//! components are merged, the result is written as an SSTable. SSTables are
//! *write-once, read-many*: once created they are never modified, only
//! replaced by a merge and eventually deleted once no search references them.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (tuples in strictly ascending key order)         │
//! │                                                               │
//! │ crc32 (u32) | body_len (u32) | body                           │
//! │ body = flags (u8) | field_count (u32) | fields                │
//! │                                                               │
//! │ ... repeated for each tuple ...                               │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 20 bytes)                                 │
//! │                                                               │
//! │ entry_count (u64 LE) | data_len (u64 LE) | magic "TPL1"       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no index section: components are only ever read front to back
//! by [`SSTableCursor`], which is what a merge needs. Antimatter tuples are
//! stored like any other record, with bit 0 of `flags` set.

mod format;
mod reader;
mod writer;

pub use format::{decode_tuple, encode_tuple, Footer, FOOTER_BYTES, SSTABLE_MAGIC};
pub use reader::{SSTableCursor, SSTableReader};
pub use writer::SSTableWriter;

#[cfg(test)]
mod tests;
