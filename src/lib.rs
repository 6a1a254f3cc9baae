//! # lsmkv
//!
//! An embedded, ordered key-value storage engine using the Log-Structured
//! Merge design.
//!
//! ## Core idea
//! Writes land in a concurrent in-memory buffer. When it grows past a
//! threshold a background worker flushes it as an immutable sorted table.
//! Reads merge the buffer with every table, always preferring the newest
//! version of a key; deletes are tombstones that shadow older versions
//! until compaction drops them.
//!
//! ```text
//! upsert ──► MemTable ──flush──► TableSet ──► [0.sst] [1.sst] ... (oldest → newest)
//! get    ──► MemTable, then tables newest first
//! range  ──► MergeIterator(tables..., MemTable) ──► SkipTombstones
//! ```

pub mod db;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod sstable;
pub mod store;
pub mod types;

// Public re-exports for the top-level API
pub use db::{DB, Lookup, Options, Scan, Stats};
pub use error::{Error, Result};
pub use types::{Entry, Key, Value, compare_keys};
