//! Sorted tables: immutable, memory-mapped, key-ordered files.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ offset_0 (8B) │ offset_1 │ ... │ offset_n-1 │  ascending by key
//! ├──────────────────────────────────────────┤
//! │ record at offset_0                        │
//! │ record at offset_1                        │
//! │ ...                                       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Offsets are little-endian u64. The record count is not stored: the
//! offset table is exactly `n * 8` bytes long, so the first offset is also
//! its length and `n = offset_0 / 8`. A table therefore always holds at
//! least one record; empty flushes never reach the disk.

pub mod iterator;
pub mod reader;
pub mod record;
pub mod varsize;
pub mod writer;

pub use iterator::SSTableIterator;
pub use reader::SSTable;

use std::path::{Path, PathBuf};

/// Width of one offset table slot.
pub const OFFSET_SIZE: usize = 8;

/// Extension of a finished table.
pub const TABLE_EXT: &str = "sst";

/// Extension of a table still being written.
pub const TMP_EXT: &str = "tmp";

/// `<dir>/<id>.sst`
pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.{TABLE_EXT}"))
}

/// `<dir>/<id>.tmp`
pub fn tmp_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.{TMP_EXT}"))
}

/// Table id encoded in a file name, if `path` names a finished table.
pub fn parse_table_id(path: &Path) -> Option<u64> {
    if path.extension()? != TABLE_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
