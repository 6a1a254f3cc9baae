use std::cmp::Ordering;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};
use crate::sstable::iterator::SSTableIterator;
use crate::sstable::record::RecordInfo;
use crate::sstable::{OFFSET_SIZE, table_path, writer};
use crate::types::{Entry, compare_keys};

/// An opened sorted table. Supports point lookups and half-open range
/// scans.
///
/// On open:
/// 1. Map the whole file read-only
/// 2. Derive the record count from the first offset
/// 3. Ready for queries (records decoded on demand, straight from the map)
///
/// The file is never written after it is created, so any number of threads
/// can read one table concurrently.
pub struct SSTable {
    id: u64,
    /// Path to the table file (for deletion and error messages).
    path: PathBuf,
    mmap: Mmap,
    /// Number of records, `offset_0 / 8`.
    count: usize,
}

impl SSTable {
    /// Open table `id` in `dir`.
    ///
    /// Fails with `Error::Io` if the file is missing and with
    /// `Error::Corruption` if its offset table is malformed or truncated.
    pub fn open(dir: &Path, id: u64) -> Result<Self> {
        let path = table_path(dir, id);
        let file = File::open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size < OFFSET_SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: {file_size} bytes is too short for a table",
                path.display()
            )));
        }

        // SAFETY: tables are immutable once renamed into place; nothing in
        // the engine writes to a mapped file.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let first = read_offset(&mmap, 0)?;
        if first == 0 || first % OFFSET_SIZE != 0 || first > mmap.len() {
            return Err(Error::Corruption(format!(
                "{}: bad first offset {first} for a {file_size} byte file",
                path.display()
            )));
        }
        let count = first / OFFSET_SIZE;

        let last = read_offset(&mmap, count - 1)?;
        if last < first || last >= mmap.len() {
            return Err(Error::Corruption(format!(
                "{}: last record offset {last} outside the file",
                path.display()
            )));
        }
        // The last record must end exactly at end of file.
        let tail = RecordInfo::decode(&mmap, last)
            .map_err(|e| Error::Corruption(format!("{}: truncated table: {e}", path.display())))?;
        if tail.value_offset + tail.value_len != mmap.len() {
            return Err(Error::Corruption(format!(
                "{}: last record ends at {} but the file has {file_size} bytes",
                path.display(),
                tail.value_offset + tail.value_len
            )));
        }

        tracing::debug!(table_id = id, records = count, "opened sorted table");
        Ok(SSTable {
            id,
            path,
            mmap,
            count,
        })
    }

    /// Write `entries` (ascending, unique keys) as table `id` in `dir`.
    ///
    /// Returns `false` and touches nothing when `entries` is empty.
    pub fn save(dir: &Path, id: u64, entries: &[Entry]) -> Result<bool> {
        writer::write_table(dir, id, entries)
    }

    /// Point lookup. Returns the stored entry, which may be a tombstone, or
    /// `None` if no record has this key.
    pub fn find_entry(&self, key: &[u8]) -> Result<Option<Entry>> {
        match self.search(key)? {
            Ok(index) => Ok(Some(self.record(index)?.to_entry(&self.mmap))),
            Err(_) => Ok(None),
        }
    }

    /// Lazily scan `[from, to)`. A `None` bound is unbounded on that side.
    ///
    /// `from` starts at the first record whose key is `>= from`; `to`
    /// stops before the first record whose key is `>= to`, so an exact
    /// match on `to` is excluded.
    pub fn find_entries(self: &Arc<Self>, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<SSTableIterator> {
        let start = match from {
            Some(key) => self.lower_bound(key)?,
            None => 0,
        };
        let end = match to {
            Some(key) => self.lower_bound(key)?,
            None => self.count,
        };
        Ok(SSTableIterator::new(Arc::clone(self), start, end.max(start)))
    }

    /// Remove the backing file. A file that is already gone is fine.
    ///
    /// The mapping stays readable for anyone still holding this table.
    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the table. Never zero.
    pub fn record_count(&self) -> usize {
        self.count
    }

    /// Header of record `index`, decoded from the map.
    pub(crate) fn record(&self, index: usize) -> Result<RecordInfo> {
        let offset = read_offset(&self.mmap, index)?;
        RecordInfo::decode(&self.mmap, offset)
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Binary search over the offset table.
    ///
    /// `Ok(index)` when a record has exactly `key`, otherwise
    /// `Err(insertion point)` like `slice::binary_search`. O(log n) record
    /// header decodes, no allocation.
    fn search(&self, key: &[u8]) -> Result<std::result::Result<usize, usize>> {
        let mut lo = 0;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let info = self.record(mid)?;
            match compare_keys(info.key(&self.mmap), key) {
                Ordering::Equal => return Ok(Ok(mid)),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        Ok(Err(lo))
    }

    /// First position whose key is `>= key`.
    fn lower_bound(&self, key: &[u8]) -> Result<usize> {
        Ok(self.search(key)?.unwrap_or_else(|insert_at| insert_at))
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("count", &self.count)
            .finish()
    }
}

/// Offset table slot `index` as a file position.
fn read_offset(data: &[u8], index: usize) -> Result<usize> {
    let start = index * OFFSET_SIZE;
    let slot = data
        .get(start..start + OFFSET_SIZE)
        .ok_or_else(|| Error::Corruption(format!("offset slot {index} past end of file")))?;
    let mut raw = [0u8; OFFSET_SIZE];
    raw.copy_from_slice(slot);
    usize::try_from(u64::from_le_bytes(raw))
        .map_err(|_| Error::Corruption(format!("offset slot {index} does not fit in memory")))
}
