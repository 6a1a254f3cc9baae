//! Top-level engine: the write buffer in front of the table set.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::iterator::{EntryIter, MergeIterator, PeekableIter, PrioritySource, SkipTombstones};
use crate::memtable::MemTable;
use crate::store::TableSet;
use crate::types::{Entry, Key, Value};

/// Default write buffer threshold: 4 MiB.
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the sorted tables (default: `./lsmkv`).
    pub dir: PathBuf,
    /// Buffered bytes that trigger a flush. `0` disables size-triggered
    /// flushing (default: 4 MiB).
    pub flush_threshold_bytes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir: PathBuf::from("./lsmkv"),
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl Options {
    /// Default options rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Options {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the flush threshold.
    pub fn flush_threshold_bytes(mut self, bytes: u64) -> Self {
        self.flush_threshold_bytes = bytes;
        self
    }

    fn effective_threshold(&self) -> u64 {
        match self.flush_threshold_bytes {
            0 => u64::MAX / 2,
            n => n,
        }
    }
}

/// Outcome of a point lookup that keeps deletes visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(Value),
    /// The newest version is a tombstone.
    Deleted,
    /// No version anywhere.
    Absent,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub table_count: usize,
    pub buffered_bytes: u64,
    pub flush_in_progress: bool,
}

/// Ordered, tombstone-free scan returned by [`DB::range`].
pub type Scan = SkipTombstones<EntryIter>;

/// An embedded LSM key-value store.
///
/// Writes go to the concurrent write buffer; reads merge the buffer with
/// every sorted table, newest version winning. `DB` is `Sync`: share it
/// between threads behind an `Arc`.
pub struct DB {
    memtable: MemTable,
    tables: Arc<TableSet>,
}

impl DB {
    pub fn open(options: Options) -> Result<Self> {
        let tables = Arc::new(TableSet::open(&options.dir)?);
        let memtable = MemTable::new(tables.clone(), options.effective_threshold())?;
        tracing::info!(
            dir = %options.dir.display(),
            tables = tables.size(),
            threshold = options.effective_threshold(),
            "opened database"
        );
        Ok(DB { memtable, tables })
    }

    /// Insert, overwrite or (with `None`) delete `key`.
    pub fn upsert(&self, key: impl Into<Key>, value: Option<Value>) -> Result<()> {
        self.memtable.upsert(Entry::new(key.into(), value))
    }

    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.memtable.upsert(Entry::put(key, value))
    }

    /// Write a tombstone for `key`.
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        self.memtable.upsert(Entry::tombstone(key))
    }

    /// Value of `key`, or `None` if it was never written or was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        Ok(match self.lookup(key)? {
            Lookup::Found(value) => Some(value),
            Lookup::Deleted | Lookup::Absent => None,
        })
    }

    /// Point lookup distinguishing a deleted key from one never written.
    pub fn lookup(&self, key: &[u8]) -> Result<Lookup> {
        let newest = match self.memtable.get(key) {
            Some(entry) => Some(entry),
            None => self.tables.load(key)?,
        };
        Ok(match newest {
            Some(Entry { value: Some(value), .. }) => Lookup::Found(value),
            Some(Entry { value: None, .. }) => Lookup::Deleted,
            None => Lookup::Absent,
        })
    }

    /// Live entries in `[from, to)`, ascending. `None` bounds are open.
    ///
    /// The buffer is captured before the tables, so entries moving from
    /// one to the other mid-call are seen at least once.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Scan> {
        let mut memory = PeekableIter::new(Box::new(self.memtable.range(from, to)?) as EntryIter);
        let tables = self.tables.load_range(from, to)?;
        if tables.is_empty() {
            let memory: EntryIter = Box::new(memory);
            return Ok(SkipTombstones::new(memory));
        }

        let mut sources: Vec<PrioritySource> = tables
            .into_iter()
            .enumerate()
            .map(|(priority, iter)| PrioritySource::new(priority, iter))
            .collect();
        if memory.has_next()? {
            sources.push(PrioritySource::new(sources.len(), memory));
        }
        let merged: EntryIter = Box::new(MergeIterator::new(sources)?);
        Ok(SkipTombstones::new(merged))
    }

    /// Every live entry, ascending.
    pub fn all(&self) -> Result<Scan> {
        self.range(None, None)
    }

    /// Live entries with key `>= from`.
    pub fn all_from(&self, from: &[u8]) -> Result<Scan> {
        self.range(Some(from), None)
    }

    /// Live entries with key `< to`.
    pub fn all_to(&self, to: &[u8]) -> Result<Scan> {
        self.range(None, Some(to))
    }

    /// Ask for a background flush. Returns whether one was scheduled.
    pub fn flush(&self) -> bool {
        self.memtable.flush(false)
    }

    /// Merge all sorted tables into one.
    pub fn compact(&self) -> Result<()> {
        self.tables.compact()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            table_count: self.tables.size(),
            buffered_bytes: self.memtable.used_bytes(),
            flush_in_progress: self.memtable.is_flushing(),
        }
    }

    /// Flush the buffer, wait for it, and close the table set.
    pub fn close(&self) -> Result<()> {
        self.memtable.close()?;
        self.tables.close()
    }
}
