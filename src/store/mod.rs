//! The set of sorted tables on disk.
//!
//! Tables are kept oldest-to-newest by id. Ids only grow, so on restart the
//! directory listing sorted by id restores the same freshness order.

pub mod compaction;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::iterator::{EntryIter, PeekableIter};
use crate::memtable::FlushTarget;
use crate::sstable::{self, SSTable};
use crate::types::Entry;

/// Owns every sorted table in one directory.
pub struct TableSet {
    dir: PathBuf,
    /// Oldest first.
    tables: RwLock<Vec<Arc<SSTable>>>,
    next_id: AtomicU64,
    /// Serializes flushes and compaction, so a compacted table is always
    /// the newest one.
    maintenance: Mutex<()>,
    closed: AtomicBool,
}

impl TableSet {
    /// Open (creating if needed) the table directory.
    ///
    /// Leftover `*.tmp` files from an interrupted save are removed; every
    /// `<id>.sst` is opened, and a malformed one fails the whole open.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut ids = Vec::new();
        for dirent in fs::read_dir(&dir)? {
            let path = dirent?.path();
            if path.extension().is_some_and(|ext| ext == sstable::TMP_EXT) {
                tracing::warn!(path = %path.display(), "removing unfinished table");
                fs::remove_file(&path)?;
            } else if let Some(id) = sstable::parse_table_id(&path) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let tables = ids
            .iter()
            .map(|&id| SSTable::open(&dir, id).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let next_id = ids.last().map_or(0, |id| id + 1);
        tracing::debug!(dir = %dir.display(), tables = tables.len(), "opened table set");

        Ok(TableSet {
            dir,
            tables: RwLock::new(tables),
            next_id: AtomicU64::new(next_id),
            maintenance: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Point lookup across all tables, newest first. The result may be a
    /// tombstone.
    pub fn load(&self, key: &[u8]) -> Result<Option<Entry>> {
        for table in self.snapshot().iter().rev() {
            if let Some(entry) = table.find_entry(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// One cursor over `[from, to)` per table, oldest first. Position in
    /// the list is the merge priority.
    pub fn load_range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Vec<PeekableIter>> {
        self.snapshot()
            .iter()
            .map(|table| {
                let iter: EntryIter = Box::new(table.find_entries(from, to)?);
                Ok(PeekableIter::new(iter))
            })
            .collect()
    }

    /// Number of tables.
    pub fn size(&self) -> usize {
        self.tables.read().len()
    }

    /// Table ids, oldest first.
    pub fn ids(&self) -> Vec<u64> {
        self.tables.read().iter().map(|t| t.id()).collect()
    }

    /// Merge every table into one, dropping tombstones and shadowed
    /// versions, then delete the inputs. No-op with fewer than two tables.
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.maintenance.lock();
        let inputs = self.snapshot();
        if inputs.len() < 2 {
            return Ok(());
        }

        let entries = compaction::merge_tables(&inputs)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let output = if SSTable::save(&self.dir, id, &entries)? {
            Some(Arc::new(SSTable::open(&self.dir, id)?))
        } else {
            None
        };

        {
            let mut tables = self.tables.write();
            tables.retain(|t| !inputs.iter().any(|old| old.id() == t.id()));
            if let Some(output) = output {
                tables.insert(0, output);
            }
        }

        for table in &inputs {
            if let Err(e) = table.delete() {
                tracing::warn!(table_id = table.id(), error = %e, "failed to delete compacted table");
            }
        }
        tracing::info!(inputs = inputs.len(), entries = entries.len(), table_id = id, "compacted tables");
        Ok(())
    }

    /// Refuse further saves and compactions. Open tables stay readable.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<SSTable>> {
        self.tables.read().clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl FlushTarget for TableSet {
    /// Persist a flushed buffer as the newest table. Empty input creates
    /// nothing and consumes no id.
    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        self.ensure_open()?;
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.maintenance.lock();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if SSTable::save(&self.dir, id, entries)? {
            let table = Arc::new(SSTable::open(&self.dir, id)?);
            self.tables.write().push(table);
            tracing::info!(table_id = id, entries = entries.len(), "saved sorted table");
        }
        Ok(())
    }
}
