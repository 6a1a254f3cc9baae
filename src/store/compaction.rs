use std::sync::Arc;

use crate::error::Result;
use crate::iterator::{EntryIter, MergeIterator, PeekableIter, PrioritySource, SkipTombstones};
use crate::sstable::SSTable;
use crate::types::Entry;

/// Merge `tables` (oldest first) into one ascending, duplicate-free list.
///
/// Newer tables win on equal keys. Tombstones are dropped: every table
/// takes part, so there is nothing older left for them to shadow.
pub fn merge_tables(tables: &[Arc<SSTable>]) -> Result<Vec<Entry>> {
    let sources = tables
        .iter()
        .enumerate()
        .map(|(priority, table)| {
            let iter: EntryIter = Box::new(table.find_entries(None, None)?);
            Ok(PrioritySource::new(priority, PeekableIter::new(iter)))
        })
        .collect::<Result<Vec<_>>>()?;

    SkipTombstones::new(MergeIterator::new(sources)?).collect()
}
