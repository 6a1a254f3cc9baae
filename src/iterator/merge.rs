use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};
use crate::iterator::PeekableIter;
use crate::types::{Entry, compare_keys};

/// An ordered source tagged with its freshness rank.
///
/// Higher priority wins when several sources hold the same key. Sorted
/// tables are ranked oldest-to-newest from 0; the write buffer, when it has
/// data in range, gets the single highest rank.
pub struct PrioritySource {
    priority: usize,
    iter: PeekableIter,
}

impl PrioritySource {
    pub fn new(priority: usize, iter: PeekableIter) -> Self {
        PrioritySource { priority, iter }
    }
}

/// Heap slot. Only sources with a cached head are ever pushed.
struct Cursor(PrioritySource);

impl Cursor {
    fn key(&self) -> &[u8] {
        self.0.iter.cached().map(|e| e.key.as_slice()).unwrap_or_default()
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    // BinaryHeap is a max-heap: the "greatest" cursor is the one with the
    // smallest key, and among equal keys the highest priority.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(other.key(), self.key()).then(self.0.priority.cmp(&other.0.priority))
    }
}

/// Merges multiple sorted sources into a single sorted stream.
///
/// Used for:
/// - Range scans across the write buffer + all sorted tables
/// - The write buffer's own active/flushing view
/// - Compaction (merging every table into one)
///
/// Ordering guarantee: keys come out strictly ascending.
/// Deduplication: when several sources share a key, all of them are
/// advanced past it and only the highest-priority entry is yielded.
/// Tombstones are passed through; wrap in `SkipTombstones` to hide them.
///
/// Not rewindable: build a new instance to scan again.
pub struct MergeIterator {
    heap: BinaryHeap<Cursor>,
    /// Source failure discovered after a winner was already taken.
    pending: Option<Error>,
}

impl MergeIterator {
    /// Build the initial heap from every non-empty source.
    pub fn new(sources: Vec<PrioritySource>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for mut source in sources {
            if source.iter.peek()?.is_some() {
                heap.push(Cursor(source));
            }
        }
        Ok(MergeIterator {
            heap,
            pending: None,
        })
    }

    /// Put a cursor back if its source still has entries.
    fn reinsert(&mut self, mut cursor: Cursor) -> Result<()> {
        if cursor.0.iter.peek()?.is_some() {
            self.heap.push(cursor);
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Entry>> {
        if let Some(e) = self.pending.take() {
            return Err(e);
        }
        let Some(mut top) = self.heap.pop() else {
            return Ok(None);
        };
        let winner = match top.0.iter.next() {
            Some(entry) => entry?,
            None => return Ok(None),
        };
        if let Err(e) = self.advance_past(&winner.key, top) {
            self.pending = Some(e);
        }
        Ok(Some(winner))
    }

    /// Reinsert the winning cursor and move every other source holding
    /// `key` past it, so stale versions are never yielded.
    fn advance_past(&mut self, key: &[u8], winner: Cursor) -> Result<()> {
        self.reinsert(winner)?;
        while self
            .heap
            .peek()
            .is_some_and(|c| compare_keys(c.key(), key) == Ordering::Equal)
        {
            if let Some(mut stale) = self.heap.pop() {
                if let Some(Err(e)) = stale.0.iter.next() {
                    return Err(e);
                }
                self.reinsert(stale)?;
            }
        }
        Ok(())
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Result<Entry>> {
        self.step().transpose()
    }
}
