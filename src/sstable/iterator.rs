use std::sync::Arc;

use crate::error::Result;
use crate::sstable::reader::SSTable;
use crate::types::Entry;

/// Lazy cursor over a slice `[next, end)` of a table's offset table.
///
/// Holds its table alive, so a scan keeps working even if compaction deletes
/// the file underneath it. Each `next()` decodes one record; a corrupt
/// record ends the scan after its error is returned.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    next: usize,
    end: usize,
}

impl SSTableIterator {
    pub(crate) fn new(table: Arc<SSTable>, start: usize, end: usize) -> Self {
        SSTableIterator {
            table,
            next: start,
            end,
        }
    }

    /// Records left to yield.
    pub fn remaining(&self) -> usize {
        self.end - self.next
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Result<Entry>> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        match self.table.record(index) {
            Ok(info) => Some(Ok(info.to_entry(self.table.data()))),
            Err(e) => {
                self.next = self.end;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
