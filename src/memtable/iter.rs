use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

use crate::error::Result;
use crate::memtable::BufferMap;
use crate::types::{Entry, Key, compare_keys};

/// Owning cursor over `[from, to)` of one buffer map.
///
/// Re-seeks the skip list past the last yielded key on every step instead
/// of borrowing a crossbeam range, so the cursor can outlive the caller's
/// borrow of the buffer. Each step is O(log n). Keys inserted behind the
/// cursor are not revisited; keys inserted ahead of it may show up.
pub struct MemTableIter {
    map: Arc<BufferMap>,
    position: Bound<Key>,
    to: Option<Key>,
}

impl MemTableIter {
    pub fn new(map: Arc<BufferMap>, from: Option<&[u8]>, to: Option<&[u8]>) -> Self {
        MemTableIter {
            map,
            position: from.map_or(Bound::Unbounded, |k| Bound::Included(k.to_vec())),
            to: to.map(<[u8]>::to_vec),
        }
    }
}

impl Iterator for MemTableIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Result<Entry>> {
        let slot = match &self.position {
            Bound::Unbounded => self.map.front(),
            Bound::Included(key) => self.map.lower_bound(Bound::Included(key.as_slice())),
            Bound::Excluded(key) => self.map.lower_bound(Bound::Excluded(key.as_slice())),
        }?;

        if self
            .to
            .as_deref()
            .is_some_and(|to| compare_keys(slot.key(), to) != Ordering::Less)
        {
            return None;
        }

        let key = slot.key().clone();
        let value = slot.value().get();
        self.position = Bound::Excluded(key.clone());
        Some(Ok(Entry::new(key, value)))
    }
}
