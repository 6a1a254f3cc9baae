pub mod filter;
pub mod merge;

pub use filter::SkipTombstones;
pub use merge::{MergeIterator, PrioritySource};

use crate::error::Result;
use crate::types::Entry;

/// The central iteration currency of the engine.
///
/// Every sorted data source (write buffer range, sorted table range, merged
/// view) yields entries in ascending key order as `Result<Entry>`, so they
/// compose: MergeIterator takes a list of them and merges them.
pub type EntryIter = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Cached head of a [`PeekableIter`].
#[derive(Debug)]
enum Head {
    /// Nothing pulled from the source yet.
    Unknown,
    /// Head entry pulled and cached, not consumed.
    Ready(Entry),
    /// Source exhausted (or failed once).
    Drained,
}

/// A cursor over an ordered source that can look at its next entry without
/// consuming it.
///
/// ```text
///            peek()                  next()
/// Unknown ──────────► Ready(entry) ─────────► Unknown
///    │                                           │
///    └──── source empty ───► Drained ◄───────────┘
/// ```
///
/// A source error is handed out exactly once; after that the cursor is
/// drained.
pub struct PeekableIter<I = EntryIter> {
    inner: I,
    head: Head,
}

impl<I> PeekableIter<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    pub fn new(inner: I) -> Self {
        PeekableIter {
            inner,
            head: Head::Unknown,
        }
    }

    /// Look at the next entry, pulling one from the source if none is
    /// cached.
    pub fn peek(&mut self) -> Result<Option<&Entry>> {
        if let Head::Unknown = self.head {
            self.head = match self.inner.next() {
                Some(Ok(entry)) => Head::Ready(entry),
                Some(Err(e)) => {
                    self.head = Head::Drained;
                    return Err(e);
                }
                None => Head::Drained,
            };
        }
        Ok(self.cached())
    }

    /// The cached head, if the last `peek` produced one.
    pub fn cached(&self) -> Option<&Entry> {
        match &self.head {
            Head::Ready(entry) => Some(entry),
            _ => None,
        }
    }

    /// Whether another entry is available.
    pub fn has_next(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_some())
    }
}

impl<I> Iterator for PeekableIter<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Result<Entry>> {
        match std::mem::replace(&mut self.head, Head::Unknown) {
            Head::Ready(entry) => Some(Ok(entry)),
            Head::Drained => {
                self.head = Head::Drained;
                None
            }
            Head::Unknown => match self.inner.next() {
                Some(Ok(entry)) => Some(Ok(entry)),
                Some(Err(e)) => {
                    self.head = Head::Drained;
                    Some(Err(e))
                }
                None => {
                    self.head = Head::Drained;
                    None
                }
            },
        }
    }
}
