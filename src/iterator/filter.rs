use crate::error::Result;
use crate::types::Entry;

/// Hides tombstones from a scan.
///
/// The merge underneath still sees delete markers (it needs them to shadow
/// older versions); callers iterating a range never do.
pub struct SkipTombstones<I> {
    inner: I,
}

impl<I> SkipTombstones<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    pub fn new(inner: I) -> Self {
        SkipTombstones { inner }
    }
}

impl<I> Iterator for SkipTombstones<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Result<Entry>> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.is_tombstone() => continue,
                other => return Some(other),
            }
        }
    }
}
