use std::cmp::Ordering;

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// The single key ordering used by the engine: unsigned lexicographic
/// comparison of the raw bytes.
///
/// Sorted tables, the write buffer and the merge iterator all order keys
/// with this function, so a table written by one component is searchable
/// by every other.
#[inline]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// A key together with its value, or a tombstone.
///
/// A Delete writes a tombstone: the key isn't removed, it's marked as
/// deleted with `value == None`. Tombstones are stored, flushed and merged
/// like any other entry so they can shadow older versions on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Option<Value>,
}

impl Entry {
    pub fn new(key: Key, value: Option<Value>) -> Self {
        Entry { key, value }
    }

    /// A normal put.
    pub fn put(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Entry {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A delete marker for `key`.
    pub fn tombstone(key: impl Into<Key>) -> Self {
        Entry {
            key: key.into(),
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Bytes accounted against the write buffer threshold.
    pub fn size(&self) -> usize {
        self.key.len() + value_size(self.value.as_deref())
    }
}

/// Size of an optional value; tombstones weigh nothing.
#[inline]
pub(crate) fn value_size(value: Option<&[u8]>) -> usize {
    value.map_or(0, <[u8]>::len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_is_unsigned_lexicographic() {
        assert_eq!(compare_keys(b"a", b"b"), Ordering::Less);
        assert_eq!(compare_keys(b"ab", b"a"), Ordering::Greater);
        assert_eq!(compare_keys(b"", b""), Ordering::Equal);
        // 0xFF sorts after ASCII, not before as a signed byte would
        assert_eq!(compare_keys(&[0xFF], b"z"), Ordering::Greater);
    }

    #[test]
    fn tombstone_size_counts_only_key() {
        assert_eq!(Entry::tombstone(b"key".to_vec()).size(), 3);
        assert_eq!(Entry::put(b"key".to_vec(), b"value".to_vec()).size(), 8);
    }
}
