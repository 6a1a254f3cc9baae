use crate::error::{Error, Result};
use crate::sstable::varsize::{MAX_WIDTH, put_size, read_size, size_width};
use crate::types::Entry;

/// `meta` bit marking a tombstone.
pub const TOMBSTONE: u8 = 0x01;

/// Fixed bytes in front of every record: meta + size_info.
pub const HEADER_SIZE: usize = 2;

/// A record's layout inside the table file.
///
/// ```text
/// ┌──────────┬───────────────┬─────────┬───────────┬─────┬───────┐
/// │ meta(1B) │ size_info(1B) │ key_len │ value_len │ key │ value │
/// └──────────┴───────────────┴─────────┴───────────┴─────┴───────┘
///              hi nibble = key_len width, lo nibble = value_len width
/// ```
///
/// Tombstones carry no value and a zero value-length width.
#[derive(Debug, Clone, Copy)]
pub struct RecordInfo {
    pub meta: u8,
    pub key_offset: usize,
    pub key_len: usize,
    pub value_offset: usize,
    pub value_len: usize,
}

impl RecordInfo {
    /// Decode the record header starting at `offset`, checking that the
    /// whole record lies inside `data`.
    pub fn decode(data: &[u8], offset: usize) -> Result<Self> {
        let header = data
            .get(offset..offset.saturating_add(HEADER_SIZE))
            .ok_or_else(|| corruption(offset, "header past end of file"))?;
        let meta = header[0];
        let key_width = (header[1] >> 4) as usize;
        let value_width = (header[1] & 0x0f) as usize;
        if key_width > MAX_WIDTH || value_width > MAX_WIDTH {
            return Err(corruption(offset, "length width over 8 bytes"));
        }

        let sizes_start = offset + HEADER_SIZE;
        let sizes = data
            .get(sizes_start..sizes_start + key_width + value_width)
            .ok_or_else(|| corruption(offset, "lengths past end of file"))?;
        let key_len = to_usize(read_size(&sizes[..key_width]), offset)?;
        let value_len = to_usize(read_size(&sizes[key_width..]), offset)?;

        let key_offset = sizes_start + key_width + value_width;
        let value_offset = key_offset
            .checked_add(key_len)
            .ok_or_else(|| corruption(offset, "key length overflow"))?;
        let end = value_offset
            .checked_add(value_len)
            .ok_or_else(|| corruption(offset, "value length overflow"))?;
        if end > data.len() {
            return Err(corruption(offset, "record past end of file"));
        }

        Ok(RecordInfo {
            meta,
            key_offset,
            key_len,
            value_offset,
            value_len,
        })
    }

    pub fn is_tombstone(&self) -> bool {
        self.meta & TOMBSTONE == TOMBSTONE
    }

    pub fn key<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.key_offset..self.key_offset + self.key_len]
    }

    pub fn value<'a>(&self, data: &'a [u8]) -> Option<&'a [u8]> {
        if self.is_tombstone() {
            return None;
        }
        Some(&data[self.value_offset..self.value_offset + self.value_len])
    }

    /// Copy the record out of the mapped file.
    pub fn to_entry(&self, data: &[u8]) -> Entry {
        Entry::new(self.key(data).to_vec(), self.value(data).map(<[u8]>::to_vec))
    }
}

/// Bytes `entry` occupies on disk.
pub fn encoded_len(entry: &Entry) -> usize {
    let key_len = entry.key.len() as u64;
    let mut len = HEADER_SIZE + size_width(key_len) + entry.key.len();
    if let Some(value) = &entry.value {
        len += size_width(value.len() as u64) + value.len();
    }
    len
}

/// Append one record to `buf`.
pub fn encode_record(buf: &mut Vec<u8>, entry: &Entry) {
    let key_len = entry.key.len() as u64;
    let value_len = entry.value.as_ref().map_or(0, |v| v.len() as u64);
    let key_width = size_width(key_len);
    let value_width = if entry.is_tombstone() { 0 } else { size_width(value_len) };

    let meta = if entry.is_tombstone() { TOMBSTONE } else { 0 };
    buf.push(meta);
    buf.push(((key_width as u8) << 4) | value_width as u8);
    put_size(buf, key_len);
    if value_width > 0 {
        put_size(buf, value_len);
    }
    buf.extend_from_slice(&entry.key);
    if let Some(value) = &entry.value {
        buf.extend_from_slice(value);
    }
}

fn to_usize(n: u64, offset: usize) -> Result<usize> {
    usize::try_from(n).map_err(|_| corruption(offset, "length does not fit in memory"))
}

fn corruption(offset: usize, what: &str) -> Error {
    Error::Corruption(format!("record at offset {offset}: {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_record_layout() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &Entry::put(b"key".to_vec(), b"value".to_vec()));
        // meta, size_info(1 byte key len, 1 byte value len), 3, 5, key, value
        assert_eq!(&buf[..4], &[0x00, 0x11, 3, 5]);
        assert_eq!(&buf[4..7], b"key");
        assert_eq!(&buf[7..], b"value");
        assert_eq!(buf.len(), encoded_len(&Entry::put(b"key".to_vec(), b"value".to_vec())));
    }

    #[test]
    fn tombstone_record_has_no_value() {
        let entry = Entry::tombstone(b"gone".to_vec());
        let mut buf = Vec::new();
        encode_record(&mut buf, &entry);
        assert_eq!(&buf[..3], &[TOMBSTONE, 0x10, 4]);
        assert_eq!(buf.len(), encoded_len(&entry));

        let info = RecordInfo::decode(&buf, 0).unwrap();
        assert!(info.is_tombstone());
        assert_eq!(info.to_entry(&buf), entry);
    }

    #[test]
    fn empty_value_is_not_a_tombstone() {
        let entry = Entry::put(b"k".to_vec(), Vec::new());
        let mut buf = Vec::new();
        encode_record(&mut buf, &entry);
        let info = RecordInfo::decode(&buf, 0).unwrap();
        assert!(!info.is_tombstone());
        assert_eq!(info.value(&buf), Some(&[][..]));
    }

    #[test]
    fn truncated_record_is_corruption() {
        let mut buf = Vec::new();
        encode_record(&mut buf, &Entry::put(b"key".to_vec(), b"value".to_vec()));
        buf.truncate(buf.len() - 1);
        assert!(matches!(RecordInfo::decode(&buf, 0), Err(Error::Corruption(_))));
        assert!(matches!(RecordInfo::decode(&buf, buf.len()), Err(Error::Corruption(_))));
    }
}
