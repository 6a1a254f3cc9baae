use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::sstable::record::{encode_record, encoded_len};
use crate::sstable::{OFFSET_SIZE, table_path, tmp_path};
use crate::types::Entry;

/// Write `entries` as table `id` in `dir`. Entries MUST be in ascending key
/// order with no duplicates.
///
/// Write process:
/// 1. Size every record (first pass); nothing is written for an empty input
/// 2. Write the offset table, then the records (second pass) to `<id>.tmp`
/// 3. Flush + fsync, then rename to `<id>.sst`
///
/// The rename is the commit point: a crash before it leaves only a temp
/// file, never a partial table under the real id.
///
/// Returns whether a table was created.
pub fn write_table(dir: &Path, id: u64, entries: &[Entry]) -> Result<bool> {
    if entries.is_empty() {
        return Ok(false);
    }

    // Pass 1: record offsets.
    let mut offsets = Vec::with_capacity(entries.len());
    let mut offset = (entries.len() * OFFSET_SIZE) as u64;
    for entry in entries {
        offsets.push(offset);
        offset += encoded_len(entry) as u64;
    }
    let file_size = offset;

    // Pass 2: offset table + records.
    let tmp = tmp_path(dir, id);
    let file = File::create(&tmp)?;
    let mut writer = BufWriter::new(file);
    for offset in &offsets {
        writer.write_all(&offset.to_le_bytes())?;
    }
    let mut record = Vec::new();
    for entry in entries {
        record.clear();
        encode_record(&mut record, entry);
        writer.write_all(&record)?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&tmp, table_path(dir, id))?;
    tracing::debug!(table_id = id, entries = entries.len(), bytes = file_size, "wrote sorted table");
    Ok(true)
}
