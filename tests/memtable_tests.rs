// Write buffer tests
// Upsert/get/range semantics, size accounting, single-flight flushing and close.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use lsmkv::memtable::{FlushTarget, MemTable};
use lsmkv::{Entry, Error, Result};
use parking_lot::Mutex;

const NO_THRESHOLD: u64 = 1 << 40;

fn put(key: &str, value: &str) -> Entry {
    Entry::put(key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

/// Keeps every non-empty batch it is handed.
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Vec<Entry>>>,
}

impl RecordingSink {
    fn batches(&self) -> Vec<Vec<Entry>> {
        self.batches.lock().clone()
    }
}

impl FlushTarget for RecordingSink {
    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        if !entries.is_empty() {
            self.batches.lock().push(entries.to_vec());
        }
        Ok(())
    }
}

/// Fails every non-empty save.
struct FailingSink;

impl FlushTarget for FailingSink {
    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        Err(Error::Io(std::io::Error::other("disk full")))
    }
}

/// Blocks inside `save_entries` until released. Dropping the release
/// sender lets every pending and future save through.
struct StalledSink {
    entered: Sender<()>,
    release: Receiver<()>,
    inner: RecordingSink,
}

impl FlushTarget for StalledSink {
    fn save_entries(&self, entries: &[Entry]) -> Result<()> {
        let _ = self.entered.send(());
        let _ = self.release.recv();
        self.inner.save_entries(entries)
    }
}

fn stalled() -> (Arc<StalledSink>, Receiver<()>, Sender<()>) {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let sink = Arc::new(StalledSink {
        entered: entered_tx,
        release: release_rx,
        inner: RecordingSink::default(),
    });
    (sink, entered_rx, release_tx)
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn scan(mt: &MemTable) -> Vec<Entry> {
    mt.range(None, None).unwrap().map(|e| e.unwrap()).collect()
}

// =============================================================================
// Test 1: Upsert then get returns the entry; replacing updates it
// =============================================================================
#[test]
fn upsert_then_get() {
    let mt = MemTable::new(Arc::new(RecordingSink::default()), NO_THRESHOLD).unwrap();
    assert_eq!(mt.get(b"k"), None);

    mt.upsert(put("k", "v1")).unwrap();
    assert_eq!(mt.get(b"k"), Some(put("k", "v1")));

    mt.upsert(put("k", "v2")).unwrap();
    assert_eq!(mt.get(b"k"), Some(put("k", "v2")));
    assert_eq!(scan(&mt).len(), 1);
}

// =============================================================================
// Test 2: A tombstone is stored and returned, not treated as absent
// =============================================================================
#[test]
fn tombstone_is_returned_verbatim() {
    let mt = MemTable::new(Arc::new(RecordingSink::default()), NO_THRESHOLD).unwrap();
    mt.upsert(put("k", "v")).unwrap();
    mt.upsert(Entry::tombstone(b"k".to_vec())).unwrap();
    // deleting a key that never existed still records the marker
    mt.upsert(Entry::tombstone(b"ghost".to_vec())).unwrap();

    assert!(mt.get(b"k").unwrap().is_tombstone());
    assert!(mt.get(b"ghost").unwrap().is_tombstone());
    assert_eq!(scan(&mt).len(), 2);
}

// =============================================================================
// Test 3: Byte accounting counts the key once and value deltas after that
// =============================================================================
#[test]
fn size_tracks_new_keys_and_replacements() {
    let mt = MemTable::new(Arc::new(RecordingSink::default()), NO_THRESHOLD).unwrap();

    mt.upsert(put("abc", "12345")).unwrap();
    assert_eq!(mt.used_bytes(), 8);

    mt.upsert(put("abc", "12")).unwrap();
    assert_eq!(mt.used_bytes(), 5);

    mt.upsert(Entry::tombstone(b"abc".to_vec())).unwrap();
    assert_eq!(mt.used_bytes(), 3);

    mt.upsert(put("xy", "")).unwrap();
    assert_eq!(mt.used_bytes(), 5);
}

// =============================================================================
// Test 4: Range is ordered, half-open and includes tombstones
// =============================================================================
#[test]
fn range_is_half_open() {
    let mt = MemTable::new(Arc::new(RecordingSink::default()), NO_THRESHOLD).unwrap();
    for key in ["d", "b", "a", "c", "e"] {
        mt.upsert(put(key, key)).unwrap();
    }
    mt.upsert(Entry::tombstone(b"c".to_vec())).unwrap();

    let keys: Vec<Vec<u8>> = mt
        .range(Some(&b"b"[..]), Some(&b"e"[..]))
        .unwrap()
        .map(|e| e.unwrap().key)
        .collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

    let to_only = mt.range(None, Some(&b"b"[..])).unwrap().count();
    assert_eq!(to_only, 1);
}

// =============================================================================
// Test 5: Crossing the threshold hands the buffer to the sink in key order
// =============================================================================
#[test]
fn threshold_triggers_background_flush() {
    let sink = Arc::new(RecordingSink::default());
    let mt = MemTable::new(sink.clone(), 64).unwrap();

    for i in 0..8 {
        mt.upsert(put(&format!("key{i}"), "value")).unwrap();
    }
    wait_until("flush", || !sink.batches().is_empty() && !mt.is_flushing());

    // only the eighth write crosses 64 bytes, so the swap sees all of them
    let batch = &sink.batches()[0];
    assert_eq!(batch.len(), 8);
    assert!(batch.windows(2).all(|w| w[0].key < w[1].key));
    assert_eq!(mt.used_bytes(), 0);
    assert!(mt.is_empty());

    mt.close().unwrap();
    assert_eq!(sink.batches().len(), 1);
}

// =============================================================================
// Test 6: Flushing an empty buffer is declined
// =============================================================================
#[test]
fn empty_flush_is_declined() {
    let sink = Arc::new(RecordingSink::default());
    let mt = MemTable::new(sink.clone(), NO_THRESHOLD).unwrap();

    assert!(!mt.flush(false));
    mt.close().unwrap();
    assert!(sink.batches().is_empty());
}

// =============================================================================
// Test 7: Flush requests coalesce while one is outstanding
// =============================================================================
#[test]
fn flush_requests_coalesce() {
    let (sink, entered, release) = stalled();
    let mt = MemTable::new(sink.clone(), NO_THRESHOLD).unwrap();

    mt.upsert(put("a", "1")).unwrap();
    assert!(mt.flush(false));
    entered.recv().unwrap();
    assert!(mt.is_flushing());

    mt.upsert(put("b", "1")).unwrap();
    assert!(!mt.flush(false));

    drop(release);
    wait_until("flush", || !mt.is_flushing());
    assert!(mt.flush(false));
    mt.close().unwrap();

    let batches = sink.inner.batches();
    assert_eq!(batches, vec![vec![put("a", "1")], vec![put("b", "1")]]);
}

// =============================================================================
// Test 8: Reads see the table being flushed; the active table wins
// =============================================================================
#[test]
fn reads_merge_active_and_flushing() {
    let (sink, entered, release) = stalled();
    let mt = MemTable::new(sink.clone(), NO_THRESHOLD).unwrap();

    mt.upsert(put("a", "old")).unwrap();
    mt.upsert(put("b", "old")).unwrap();
    assert!(mt.flush(false));
    entered.recv().unwrap();

    mt.upsert(put("b", "new")).unwrap();
    mt.upsert(put("c", "new")).unwrap();

    assert_eq!(mt.get(b"a"), Some(put("a", "old")));
    assert_eq!(mt.get(b"b"), Some(put("b", "new")));
    assert_eq!(
        scan(&mt),
        vec![put("a", "old"), put("b", "new"), put("c", "new")]
    );
    assert!(!mt.is_empty());

    drop(release);
    wait_until("flush", || !mt.is_flushing());
    // the flushed table is gone, only the newer writes remain
    assert_eq!(mt.get(b"a"), None);
    assert_eq!(scan(&mt), vec![put("b", "new"), put("c", "new")]);
    mt.close().unwrap();
}

// =============================================================================
// Test 9: Close flushes what is left and is idempotent
// =============================================================================
#[test]
fn close_flushes_and_is_idempotent() {
    let sink = Arc::new(RecordingSink::default());
    let mt = MemTable::new(sink.clone(), NO_THRESHOLD).unwrap();
    mt.upsert(put("x", "1")).unwrap();
    mt.upsert(put("y", "2")).unwrap();

    mt.close().unwrap();
    assert!(mt.is_closed());
    assert_eq!(sink.batches(), vec![vec![put("x", "1"), put("y", "2")]]);

    mt.close().unwrap();
    assert_eq!(sink.batches().len(), 1);
}

// =============================================================================
// Test 10: The final flush's failure is returned from close
// =============================================================================
#[test]
fn close_surfaces_flush_failure() {
    let mt = MemTable::new(Arc::new(FailingSink), NO_THRESHOLD).unwrap();
    mt.upsert(put("k", "v")).unwrap();
    assert!(matches!(mt.close(), Err(Error::Io(_))));
    // a second close has nothing left to report
    mt.close().unwrap();
}

// =============================================================================
// Test 11: A failed background flush does not poison later writes
// =============================================================================
#[test]
fn background_failure_is_not_reported_to_writers() {
    let mt = MemTable::new(Arc::new(FailingSink), 16).unwrap();
    mt.upsert(put("0123456789", "0123456789")).unwrap();
    wait_until("flush", || !mt.is_flushing());

    // the failed batch is dropped; the buffer keeps accepting writes
    assert_eq!(mt.get(b"0123456789"), None);
    mt.upsert(put("k", "v")).unwrap();
    assert_eq!(mt.get(b"k"), Some(put("k", "v")));
}

// =============================================================================
// Test 12: A closed buffer rejects writes and flush requests
// =============================================================================
#[test]
fn closed_buffer_rejects_writes() {
    let mt = MemTable::new(Arc::new(RecordingSink::default()), NO_THRESHOLD).unwrap();
    mt.close().unwrap();

    assert!(matches!(mt.upsert(put("k", "v")), Err(Error::Closed)));
    assert!(!mt.flush(false));
    assert!(!mt.flush(true));
}
