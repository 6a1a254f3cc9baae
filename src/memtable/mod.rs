//! The concurrent write buffer.
//!
//! Every write lands here first. Once the buffered bytes reach the flush
//! threshold the buffer hands itself to a background worker, which persists
//! it as a new sorted table while a fresh buffer keeps taking writes.
//!
//! ```text
//!   upsert ──► active ──(threshold)──► flushing ──(worker)──► FlushTarget
//!                ▲                        │
//!   get/range ───┴── active, then ────────┘
//! ```
//!
//! Shared state is `active`, `flushing`, the byte counter, the single-flight
//! gate and the count of outstanding flush jobs. Each is updated atomically;
//! no lock is held across an upsert.
//!
//! The active/flushing swap runs on the worker, not at the moment the
//! threshold is crossed. Upserts arriving between the trigger and the swap
//! still land in the table about to be flushed, so the buffer can grow past
//! the threshold by whatever is written during one worker scheduling delay.
//! After the swap the worker waits for writers still pinned to the old
//! generation before collecting it, so no upsert is lost in between.

pub mod cell;
pub mod flush;
pub mod iter;

pub use cell::ValueCell;
pub use flush::FlushTarget;
pub use iter::MemTableIter;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_skiplist::SkipMap;
use crossbeam_utils::Backoff;

use crate::error::{Error, Result};
use crate::iterator::{EntryIter, MergeIterator, PeekableIter, PrioritySource};
use crate::types::{Entry, Key, value_size};
use flush::{FlushJob, FlushWorker};

/// Lock-free ordered map backing one generation of the buffer.
pub type BufferMap = SkipMap<Key, Arc<ValueCell>>;

/// One buffer generation plus the number of upserts currently writing
/// into it.
pub(crate) struct Generation {
    map: Arc<BufferMap>,
    writers: AtomicUsize,
}

impl Generation {
    fn new() -> Self {
        Generation {
            map: Arc::new(BufferMap::new()),
            writers: AtomicUsize::new(0),
        }
    }

    /// Insert or replace; returns the byte delta.
    fn insert(&self, entry: Entry) -> i64 {
        let key_len = entry.key.len() as i64;
        let new_len = value_size(entry.value.as_deref()) as i64;

        let cell = Arc::new(ValueCell::new(entry.value));
        let slot = self.map.get_or_insert(entry.key, Arc::clone(&cell));
        if Arc::ptr_eq(slot.value(), &cell) {
            return key_len + new_len;
        }

        let prev = slot.value().replace(cell.take());
        new_len - value_size(prev.as_deref().map(Vec::as_slice)) as i64
    }
}

/// State shared between callers and the flush worker.
pub(crate) struct Shared {
    active: ArcSwap<Generation>,
    flushing: ArcSwapOption<Generation>,
    /// Bytes buffered in `active` since the last swap. Signed: a shrinking
    /// replacement racing with a reset may briefly push it below zero.
    used: AtomicI64,
    /// Single-flight gate, `true` = open.
    gate_open: AtomicBool,
    /// Flush jobs queued or running.
    pub(crate) outstanding: AtomicUsize,
    /// Set by `close()` before it queues the final flush.
    closed: AtomicBool,
    threshold: i64,
    target: Arc<dyn FlushTarget>,
}

impl Shared {
    /// Insert into `active` and return the byte delta.
    ///
    /// `closed` is checked while pinned: a writer that still sees it unset
    /// is registered on a generation the final flush will wait for.
    fn insert(&self, entry: Entry) -> Result<i64> {
        let generation = self.pin_active();
        if self.closed.load(Ordering::SeqCst) {
            generation.writers.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Closed);
        }
        let delta = generation.insert(entry);
        generation.writers.fetch_sub(1, Ordering::SeqCst);
        Ok(delta)
    }

    /// Register as a writer of the current `active` generation. Retries if
    /// a swap slipped in between the load and the registration.
    fn pin_active(&self) -> Arc<Generation> {
        loop {
            let generation = self.active.load_full();
            generation.writers.fetch_add(1, Ordering::SeqCst);
            if Arc::ptr_eq(&generation, &self.active.load()) {
                return generation;
            }
            generation.writers.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// The flush body. Runs only on the worker thread.
    pub(crate) fn flush_now(&self) -> Result<()> {
        // Publish the snapshot as `flushing` before replacing `active`, so
        // readers always find its entries in one place or the other.
        let snapshot = self.active.load_full();
        self.flushing.store(Some(Arc::clone(&snapshot)));
        self.active.store(Arc::new(Generation::new()));
        self.used.store(0, Ordering::SeqCst);
        self.gate_open.store(true, Ordering::SeqCst);

        // Bounded by the inserts already in flight on the old generation.
        let backoff = Backoff::new();
        while snapshot.writers.load(Ordering::SeqCst) > 0 {
            backoff.snooze();
        }

        let entries: Vec<Entry> = snapshot
            .map
            .iter()
            .map(|slot| Entry::new(slot.key().clone(), slot.value().get()))
            .collect();
        let result = self.target.save_entries(&entries);
        if result.is_ok() && !entries.is_empty() {
            tracing::info!(entries = entries.len(), "flushed write buffer");
        }

        self.flushing.store(None);
        result
    }
}

/// In-memory sorted buffer for writes, safe to share between threads.
///
/// Deletes are tombstones: entries with no value. They are stored and
/// flushed like any other entry because older versions of the key may
/// still live in sorted tables on disk.
pub struct MemTable {
    shared: Arc<Shared>,
    worker: FlushWorker,
}

impl MemTable {
    /// Create an empty buffer flushing to `target` once `threshold_bytes`
    /// are buffered. Spawns the flush worker.
    pub fn new(target: Arc<dyn FlushTarget>, threshold_bytes: u64) -> Result<Self> {
        let shared = Arc::new(Shared {
            active: ArcSwap::from_pointee(Generation::new()),
            flushing: ArcSwapOption::empty(),
            used: AtomicI64::new(0),
            gate_open: AtomicBool::new(true),
            outstanding: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            threshold: i64::try_from(threshold_bytes).unwrap_or(i64::MAX),
            target,
        });
        let worker = FlushWorker::spawn(Arc::clone(&shared))?;
        Ok(MemTable { shared, worker })
    }

    /// Look up `key` in `active`, then in the table being flushed.
    ///
    /// Returns the stored entry verbatim; a tombstone comes back as an
    /// entry with no value.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        let active = self.shared.active.load_full();
        if let Some(entry) = lookup(&active.map, key) {
            return Some(entry);
        }
        self.shared
            .flushing
            .load_full()
            .and_then(|flushing| lookup(&flushing.map, key))
    }

    /// Ordered view of `[from, to)` across `active` and `flushing`.
    /// `active` wins when both hold a key. Tombstones are included.
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<MergeIterator> {
        // `active` first: a swap in between then shows up as an extra
        // (duplicate) flushing source rather than as missing entries.
        let active = self.shared.active.load_full();
        let flushing = self.shared.flushing.load_full();

        let mut sources = Vec::with_capacity(2);
        if let Some(flushing) = flushing {
            sources.push(PrioritySource::new(0, source(&flushing.map, from, to)));
        }
        sources.push(PrioritySource::new(1, source(&active.map, from, to)));
        MergeIterator::new(sources)
    }

    /// Insert or replace `entry.key`.
    ///
    /// Crossing the threshold schedules a flush. Crossing it again while a
    /// flush is still outstanding fails with `Error::OutOfMemory`: the
    /// entry is buffered, but the caller has to back off.
    pub fn upsert(&self, entry: Entry) -> Result<()> {
        let delta = self.shared.insert(entry)?;
        let used = self.shared.used.fetch_add(delta, Ordering::SeqCst) + delta;
        if used < self.shared.threshold {
            return Ok(());
        }

        if self
            .shared
            .gate_open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if self.shared.outstanding.load(Ordering::SeqCst) > 0
                && self.shared.used.load(Ordering::SeqCst) >= self.shared.threshold
            {
                self.shared.gate_open.store(true, Ordering::SeqCst);
                return Err(Error::OutOfMemory);
            }
            if !self.flush(false) {
                self.shared.gate_open.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Schedule a flush on the worker. Returns whether one was scheduled.
    ///
    /// Unless `force` is set, declines when the buffer is empty or another
    /// flush is outstanding: requests are coalesced, not queued.
    pub fn flush(&self, force: bool) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            return false;
        }
        if force {
            self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        } else if self.shared.active.load().map.is_empty()
            || self
                .shared
                .outstanding
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return false;
        }

        if self.worker.submit(FlushJob { reply: None }) {
            tracing::debug!(force, "flush scheduled");
            true
        } else {
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    /// Flush whatever is buffered, wait for it, and stop the worker.
    ///
    /// A failure of that final flush is returned. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (reply, outcome) = crossbeam_channel::bounded(1);
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        let result = if self.worker.submit(FlushJob { reply: Some(reply) }) {
            outcome
                .recv()
                .unwrap_or_else(|_| Err(Error::Io(std::io::Error::other("flush worker stopped"))))
        } else {
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        };

        if let Err(e) = &result {
            tracing::warn!(error = %e, "final flush on close failed");
        }
        self.worker.shutdown()?;
        result
    }

    /// Bytes buffered since the last swap.
    pub fn used_bytes(&self) -> u64 {
        self.shared.used.load(Ordering::SeqCst).max(0) as u64
    }

    /// Whether a flush is queued or running.
    pub fn is_flushing(&self) -> bool {
        self.shared.outstanding.load(Ordering::SeqCst) > 0
    }

    /// Whether neither `active` nor `flushing` holds anything.
    pub fn is_empty(&self) -> bool {
        self.shared.active.load().map.is_empty()
            && self
                .shared
                .flushing
                .load_full()
                .is_none_or(|flushing| flushing.map.is_empty())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MemTable {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "closing write buffer on drop failed");
        }
    }
}

fn lookup(map: &BufferMap, key: &[u8]) -> Option<Entry> {
    map.get(key)
        .map(|slot| Entry::new(slot.key().clone(), slot.value().get()))
}

fn source(map: &Arc<BufferMap>, from: Option<&[u8]>, to: Option<&[u8]>) -> PeekableIter {
    let iter: EntryIter = Box::new(MemTableIter::new(Arc::clone(map), from, to));
    PeekableIter::new(iter)
}
