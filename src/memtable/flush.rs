use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::memtable::Shared;
use crate::types::Entry;

/// Where a flushed buffer goes: the table set.
///
/// `entries` arrive in ascending key order and include tombstones.
/// Persisting an empty slice must be a no-op.
pub trait FlushTarget: Send + Sync {
    fn save_entries(&self, entries: &[Entry]) -> Result<()>;
}

/// One flush request. `reply` is set only for the final flush of `close()`,
/// which waits for the outcome; background flushes are fire-and-forget.
pub(crate) struct FlushJob {
    pub(crate) reply: Option<Sender<Result<()>>>,
}

/// The single background thread that runs flush bodies.
///
/// Being one thread is what keeps flushes from overlapping: jobs run in
/// submission order, one at a time.
pub(crate) struct FlushWorker {
    sender: Mutex<Option<Sender<FlushJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushWorker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("memtable-flush".into())
            .spawn(move || run(shared, receiver))?;
        Ok(FlushWorker {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job. `false` once the worker has been shut down.
    pub(crate) fn submit(&self, job: FlushJob) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    /// Stop accepting jobs, let queued ones finish, join the thread.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| Error::Io(io::Error::other("flush worker panicked")))?;
        }
        Ok(())
    }
}

fn run(shared: Arc<Shared>, receiver: Receiver<FlushJob>) {
    for job in receiver {
        let result = shared.flush_now();
        shared.outstanding.fetch_sub(1, Ordering::SeqCst);

        match job.reply {
            Some(reply) => {
                // close() is waiting and decides what to do with a failure
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "background flush failed, buffered entries dropped");
                }
            }
        }
    }
    tracing::debug!("flush worker stopped");
}
