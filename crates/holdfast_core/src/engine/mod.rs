//! The durable storage engine.
//!
//! Owns the backing store on behalf of a [`Space`](crate::space::Space):
//! restores it on boot, serializes all writes through one writer
//! thread, and hosts the idkey migration utility. Each engine moves
//! through `Empty -> Restoring -> Ready`, with `Closed` reachable from
//! any state.

pub mod blob;
pub mod migration;
pub mod restore;
mod writer;

pub use restore::RestoreSink;
pub use writer::DoneFn;

use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use holdfast_storage::{StorageResult, TableBackend, WriteBatch};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Lifecycle state of a storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing restored yet.
    Empty,
    /// A restore is in progress.
    Restoring,
    /// Restored and accepting writes.
    Ready,
    /// Shut down; all further work is rejected.
    Closed,
}

struct Inner {
    state: EngineState,
    jobs: Option<mpsc::Sender<writer::Job>>,
    worker: Option<JoinHandle<()>>,
}

/// Serializes durable reads and writes against one backing store.
pub struct StorageEngine {
    backend: Arc<dyn TableBackend>,
    inner: Mutex<Inner>,
}

impl StorageEngine {
    /// Creates an engine over a backend and starts its writer thread.
    #[must_use]
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        let (jobs, worker) = writer::spawn(Arc::clone(&backend));
        Self {
            backend,
            inner: Mutex::new(Inner {
                state: EngineState::Empty,
                jobs: Some(jobs),
                worker: Some(worker),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.inner.lock().state
    }

    /// The backing store this engine owns.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn TableBackend> {
        &self.backend
    }

    /// Restores the backing store into `sink`, blocking until done.
    ///
    /// Runs once per engine; the state moves to `Ready` on success and
    /// back to `Empty` on failure so a caller may retry.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] unless the engine is
    /// `Empty`, and with [`CoreError::RestoreFailed`] if the backend
    /// cannot be read.
    pub fn restore(&self, schema: &Schema, sink: &mut RestoreSink<'_>) -> CoreResult<()> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                EngineState::Empty => inner.state = EngineState::Restoring,
                EngineState::Closed => return Err(CoreError::EngineClosed),
                _ => {
                    return Err(CoreError::invalid_operation(
                        "engine is already restored",
                    ))
                }
            }
        }
        match restore::run(self.backend.as_ref(), schema, sink) {
            Ok(()) => {
                self.inner.lock().state = EngineState::Ready;
                Ok(())
            }
            Err(err) => {
                self.inner.lock().state = EngineState::Empty;
                Err(err)
            }
        }
    }

    /// Submits a write batch. Batches commit in submission order;
    /// `on_done` may run on the writer thread.
    ///
    /// Returns `false`, without invoking `on_done`, if the engine is
    /// closed. Batches accepted before a close still complete.
    pub fn store(&self, batch: WriteBatch, on_done: DoneFn) -> bool {
        self.submit(writer::Job::Write { batch, on_done })
    }

    /// Truncates all four backing tables in one transaction, through
    /// the writer queue so it stays ordered against pending batches.
    ///
    /// Returns `false` if the engine is closed.
    pub fn clear(&self, on_done: DoneFn) -> bool {
        self.submit(writer::Job::Clear { on_done })
    }

    fn submit(&self, job: writer::Job) -> bool {
        let inner = self.inner.lock();
        if inner.state == EngineState::Closed {
            return false;
        }
        match &inner.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        }
    }

    /// Shuts the engine down, draining accepted writes first. Further
    /// `store` and `clear` calls return `false`. Idempotent.
    pub fn close(&self) {
        let worker = {
            let mut inner = self.inner.lock();
            inner.state = EngineState::Closed;
            // Dropping the sender lets the writer finish its queue and
            // exit.
            inner.jobs = None;
            inner.worker.take()
        };
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("writer thread panicked during shutdown");
            }
            tracing::debug!("engine closed");
        }
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reads a full blob, in windows of at most the backend's single-cell
/// read limit.
pub(crate) fn read_full_blob(
    backend: &dyn TableBackend,
    seq: i64,
    blob_len: usize,
) -> StorageResult<Vec<u8>> {
    let limit = backend.max_cell_read().max(1);
    if blob_len <= limit {
        return backend.read_blob(seq, 0, blob_len);
    }
    let mut blob = Vec::with_capacity(blob_len);
    let mut offset = 0;
    while offset < blob_len {
        let len = limit.min(blob_len - offset);
        blob.extend_from_slice(&backend.read_blob(seq, offset, len)?);
        offset += len;
    }
    Ok(blob)
}
