//! The dedicated writer thread.
//!
//! All durable mutations flow through one thread consuming a channel,
//! so batches commit in exactly the order they were submitted and the
//! backend never sees concurrent write transactions.

use crate::error::{CoreError, CoreResult};
use holdfast_storage::{TableBackend, WriteBatch};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

/// Completion callback for a submitted job. May run on the writer
/// thread.
pub type DoneFn = Box<dyn FnOnce(CoreResult<()>) + Send>;

pub(crate) enum Job {
    Write { batch: WriteBatch, on_done: DoneFn },
    Clear { on_done: DoneFn },
}

/// Spawns the writer thread. Dropping the sender drains remaining jobs
/// and stops the thread.
pub(crate) fn spawn(backend: Arc<dyn TableBackend>) -> (mpsc::Sender<Job>, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel::<Job>();
    let handle = std::thread::spawn(move || {
        tracing::debug!("writer thread started");
        while let Ok(job) = receiver.recv() {
            match job {
                Job::Write { batch, on_done } => {
                    let result = backend.apply(&batch).map_err(CoreError::from);
                    if let Err(err) = &result {
                        tracing::error!(error = %err, mutations = batch.len(), "write batch failed");
                    }
                    on_done(result);
                }
                Job::Clear { on_done } => {
                    let result = backend.clear().map_err(CoreError::from);
                    if let Err(err) = &result {
                        tracing::error!(error = %err, "clear failed");
                    }
                    on_done(result);
                }
            }
        }
        tracing::debug!("writer thread stopped");
    });
    (sender, handle)
}
