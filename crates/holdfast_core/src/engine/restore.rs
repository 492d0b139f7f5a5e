//! Parallel restore of a store from its backing tables.
//!
//! Restore is a blocking call that runs on exactly two workers: the
//! calling thread plus one spawned thread. Both share a single mutex
//! over an input queue of raw work items and an output queue of decoded
//! results. The spawned worker decodes; the caller drains the output to
//! dispatch callbacks and steals decode work whenever the output runs
//! dry, so neither side idles while work remains.
//!
//! Decode failures on individual rows are logged and skipped; a row
//! with a bad blob must not take the rest of the store down with it.
//! Backend read failures are fatal and abort both workers.

use crate::engine::read_full_blob;
use crate::engine::blob;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;
use crate::schema::Schema;
use crate::types::{HoldKind, IdKey, PendingAction, RemotePriority};
use holdfast_storage::{EntityRowMeta, TableBackend};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Callbacks restore dispatches decoded state into, on the calling
/// thread only.
pub struct RestoreSink<'a> {
    /// Receives each successfully decoded entity, in no particular
    /// order.
    pub on_entity: &'a mut dyn FnMut(Entity),
    /// Receives each holder index entry.
    pub on_holder: &'a mut dyn FnMut(Holder, IdKey),
    /// Receives each pending action.
    pub on_action: &'a mut dyn FnMut(PendingAction),
    /// Receives each invalidation marker.
    pub on_invalid: &'a mut dyn FnMut(IdKey),
}

enum Work {
    Entity(EntityRowMeta),
    Holders,
    Actions,
    Invalids,
}

enum Restored {
    Entity(Entity),
    Holder(Holder, IdKey),
    Action(PendingAction),
    Invalid(IdKey),
}

struct Queues {
    input: VecDeque<Work>,
    output: VecDeque<Restored>,
}

struct Shared<'a> {
    queues: Mutex<Queues>,
    /// Work items pulled from input whose results are not yet in the
    /// output queue. Decremented under the queue lock, so once it reads
    /// zero with an empty input, a final locked look at the output is
    /// authoritative.
    outstanding: AtomicUsize,
    failed: AtomicBool,
    error: Mutex<Option<CoreError>>,
    backend: &'a dyn TableBackend,
    schema: &'a Schema,
}

/// Restores all four tables through `sink`.
///
/// # Errors
///
/// Returns [`CoreError::RestoreFailed`] if the backend cannot be read.
pub fn run(
    backend: &dyn TableBackend,
    schema: &Schema,
    sink: &mut RestoreSink<'_>,
) -> CoreResult<()> {
    let metas = backend
        .entity_rows()
        .map_err(|err| CoreError::restore_failed(format!("cannot list entity rows: {err}")))?;
    let entity_count = metas.len();

    let mut input: VecDeque<Work> = metas.into_iter().map(Work::Entity).collect();
    input.push_back(Work::Holders);
    input.push_back(Work::Actions);
    input.push_back(Work::Invalids);

    let shared = Shared {
        outstanding: AtomicUsize::new(input.len()),
        queues: Mutex::new(Queues {
            input,
            output: VecDeque::new(),
        }),
        failed: AtomicBool::new(false),
        error: Mutex::new(None),
        backend,
        schema,
    };

    tracing::debug!(entities = entity_count, "restore starting");

    std::thread::scope(|scope| {
        scope.spawn(|| decode_loop(&shared));
        drain_loop(&shared, sink);
    });

    if let Some(err) = shared.error.lock().take() {
        tracing::error!(error = %err, "restore aborted");
        return Err(CoreError::restore_failed(err.to_string()));
    }
    tracing::debug!("restore complete");
    Ok(())
}

/// The spawned worker: decode until the input runs out or a fatal
/// error lands.
fn decode_loop(shared: &Shared<'_>) {
    loop {
        if shared.failed.load(Ordering::Acquire) {
            return;
        }
        let work = shared.queues.lock().input.pop_front();
        match work {
            Some(work) => process(shared, work),
            None => return,
        }
    }
}

/// The calling thread: dispatch decoded results, stealing decode work
/// whenever the output queue is empty.
fn drain_loop(shared: &Shared<'_>, sink: &mut RestoreSink<'_>) {
    loop {
        let item = shared.queues.lock().output.pop_front();
        if let Some(item) = item {
            dispatch(sink, item);
            continue;
        }
        if shared.failed.load(Ordering::Acquire) {
            return;
        }
        let work = shared.queues.lock().input.pop_front();
        match work {
            Some(work) => process(shared, work),
            None => {
                if shared.outstanding.load(Ordering::Acquire) == 0 {
                    // The other worker may have pushed output between
                    // our pop and the counter read; recheck under the
                    // lock before declaring completion.
                    if shared.queues.lock().output.is_empty() {
                        return;
                    }
                } else {
                    std::thread::yield_now();
                }
            }
        }
    }
}

fn dispatch(sink: &mut RestoreSink<'_>, item: Restored) {
    match item {
        Restored::Entity(entity) => (sink.on_entity)(entity),
        Restored::Holder(holder, key) => (sink.on_holder)(holder, key),
        Restored::Action(action) => (sink.on_action)(action),
        Restored::Invalid(key) => (sink.on_invalid)(key),
    }
}

/// Processes one work item, pushing results and retiring the item
/// under a single lock acquisition.
fn process(shared: &Shared<'_>, work: Work) {
    let results = match produce(shared, work) {
        Ok(results) => results,
        Err(err) => {
            *shared.error.lock() = Some(err);
            shared.failed.store(true, Ordering::Release);
            Vec::new()
        }
    };
    let mut queues = shared.queues.lock();
    queues.output.extend(results);
    shared.outstanding.fetch_sub(1, Ordering::AcqRel);
}

fn produce(shared: &Shared<'_>, work: Work) -> CoreResult<Vec<Restored>> {
    match work {
        Work::Entity(meta) => {
            let blob = read_full_blob(shared.backend, meta.seq, meta.blob_len)?;
            match blob::decode_entity(shared.schema, &blob) {
                Ok(entity) => Ok(vec![Restored::Entity(entity)]),
                Err(err) => {
                    tracing::warn!(
                        seq = meta.seq,
                        kind = %meta.kind,
                        error = %err,
                        "skipping undecodable entity row"
                    );
                    Ok(Vec::new())
                }
            }
        }
        Work::Holders => {
            let rows = shared.backend.holder_rows()?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let kind = HoldKind::from_discriminant(row.hold_kind);
                let key = IdKey::from_slice(&row.ref_idkey);
                match (kind, key) {
                    (Some(kind), Some(key)) => out.push(Restored::Holder(
                        Holder {
                            name: row.name,
                            kind,
                        },
                        key,
                    )),
                    _ => {
                        tracing::warn!(name = %row.name, "skipping malformed holder row");
                    }
                }
            }
            Ok(out)
        }
        Work::Actions => {
            let rows = shared.backend.action_rows()?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                match RemotePriority::from_discriminant(row.priority) {
                    Some(priority) => out.push(Restored::Action(PendingAction {
                        id: row.id,
                        payload: row.payload,
                        priority,
                    })),
                    None => {
                        tracing::warn!(id = row.id, "skipping action with unknown priority");
                    }
                }
            }
            Ok(out)
        }
        Work::Invalids => {
            let rows = shared.backend.invalid_rows()?;
            let mut out = Vec::with_capacity(rows.len());
            for raw in rows {
                match IdKey::from_slice(&raw) {
                    Some(key) => out.push(Restored::Invalid(key)),
                    None => tracing::warn!("skipping malformed invalidation marker"),
                }
            }
            Ok(out)
        }
    }
}
