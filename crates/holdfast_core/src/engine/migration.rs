//! One-time identity-key migration.
//!
//! Rewrites stored idkeys after a change to the key derivation (or to
//! a kind's identity projection). Two passes: first stream and decode
//! every entity row to build the old-to-new key mapping, then hand the
//! mapping to the backend, which rewrites the entities, invalidation
//! markers, and holder index in a single transaction.

use crate::engine::read_full_blob;
use crate::engine::blob;
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use holdfast_storage::TableBackend;

/// Recomputes every stored idkey and rewrites the rows whose key
/// changed. Returns the number of rewritten keys.
///
/// Rows that no longer decode, or whose kind is no longer
/// identifiable, keep their old key and are skipped with a warning.
///
/// # Errors
///
/// Any backend failure is fatal and wrapped as
/// [`CoreError::MigrationFailed`]; a partial key rewrite would corrupt
/// cross-references, so the backend applies the mapping in one
/// transaction or not at all.
pub fn migrate_idkeys(schema: &Schema, backend: &dyn TableBackend) -> CoreResult<usize> {
    let metas = backend
        .entity_rows()
        .map_err(|err| CoreError::migration_failed(format!("cannot list entity rows: {err}")))?;

    let mut mapping = Vec::new();
    for meta in metas {
        let blob = read_full_blob(backend, meta.seq, meta.blob_len)
            .map_err(|err| CoreError::migration_failed(format!("row {}: {err}", meta.seq)))?;
        let entity = match blob::decode_entity(schema, &blob) {
            Ok(entity) => entity,
            Err(err) => {
                tracing::warn!(seq = meta.seq, kind = %meta.kind, error = %err,
                    "leaving undecodable row unmigrated");
                continue;
            }
        };
        let Some(identity) = entity.identity(schema) else {
            tracing::warn!(seq = meta.seq, kind = %meta.kind,
                "leaving unidentifiable row unmigrated");
            continue;
        };
        let new_key = identity.idkey(schema);
        if new_key.as_bytes().as_slice() != meta.idkey.as_slice() {
            mapping.push((meta.idkey, new_key.as_bytes().to_vec()));
        }
    }

    if mapping.is_empty() {
        tracing::debug!("idkey migration found nothing to rewrite");
        return Ok(0);
    }

    let rewritten = mapping.len();
    backend
        .rekey(&mapping)
        .map_err(|err| CoreError::migration_failed(format!("rekey transaction: {err}")))?;
    tracing::debug!(rewritten, "idkey migration complete");
    Ok(rewritten)
}
