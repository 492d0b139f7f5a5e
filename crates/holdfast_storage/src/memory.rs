//! In-memory table backend for testing.

use crate::backend::TableBackend;
use crate::batch::{ActionRow, EntityRowMeta, HolderRow, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Tables {
    /// (seq, idkey, kind, blob), kept in insertion order.
    entities: Vec<(i64, Vec<u8>, String, Vec<u8>)>,
    next_seq: i64,
    holders: Vec<HolderRow>,
    actions: Vec<ActionRow>,
    invalid: Vec<Vec<u8>>,
}

/// An in-memory [`TableBackend`].
///
/// Suitable for unit tests and ephemeral stores. The single-cell read
/// limit is configurable so chunked restore paths can be exercised with
/// tiny blobs, and reads can be poisoned to simulate an unreadable
/// backing store.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    max_cell_read: usize,
    fail_reads: AtomicBool,
}

impl MemoryBackend {
    /// Creates an empty backend with the given single-cell read limit.
    #[must_use]
    pub fn new(max_cell_read: usize) -> Self {
        assert!(max_cell_read > 0, "cell read limit must be positive");
        Self {
            tables: RwLock::new(Tables::default()),
            max_cell_read,
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent read fail, simulating an unreadable store.
    pub fn poison_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    fn check_readable(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Corrupted(
                "reads poisoned by test".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(crate::sqlite::DEFAULT_MAX_CELL_READ)
    }
}

impl TableBackend for MemoryBackend {
    fn max_cell_read(&self) -> usize {
        self.max_cell_read
    }

    fn entity_rows(&self) -> StorageResult<Vec<EntityRowMeta>> {
        self.check_readable()?;
        let tables = self.tables.read();
        Ok(tables
            .entities
            .iter()
            .map(|(seq, idkey, kind, blob)| EntityRowMeta {
                seq: *seq,
                idkey: idkey.clone(),
                kind: kind.clone(),
                blob_len: blob.len(),
            })
            .collect())
    }

    fn read_blob(&self, seq: i64, offset: usize, len: usize) -> StorageResult<Vec<u8>> {
        self.check_readable()?;
        let tables = self.tables.read();
        let blob = tables
            .entities
            .iter()
            .find(|(s, _, _, _)| *s == seq)
            .map(|(_, _, _, blob)| blob)
            .ok_or_else(|| StorageError::RowNotFound(format!("entity seq {seq}")))?;

        let size = blob.len();
        if offset > size || offset + len > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(blob[offset..offset + len].to_vec())
    }

    fn holder_rows(&self) -> StorageResult<Vec<HolderRow>> {
        self.check_readable()?;
        Ok(self.tables.read().holders.clone())
    }

    fn action_rows(&self) -> StorageResult<Vec<ActionRow>> {
        self.check_readable()?;
        Ok(self.tables.read().actions.clone())
    }

    fn invalid_rows(&self) -> StorageResult<Vec<Vec<u8>>> {
        self.check_readable()?;
        Ok(self.tables.read().invalid.clone())
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        let mut tables = self.tables.write();

        for entity in &batch.upsert_entities {
            if let Some(row) = tables
                .entities
                .iter_mut()
                .find(|(_, idkey, _, _)| idkey == &entity.idkey)
            {
                row.2 = entity.kind.clone();
                row.3 = entity.blob.clone();
            } else {
                let seq = tables.next_seq;
                tables.next_seq += 1;
                tables.entities.push((
                    seq,
                    entity.idkey.clone(),
                    entity.kind.clone(),
                    entity.blob.clone(),
                ));
            }
        }
        for idkey in &batch.remove_entities {
            tables.entities.retain(|(_, k, _, _)| k != idkey);
        }
        for holder in &batch.add_holders {
            let exists = tables
                .holders
                .iter()
                .any(|h| h.name == holder.name && h.ref_idkey == holder.ref_idkey);
            if !exists {
                tables.holders.push(holder.clone());
            }
        }
        for holder in &batch.remove_holders {
            tables
                .holders
                .retain(|h| !(h.name == holder.name && h.ref_idkey == holder.ref_idkey));
        }
        for action in &batch.add_actions {
            tables.actions.retain(|a| a.id != action.id);
            tables.actions.push(ActionRow {
                id: action.id,
                payload: action.payload.clone(),
                priority: action.priority,
            });
        }
        for id in &batch.remove_actions {
            tables.actions.retain(|a| a.id != *id);
        }
        for idkey in &batch.add_invalid {
            if !tables.invalid.contains(idkey) {
                tables.invalid.push(idkey.clone());
            }
        }
        for idkey in &batch.remove_invalid {
            tables.invalid.retain(|k| k != idkey);
        }

        Ok(())
    }

    fn rekey(&self, mapping: &[(Vec<u8>, Vec<u8>)]) -> StorageResult<()> {
        let mut tables = self.tables.write();
        for (old, new) in mapping {
            for row in &mut tables.entities {
                if &row.1 == old {
                    row.1 = new.clone();
                }
            }
            for key in &mut tables.invalid {
                if key == old {
                    *key = new.clone();
                }
            }
            for holder in &mut tables.holders {
                if &holder.ref_idkey == old {
                    holder.ref_idkey = new.clone();
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut tables = self.tables.write();
        tables.entities.clear();
        tables.holders.clear();
        tables.actions.clear();
        tables.invalid.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::EntityUpsert;

    fn upsert(idkey: &[u8], blob: &[u8]) -> EntityUpsert {
        EntityUpsert {
            idkey: idkey.to_vec(),
            kind: "item".to_string(),
            blob: blob.to_vec(),
        }
    }

    #[test]
    fn upsert_preserves_insertion_order() {
        let backend = MemoryBackend::new(64);

        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"a", b"1"));
        batch.upsert_entities.push(upsert(b"b", b"2"));
        backend.apply(&batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"a", b"replaced"));
        backend.apply(&batch).unwrap();

        let rows = backend.entity_rows().unwrap();
        assert_eq!(rows[0].idkey, b"a");
        assert_eq!(rows[0].blob_len, 8);
        assert_eq!(rows[1].idkey, b"b");
    }

    #[test]
    fn read_blob_bounds() {
        let backend = MemoryBackend::new(4);
        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"a", b"abcdef"));
        backend.apply(&batch).unwrap();

        let seq = backend.entity_rows().unwrap()[0].seq;
        assert_eq!(backend.read_blob(seq, 2, 3).unwrap(), b"cde");
        assert!(backend.read_blob(seq, 4, 4).is_err());
    }

    #[test]
    fn poisoned_reads_fail() {
        let backend = MemoryBackend::new(64);
        backend.poison_reads();
        assert!(matches!(
            backend.entity_rows(),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn rekey_updates_everything() {
        let backend = MemoryBackend::new(64);
        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"old", b"x"));
        batch.add_invalid.push(b"old".to_vec());
        batch.add_holders.push(HolderRow {
            name: "h".to_string(),
            hold_kind: 0,
            ref_kind: "item".to_string(),
            ref_idkey: b"old".to_vec(),
        });
        backend.apply(&batch).unwrap();

        backend
            .rekey(&[(b"old".to_vec(), b"new".to_vec())])
            .unwrap();
        assert_eq!(backend.entity_rows().unwrap()[0].idkey, b"new");
        assert_eq!(backend.invalid_rows().unwrap()[0], b"new".to_vec());
        assert_eq!(backend.holder_rows().unwrap()[0].ref_idkey, b"new");
    }
}
