//! Row types and the transactional write batch.

/// Metadata for one stored entity row, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRowMeta {
    /// Insertion sequence (monotonic, assigned by the backend).
    pub seq: i64,
    /// The entity's identity key (raw bytes).
    pub idkey: Vec<u8>,
    /// The entity's kind name.
    pub kind: String,
    /// Total size of the stored blob in bytes.
    pub blob_len: usize,
}

/// One row of the holder index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderRow {
    /// Holder name (identity of the holder).
    pub name: String,
    /// Hold kind discriminant (0 = persistent, 1 = session).
    pub hold_kind: u8,
    /// Kind name of the referenced entity.
    pub ref_kind: String,
    /// Identity key of the referenced entity.
    pub ref_idkey: Vec<u8>,
}

/// One pending-action row.
///
/// Action ids are assigned by the caller (monotonic per store) so the
/// in-memory outbox and the backing rows always agree on which row an
/// acknowledgement removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRow {
    /// Caller-assigned row id, used for acknowledgement.
    pub id: i64,
    /// Opaque serialized command payload.
    pub payload: Vec<u8>,
    /// Remote priority discriminant (0 = immediate, 1 = batched).
    pub priority: u8,
}

/// A new entity row to upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUpsert {
    /// The entity's identity key.
    pub idkey: Vec<u8>,
    /// The entity's kind name.
    pub kind: String,
    /// The encoded entity blob.
    pub blob: Vec<u8>,
}

/// A new pending action to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInsert {
    /// Caller-assigned row id.
    pub id: i64,
    /// Opaque serialized command payload.
    pub payload: Vec<u8>,
    /// Remote priority discriminant.
    pub priority: u8,
}

/// All mutations for one `store()` call.
///
/// A batch is applied inside a single backing-store transaction: either
/// every mutation commits or none do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Entities to insert or replace, keyed by idkey.
    pub upsert_entities: Vec<EntityUpsert>,
    /// Idkeys of entities to delete.
    pub remove_entities: Vec<Vec<u8>>,
    /// Holder index rows to add.
    pub add_holders: Vec<HolderRow>,
    /// Holder index rows to remove (matched on name + ref_idkey).
    pub remove_holders: Vec<HolderRow>,
    /// Pending actions to enqueue.
    pub add_actions: Vec<ActionInsert>,
    /// Row ids of acknowledged actions to remove.
    pub remove_actions: Vec<i64>,
    /// Idkeys to mark invalid.
    pub add_invalid: Vec<Vec<u8>>,
    /// Idkeys to unmark.
    pub remove_invalid: Vec<Vec<u8>>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the batch carries no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upsert_entities.is_empty()
            && self.remove_entities.is_empty()
            && self.add_holders.is_empty()
            && self.remove_holders.is_empty()
            && self.add_actions.is_empty()
            && self.remove_actions.is_empty()
            && self.add_invalid.is_empty()
            && self.remove_invalid.is_empty()
    }

    /// Total number of mutations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.upsert_entities.len()
            + self.remove_entities.len()
            + self.add_holders.len()
            + self.remove_holders.len()
            + self.add_actions.len()
            + self.remove_actions.len()
            + self.add_invalid.len()
            + self.remove_invalid.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batch() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn batch_len_counts_all_mutations() {
        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(EntityUpsert {
            idkey: vec![1],
            kind: "item".to_string(),
            blob: vec![0],
        });
        batch.remove_invalid.push(vec![2]);
        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 2);
    }
}
