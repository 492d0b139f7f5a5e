//! Table backend trait definition.

use crate::batch::{ActionRow, EntityRowMeta, HolderRow, WriteBatch};
use crate::error::StorageResult;

/// The backing-store boundary for Holdfast.
///
/// A backend owns four logical tables (entities, pending actions,
/// invalidation markers, and the holder index) and exposes only typed
/// operations over them. No query surface leaks upward; all format
/// interpretation (blob encoding, identity keys) belongs to the engine.
///
/// # Invariants
///
/// - `entity_rows` returns rows in insertion-sequence order
/// - `read_blob` returns exactly the requested window of the stored blob
/// - `apply` is transactional: the whole batch commits or none of it does
/// - Backends must be `Send + Sync` for use by the restore and writer
///   workers
pub trait TableBackend: Send + Sync {
    /// Largest number of blob bytes a single cell read may return.
    ///
    /// Blobs longer than this must be fetched through repeated
    /// [`TableBackend::read_blob`] calls. The engine treats this as the
    /// chunking threshold during restore.
    fn max_cell_read(&self) -> usize;

    /// Returns metadata for every entity row, ordered by insertion
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn entity_rows(&self) -> StorageResult<Vec<EntityRowMeta>>;

    /// Reads `len` bytes of the blob stored at `seq`, starting at
    /// `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist or the window extends
    /// past the end of the blob.
    fn read_blob(&self, seq: i64, offset: usize, len: usize) -> StorageResult<Vec<u8>>;

    /// Returns every holder index row.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn holder_rows(&self) -> StorageResult<Vec<HolderRow>>;

    /// Returns every pending-action row, ordered by insertion.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn action_rows(&self) -> StorageResult<Vec<ActionRow>>;

    /// Returns every invalidation-marker idkey.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn invalid_rows(&self) -> StorageResult<Vec<Vec<u8>>>;

    /// Applies all mutations in `batch` inside a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; in that case no
    /// mutation from the batch is persisted.
    fn apply(&self, batch: &WriteBatch) -> StorageResult<()>;

    /// Rewrites identity keys across the entities, invalidation-marker,
    /// and holder-index tables in a single transaction.
    ///
    /// Keys absent from `mapping` are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; no partial rewrite is
    /// persisted.
    fn rekey(&self, mapping: &[(Vec<u8>, Vec<u8>)]) -> StorageResult<()>;

    /// Deletes every row from all four tables in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    fn clear(&self) -> StorageResult<()>;
}
