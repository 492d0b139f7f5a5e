//! SQLite table backend.

use crate::backend::TableBackend;
use crate::batch::{ActionRow, EntityRowMeta, HolderRow, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Default single-cell read limit: 1 MiB.
///
/// Blobs longer than this are fetched in windows during restore, the
/// same way cursor-window-limited hosts page large cells.
pub const DEFAULT_MAX_CELL_READ: usize = 1024 * 1024;

/// A [`TableBackend`] backed by a SQLite database.
///
/// One connection, guarded by a mutex; all batch mutations run inside
/// SQLite transactions, so a failed batch leaves the store untouched.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    max_cell_read: usize,
}

impl SqliteBackend {
    /// Opens (or creates) a backing store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table
    /// schema cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let backend = Self {
            conn: Mutex::new(conn),
            max_cell_read: DEFAULT_MAX_CELL_READ,
        };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Overrides the single-cell read limit.
    ///
    /// Tests use a tiny limit to exercise chunked blob reads without
    /// megabyte fixtures.
    #[must_use]
    pub fn with_max_cell_read(mut self, max_cell_read: usize) -> Self {
        assert!(max_cell_read > 0, "cell read limit must be positive");
        self.max_cell_read = max_cell_read;
        self
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entities (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                idkey BLOB NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                blob BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY,
                payload BLOB NOT NULL,
                priority INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invalid (
                idkey BLOB PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS holders (
                name TEXT NOT NULL,
                hold_kind INTEGER NOT NULL,
                ref_kind TEXT NOT NULL,
                ref_idkey BLOB NOT NULL,
                UNIQUE(name, ref_idkey)
            );
            ",
        )?;
        Ok(())
    }
}

impl TableBackend for SqliteBackend {
    fn max_cell_read(&self) -> usize {
        self.max_cell_read
    }

    fn entity_rows(&self) -> StorageResult<Vec<EntityRowMeta>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT seq, idkey, kind, length(blob) FROM entities ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok(EntityRowMeta {
                seq: row.get(0)?,
                idkey: row.get(1)?,
                kind: row.get(2)?,
                blob_len: row.get::<_, i64>(3)? as usize,
            })
        })?;
        let mut metas = Vec::new();
        for row in rows {
            metas.push(row?);
        }
        Ok(metas)
    }

    fn read_blob(&self, seq: i64, offset: usize, len: usize) -> StorageResult<Vec<u8>> {
        let conn = self.conn.lock();
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                // substr() on a blob is byte-addressed and 1-based.
                "SELECT length(blob), substr(blob, ?2, ?3) FROM entities WHERE seq = ?1",
                params![seq, (offset + 1) as i64, len as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (size, window) =
            row.ok_or_else(|| StorageError::RowNotFound(format!("entity seq {seq}")))?;
        let size = size as usize;
        if offset > size || offset + len > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(window)
    }

    fn holder_rows(&self) -> StorageResult<Vec<HolderRow>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name, hold_kind, ref_kind, ref_idkey FROM holders")?;
        let rows = stmt.query_map([], |row| {
            Ok(HolderRow {
                name: row.get(0)?,
                hold_kind: row.get::<_, i64>(1)? as u8,
                ref_kind: row.get(2)?,
                ref_idkey: row.get(3)?,
            })
        })?;
        let mut holders = Vec::new();
        for row in rows {
            holders.push(row?);
        }
        Ok(holders)
    }

    fn action_rows(&self) -> StorageResult<Vec<ActionRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, payload, priority FROM actions ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(ActionRow {
                id: row.get(0)?,
                payload: row.get(1)?,
                priority: row.get::<_, i64>(2)? as u8,
            })
        })?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    fn invalid_rows(&self) -> StorageResult<Vec<Vec<u8>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT idkey FROM invalid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn apply(&self, batch: &WriteBatch) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for entity in &batch.upsert_entities {
            tx.execute(
                "INSERT INTO entities (idkey, kind, blob) VALUES (?1, ?2, ?3)
                 ON CONFLICT(idkey) DO UPDATE SET kind = excluded.kind, blob = excluded.blob",
                params![entity.idkey, entity.kind, entity.blob],
            )?;
        }
        for idkey in &batch.remove_entities {
            tx.execute("DELETE FROM entities WHERE idkey = ?1", params![idkey])?;
        }
        for holder in &batch.add_holders {
            tx.execute(
                "INSERT INTO holders (name, hold_kind, ref_kind, ref_idkey)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name, ref_idkey) DO UPDATE SET
                     hold_kind = excluded.hold_kind, ref_kind = excluded.ref_kind",
                params![
                    holder.name,
                    i64::from(holder.hold_kind),
                    holder.ref_kind,
                    holder.ref_idkey
                ],
            )?;
        }
        for holder in &batch.remove_holders {
            tx.execute(
                "DELETE FROM holders WHERE name = ?1 AND ref_idkey = ?2",
                params![holder.name, holder.ref_idkey],
            )?;
        }
        for action in &batch.add_actions {
            tx.execute(
                "INSERT OR REPLACE INTO actions (id, payload, priority) VALUES (?1, ?2, ?3)",
                params![action.id, action.payload, i64::from(action.priority)],
            )?;
        }
        for id in &batch.remove_actions {
            tx.execute("DELETE FROM actions WHERE id = ?1", params![id])?;
        }
        for idkey in &batch.add_invalid {
            tx.execute(
                "INSERT OR IGNORE INTO invalid (idkey) VALUES (?1)",
                params![idkey],
            )?;
        }
        for idkey in &batch.remove_invalid {
            tx.execute("DELETE FROM invalid WHERE idkey = ?1", params![idkey])?;
        }

        tx.commit()?;
        Ok(())
    }

    fn rekey(&self, mapping: &[(Vec<u8>, Vec<u8>)]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for (old, new) in mapping {
            tx.execute(
                "UPDATE entities SET idkey = ?2 WHERE idkey = ?1",
                params![old, new],
            )?;
            tx.execute(
                "UPDATE OR IGNORE invalid SET idkey = ?2 WHERE idkey = ?1",
                params![old, new],
            )?;
            tx.execute(
                "UPDATE holders SET ref_idkey = ?2 WHERE ref_idkey = ?1",
                params![old, new],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entities", [])?;
        tx.execute("DELETE FROM actions", [])?;
        tx.execute("DELETE FROM invalid", [])?;
        tx.execute("DELETE FROM holders", [])?;
        tx.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("max_cell_read", &self.max_cell_read)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{ActionInsert, EntityUpsert};
    use tempfile::tempdir;

    fn upsert(idkey: &[u8], kind: &str, blob: &[u8]) -> EntityUpsert {
        EntityUpsert {
            idkey: idkey.to_vec(),
            kind: kind.to_string(),
            blob: blob.to_vec(),
        }
    }

    #[test]
    fn apply_and_read_back() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"k1", "item", b"blob-1"));
        batch.upsert_entities.push(upsert(b"k2", "author", b"blob-2"));
        backend.apply(&batch).unwrap();

        let rows = backend.entity_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].idkey, b"k1");
        assert_eq!(rows[0].kind, "item");
        assert_eq!(rows[0].blob_len, 6);
        assert!(rows[0].seq < rows[1].seq);
    }

    #[test]
    fn rows_stay_in_insertion_order_after_upsert() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"k1", "item", b"old"));
        batch.upsert_entities.push(upsert(b"k2", "item", b"x"));
        backend.apply(&batch).unwrap();

        // Replacing k1 must not move it behind k2.
        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"k1", "item", b"newer"));
        backend.apply(&batch).unwrap();

        let rows = backend.entity_rows().unwrap();
        assert_eq!(rows[0].idkey, b"k1");
        assert_eq!(rows[0].blob_len, 5);
        assert_eq!(rows[1].idkey, b"k2");
    }

    #[test]
    fn read_blob_windows() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch
            .upsert_entities
            .push(upsert(b"k1", "item", b"hello world"));
        backend.apply(&batch).unwrap();

        let seq = backend.entity_rows().unwrap()[0].seq;
        assert_eq!(backend.read_blob(seq, 0, 5).unwrap(), b"hello");
        assert_eq!(backend.read_blob(seq, 6, 5).unwrap(), b"world");
        assert!(matches!(
            backend.read_blob(seq, 6, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_blob(9999, 0, 1),
            Err(StorageError::RowNotFound(_))
        ));
    }

    #[test]
    fn holders_actions_invalid_roundtrip() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        let mut batch = WriteBatch::new();
        batch.add_holders.push(HolderRow {
            name: "screen:library".to_string(),
            hold_kind: 1,
            ref_kind: "item".to_string(),
            ref_idkey: b"k1".to_vec(),
        });
        batch.add_actions.push(ActionInsert {
            id: 1,
            payload: b"sync-me".to_vec(),
            priority: 0,
        });
        batch.add_invalid.push(b"k1".to_vec());
        backend.apply(&batch).unwrap();

        let holders = backend.holder_rows().unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].name, "screen:library");
        assert_eq!(holders[0].hold_kind, 1);

        let actions = backend.action_rows().unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].payload, b"sync-me");

        assert_eq!(backend.invalid_rows().unwrap(), vec![b"k1".to_vec()]);

        let mut batch = WriteBatch::new();
        batch.remove_holders.push(holders[0].clone());
        batch.remove_actions.push(actions[0].id);
        batch.remove_invalid.push(b"k1".to_vec());
        backend.apply(&batch).unwrap();

        assert!(backend.holder_rows().unwrap().is_empty());
        assert!(backend.action_rows().unwrap().is_empty());
        assert!(backend.invalid_rows().unwrap().is_empty());
    }

    #[test]
    fn rekey_rewrites_all_tables() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"old", "item", b"blob"));
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

    #[test]
    fn clear_empties_every_table() {
        let backend = SqliteBackend::open_in_memory().unwrap();

        let mut batch = WriteBatch::new();
        batch.upsert_entities.push(upsert(b"k", "item", b"b"));
        batch.add_invalid.push(b"k".to_vec());
        batch.add_actions.push(ActionInsert {
            id: 1,
            payload: vec![1],
            priority: 1,
        });
        backend.apply(&batch).unwrap();

        backend.clear().unwrap();
        assert!(backend.entity_rows().unwrap().is_empty());
        assert!(backend.action_rows().unwrap().is_empty());
        assert!(backend.invalid_rows().unwrap().is_empty());
        assert!(backend.holder_rows().unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            let mut batch = WriteBatch::new();
            batch.upsert_entities.push(upsert(b"k", "item", b"durable"));
            backend.apply(&batch).unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let rows = backend.entity_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(backend.read_blob(rows[0].seq, 0, 7).unwrap(), b"durable");
    }
}
