//! # Holdfast Storage
//!
//! Backing-store boundary for Holdfast.
//!
//! A [`TableBackend`] owns four logical tables (entities, pending
//! actions, invalidation markers, and the holder index) and exposes a
//! narrow typed contract over them. No SQL surface leaks upward.
//!
//! Implementations:
//! - [`SqliteBackend`]: durable store on SQLite
//! - [`MemoryBackend`]: for tests and ephemeral stores

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod batch;
mod error;
mod memory;
mod sqlite;

pub use backend::TableBackend;
pub use batch::{ActionInsert, ActionRow, EntityRowMeta, EntityUpsert, HolderRow, WriteBatch};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use sqlite::{SqliteBackend, DEFAULT_MAX_CELL_READ};
