//! # Holdfast Core
//!
//! An embedded, offline-first entity graph store.
//!
//! This crate provides:
//! - the entity value model: immutable, identity-keyed, partially
//!   declared records with a field-wise merge law
//! - a closed schema with reaction and derivation dispatch
//! - holder-based retention with eviction of unheld entities
//! - diff brackets for observing the net effect of a batch
//! - [`Space`], the in-memory working set over a durable store
//! - the storage engine: parallel restore, ordered background writes,
//!   and idkey migration

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod diff;
pub mod engine;
pub mod entity;
pub mod holder;
pub mod schema;
pub mod space;

mod error;
mod types;

pub use diff::{ChangePair, Diff};
pub use engine::{migration::migrate_idkeys, EngineState, RestoreSink, StorageEngine};
pub use entity::{flatten, references, Entity, Equality, FieldValue, Identity};
pub use error::{CoreError, CoreResult};
pub use holder::{Holder, HolderLedger};
pub use schema::{
    AffectedFn, DeriveFn, DeriveRule, FieldDef, FieldType, KindDef, KindSpec, ReactionEffect,
    ReactionRule, Schema, SchemaBuilder,
};
pub use space::{Space, SpaceView};
pub use types::{FieldId, HoldKind, IdKey, KindId, PendingAction, RemotePriority};
