//! The graph store.
//!
//! A [`Space`] is the in-memory working set of the store: retained
//! entities indexed by idkey, the holder ledger, invalidation markers,
//! and the pending-action outbox, all backed by a
//! [`StorageEngine`](crate::engine::StorageEngine).
//!
//! One coarse mutex guards all mutable state. Every public operation
//! locks exactly once, so a batch of imprints together with its diff
//! recording and reactions is atomic to readers, and write batches are
//! submitted under the lock, which makes submission order (and thus
//! commit order) match observation order.

use crate::diff::Diff;
use crate::engine::{blob, RestoreSink, StorageEngine};
use crate::entity::{flatten, Entity, Identity};
use crate::error::{CoreError, CoreResult};
use crate::holder::{Holder, HolderLedger};
use crate::schema::{ReactionEffect, Schema};
use crate::types::{HoldKind, IdKey, KindId, PendingAction, RemotePriority};
use holdfast_storage::{ActionInsert, EntityUpsert, HolderRow, TableBackend, WriteBatch};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Read-only view of retained state, as seen by derivation rules.
pub struct SpaceView<'a> {
    entities: &'a HashMap<IdKey, Entity>,
    schema: &'a Schema,
}

impl SpaceView<'_> {
    /// The schema behind this view.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Looks up a retained entity by identity.
    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<&Entity> {
        self.entities.get(&identity.idkey(self.schema))
    }

    /// Looks up a retained entity by idkey.
    #[must_use]
    pub fn get_by_key(&self, key: IdKey) -> Option<&Entity> {
        self.entities.get(&key)
    }

    /// All retained entities of a kind, in no particular order.
    #[must_use]
    pub fn of_kind(&self, kind: KindId) -> Vec<&Entity> {
        self.entities.values().filter(|e| e.kind() == kind).collect()
    }
}

struct SpaceInner {
    entities: HashMap<IdKey, Entity>,
    ledger: HolderLedger,
    invalid: HashSet<IdKey>,
    actions: Vec<PendingAction>,
    next_action_id: i64,
    diff_depth: usize,
    diff: Diff,
}

/// An entity graph store: an in-memory working set over a durable
/// backing store.
pub struct Space {
    schema: Schema,
    engine: StorageEngine,
    inner: Mutex<SpaceInner>,
}

impl Space {
    /// Opens a space over a backing store, restoring entities, holders,
    /// pending actions, and invalidation markers before returning.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::RestoreFailed`] if the backing store
    /// exists but cannot be read. An empty store is not an error.
    pub fn open(schema: Schema, backend: Arc<dyn TableBackend>) -> CoreResult<Space> {
        let engine = StorageEngine::new(backend);
        let mut entities = HashMap::new();
        let mut ledger = HolderLedger::new();
        let mut invalid = HashSet::new();
        let mut actions: Vec<PendingAction> = Vec::new();
        {
            let mut on_entity = |entity: Entity| {
                if let Some(identity) = entity.identity(&schema) {
                    entities.insert(identity.idkey(&schema), entity);
                }
            };
            let mut on_holder = |holder: Holder, key: IdKey| ledger.hold(&holder, key);
            let mut on_action = |action: PendingAction| actions.push(action);
            let mut on_invalid = |key: IdKey| {
                invalid.insert(key);
            };
            let mut sink = RestoreSink {
                on_entity: &mut on_entity,
                on_holder: &mut on_holder,
                on_action: &mut on_action,
                on_invalid: &mut on_invalid,
            };
            engine.restore(&schema, &mut sink)?;
        }
        let next_action_id = actions.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        Ok(Space {
            schema,
            engine,
            inner: Mutex::new(SpaceInner {
                entities,
                ledger,
                invalid,
                actions,
                next_action_id,
                diff_depth: 0,
                diff: Diff::new(),
            }),
        })
    }

    /// The schema this space dispatches on.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Registers `holder`'s interest in the given identities.
    ///
    /// Retention is by identity, not by presence: a holder may declare
    /// interest before the data arrives, and later imprints of those
    /// identities are then accepted.
    pub fn remember(&self, holder: &Holder, identities: &[Identity]) {
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::new();
        for identity in identities {
            let key = identity.idkey(&self.schema);
            self.hold_locked(&mut inner, holder, identity.kind(), key, &mut batch);
        }
        self.persist(batch);
    }

    /// Retains entity trees under `holder` and inserts their state.
    ///
    /// The trees are flattened; every identifiable entity at any depth
    /// is held and imprinted, so nested references are retained
    /// transitively.
    pub fn remember_entities(&self, holder: &Holder, entities: &[Entity]) {
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::new();
        for entity in flatten(&self.schema, entities) {
            let Some(identity) = entity.identity(&self.schema) else {
                continue;
            };
            let key = identity.idkey(&self.schema);
            self.hold_locked(&mut inner, holder, entity.kind(), key, &mut batch);
            self.apply_entity_locked(&mut inner, entity, true, &mut batch);
        }
        self.persist(batch);
    }

    /// Releases `holder`'s interest in the given identities. Entities
    /// whose last holder is released are evicted from memory and from
    /// the backing store, and their invalidation markers are cleared.
    pub fn forget(&self, holder: &Holder, identities: &[Identity]) {
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::new();
        let mut keys = Vec::with_capacity(identities.len());
        for identity in identities {
            let key = identity.idkey(&self.schema);
            batch.remove_holders.push(HolderRow {
                name: holder.name.clone(),
                hold_kind: holder.kind.discriminant(),
                ref_kind: self.schema.kind(identity.kind()).name.clone(),
                ref_idkey: key.as_bytes().to_vec(),
            });
            keys.push(key);
        }
        let unheld = inner.ledger.release_keys(holder, &keys);
        self.evict_locked(&mut inner, &unheld, &mut batch);
        self.persist(batch);
    }

    /// Releases every session holder at once, evicting whatever they
    /// were the last to retain. Persistent holders are untouched.
    pub fn release_session(&self) {
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::new();
        // Removal matches on holder name + idkey, so the kind tag on
        // the removal row is informational only.
        let rows: Vec<HolderRow> = inner
            .ledger
            .entries()
            .filter(|(holder, _)| holder.kind == HoldKind::Session)
            .map(|(holder, key)| HolderRow {
                name: holder.name.clone(),
                hold_kind: holder.kind.discriminant(),
                ref_kind: inner
                    .entities
                    .get(&key)
                    .map(|e| self.schema.kind(e.kind()).name.clone())
                    .unwrap_or_default(),
                ref_idkey: key.as_bytes().to_vec(),
            })
            .collect();
        batch.remove_holders = rows;
        let unheld = inner.ledger.release_session();
        self.evict_locked(&mut inner, &unheld, &mut batch);
        self.persist(batch);
    }

    /// Merges an entity tree into the store.
    ///
    /// The tree is flattened; each identifiable entity that is
    /// currently retained is merged by the merge law, recorded in the
    /// active diff, persisted, and has its reaction rules run.
    /// Unretained entities are dropped: nobody declared interest, so
    /// there is nothing to keep them alive.
    pub fn imprint(&self, entity: Entity) {
        let mut inner = self.inner.lock();
        let mut batch = WriteBatch::new();
        for flat in flatten(&self.schema, &[entity]) {
            self.apply_entity_locked(&mut inner, flat, true, &mut batch);
        }
        self.persist(batch);
    }

    /// Looks up a retained entity by identity.
    #[must_use]
    pub fn get(&self, identity: &Identity) -> Option<Entity> {
        self.get_by_key(identity.idkey(&self.schema))
    }

    /// Looks up a retained entity by idkey.
    #[must_use]
    pub fn get_by_key(&self, key: IdKey) -> Option<Entity> {
        self.inner.lock().entities.get(&key).cloned()
    }

    /// True if the identity is currently in memory.
    #[must_use]
    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner
            .lock()
            .entities
            .contains_key(&identity.idkey(&self.schema))
    }

    /// Returns the entity for `identity`, computing it on a miss if its
    /// kind has a derivation rule.
    ///
    /// A computed value is cached and participates in diffs and
    /// reactions like an imprint, except that it need not be held.
    #[must_use]
    pub fn derive(&self, identity: &Identity) -> Option<Entity> {
        let mut inner = self.inner.lock();
        let key = identity.idkey(&self.schema);
        if let Some(existing) = inner.entities.get(&key) {
            return Some(existing.clone());
        }
        let mut batch = WriteBatch::new();
        self.rederive_locked(&mut inner, identity, &mut batch);
        let result = inner.entities.get(&key).cloned();
        self.persist(batch);
        result
    }

    /// Opens a diff bracket. Brackets nest; only the outermost
    /// `end_diff` observes anything.
    pub fn start_diff(&self) {
        self.inner.lock().diff_depth += 1;
    }

    /// Closes a diff bracket.
    ///
    /// The outermost close returns the net diff of everything recorded
    /// since the matching `start_diff`; inner closes return an empty
    /// diff.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] if no bracket is
    /// open.
    pub fn end_diff(&self) -> CoreResult<Diff> {
        let mut inner = self.inner.lock();
        if inner.diff_depth == 0 {
            return Err(CoreError::invalid_operation("end_diff without start_diff"));
        }
        inner.diff_depth -= 1;
        if inner.diff_depth == 0 {
            Ok(std::mem::take(&mut inner.diff))
        } else {
            Ok(Diff::new())
        }
    }

    /// Marks an identity stale.
    pub fn add_invalid(&self, identity: &Identity) {
        let mut inner = self.inner.lock();
        let key = identity.idkey(&self.schema);
        let mut batch = WriteBatch::new();
        if inner.invalid.insert(key) {
            batch.add_invalid.push(key.as_bytes().to_vec());
        }
        if inner.diff_depth > 0 {
            inner.diff.record_invalidated(key);
        }
        self.persist(batch);
    }

    /// Clears an identity's stale marker, if set.
    pub fn clear_invalid(&self, identity: &Identity) {
        let mut inner = self.inner.lock();
        let key = identity.idkey(&self.schema);
        let mut batch = WriteBatch::new();
        if inner.invalid.remove(&key) {
            batch.remove_invalid.push(key.as_bytes().to_vec());
        }
        self.persist(batch);
    }

    /// True if the identity is marked stale.
    #[must_use]
    pub fn is_invalid(&self, identity: &Identity) -> bool {
        self.inner
            .lock()
            .invalid
            .contains(&identity.idkey(&self.schema))
    }

    /// All idkeys currently marked stale.
    #[must_use]
    pub fn invalid(&self) -> Vec<IdKey> {
        self.inner.lock().invalid.iter().copied().collect()
    }

    /// Enqueues a pending action and returns its id.
    pub fn add_action(&self, payload: Vec<u8>, priority: RemotePriority) -> i64 {
        let mut inner = self.inner.lock();
        let id = inner.next_action_id;
        inner.next_action_id += 1;
        inner.actions.push(PendingAction {
            id,
            payload: payload.clone(),
            priority,
        });
        let mut batch = WriteBatch::new();
        batch.add_actions.push(ActionInsert {
            id,
            payload,
            priority: priority.discriminant(),
        });
        self.persist(batch);
        id
    }

    /// The pending-action outbox, in enqueue order.
    #[must_use]
    pub fn actions(&self) -> Vec<PendingAction> {
        self.inner.lock().actions.clone()
    }

    /// Removes acknowledged actions by id.
    pub fn clear_actions(&self, ids: &[i64]) {
        let mut inner = self.inner.lock();
        inner.actions.retain(|action| !ids.contains(&action.id));
        let mut batch = WriteBatch::new();
        batch.remove_actions.extend_from_slice(ids);
        self.persist(batch);
    }

    /// Wipes the working set and the backing store.
    ///
    /// Open diff brackets stay open but anything already recorded is
    /// discarded.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entities.clear();
        inner.ledger = HolderLedger::new();
        inner.invalid.clear();
        inner.actions.clear();
        inner.diff = Diff::new();
        if !self.engine.clear(Box::new(|result| {
            if let Err(err) = result {
                tracing::error!(error = %err, "backing-store clear failed");
            }
        })) {
            tracing::debug!("clear dropped, engine closed");
        }
    }

    /// Shuts the space down. Accepted writes finish committing; every
    /// later durable operation is silently dropped. Idempotent.
    pub fn release(&self) {
        self.engine.close();
    }

    /// True once [`Space::release`] has run.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.engine.state() == crate::engine::EngineState::Closed
    }

    fn hold_locked(
        &self,
        inner: &mut SpaceInner,
        holder: &Holder,
        kind: KindId,
        key: IdKey,
        batch: &mut WriteBatch,
    ) {
        // Re-declaring an existing hold must not duplicate index rows.
        if inner.ledger.holders_of(key).iter().any(|h| h.name == holder.name) {
            return;
        }
        inner.ledger.hold(holder, key);
        batch.add_holders.push(HolderRow {
            name: holder.name.clone(),
            hold_kind: holder.kind.discriminant(),
            ref_kind: self.schema.kind(kind).name.clone(),
            ref_idkey: key.as_bytes().to_vec(),
        });
    }

    /// Core imprint step for one already-flattened entity.
    fn apply_entity_locked(
        &self,
        inner: &mut SpaceInner,
        entity: Entity,
        require_held: bool,
        batch: &mut WriteBatch,
    ) {
        let Some(identity) = entity.identity(&self.schema) else {
            return;
        };
        let key = identity.idkey(&self.schema);
        if require_held && !inner.ledger.is_held(key) {
            tracing::debug!(%key, "dropping imprint of unretained entity");
            return;
        }
        let was = inner.entities.get(&key).cloned();
        let merged = match &was {
            Some(current) => current.merged_with(&entity),
            None => entity,
        };
        if was.as_ref() == Some(&merged) {
            return;
        }
        inner.entities.insert(key, merged.clone());
        if inner.diff_depth > 0 {
            inner.diff.record(key, was.clone(), Some(merged.clone()));
        }
        if inner.ledger.is_held(key) {
            batch.upsert_entities.push(EntityUpsert {
                idkey: key.as_bytes().to_vec(),
                kind: self.schema.kind(merged.kind()).name.clone(),
                blob: blob::encode_entity(&self.schema, &merged),
            });
        }
        self.run_reactions_locked(inner, was.as_ref(), &merged, batch);
    }

    fn run_reactions_locked(
        &self,
        inner: &mut SpaceInner,
        was: Option<&Entity>,
        merged: &Entity,
        batch: &mut WriteBatch,
    ) {
        let def = self.schema.kind(merged.kind());
        for rule in &def.reactions {
            if !Entity::field_changed(was, merged, rule.field, &self.schema) {
                continue;
            }
            match rule.effect {
                ReactionEffect::Invalidate(affected) => {
                    for identity in affected(was, merged) {
                        let key = identity.idkey(&self.schema);
                        if inner.invalid.insert(key) {
                            batch.add_invalid.push(key.as_bytes().to_vec());
                        }
                        if inner.diff_depth > 0 {
                            inner.diff.record_invalidated(key);
                        }
                    }
                }
                ReactionEffect::Rederive(affected) => {
                    for identity in affected(was, merged) {
                        self.rederive_locked(inner, &identity, batch);
                    }
                }
            }
        }
    }

    /// Computes a derived entity and caches it, held or not.
    fn rederive_locked(
        &self,
        inner: &mut SpaceInner,
        identity: &Identity,
        batch: &mut WriteBatch,
    ) {
        let Some(rule) = &self.schema.kind(identity.kind()).derive else {
            return;
        };
        let derived = {
            let view = SpaceView {
                entities: &inner.entities,
                schema: &self.schema,
            };
            (rule.derive)(&view, identity)
        };
        if let Some(entity) = derived {
            self.apply_entity_locked(inner, entity, false, batch);
        }
    }

    fn evict_locked(&self, inner: &mut SpaceInner, keys: &[IdKey], batch: &mut WriteBatch) {
        for key in keys {
            if let Some(previous) = inner.entities.remove(key) {
                if inner.diff_depth > 0 {
                    inner.diff.record(*key, Some(previous), None);
                }
                batch.remove_entities.push(key.as_bytes().to_vec());
            }
            if inner.invalid.remove(key) {
                batch.remove_invalid.push(key.as_bytes().to_vec());
            }
        }
    }

    /// Submits a batch to the engine, under the space lock, so commit
    /// order matches observation order.
    fn persist(&self, batch: WriteBatch) {
        if batch.is_empty() {
            return;
        }
        if !self.engine.store(
            batch,
            Box::new(|result| {
                if let Err(err) = result {
                    tracing::error!(error = %err, "background write failed");
                }
            }),
        ) {
            tracing::debug!("write dropped, engine closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldValue;
    use crate::schema::{FieldType, KindSpec, SchemaBuilder};
    use crate::types::FieldId;
    use holdfast_storage::MemoryBackend;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .kind(
                KindSpec::new("item")
                    .field("id", FieldType::Int)
                    .field("title", FieldType::Text)
                    .field("favorite", FieldType::Bool)
                    .identity(&["id"]),
            )
            .build()
            .unwrap()
    }

    fn open(schema: Schema) -> Space {
        Space::open(schema, Arc::new(MemoryBackend::new(1024))).unwrap()
    }

    fn item_identity(space: &Space, id: i64) -> Identity {
        Identity::of(space.schema(), "item", &[("id", id.into())]).unwrap()
    }

    fn item(space: &Space, id: i64, title: &str) -> Entity {
        Entity::new(space.schema().kind_id("item").unwrap())
            .with_field(FieldId(0), id)
            .with_field(FieldId(1), title)
    }

    #[test]
    fn imprint_of_unretained_entity_is_dropped() {
        let space = open(schema());
        space.imprint(item(&space, 1, "ghost"));
        assert!(!space.contains(&item_identity(&space, 1)));
    }

    #[test]
    fn remember_then_imprint_merges() {
        let space = open(schema());
        let holder = Holder::persistent("screen");
        let identity = item_identity(&space, 1);

        space.remember(&holder, &[identity.clone()]);
        space.imprint(item(&space, 1, "first"));
        let update = Entity::new(space.schema().kind_id("item").unwrap())
            .with_field(FieldId(0), 1i64)
            .with_field(FieldId(2), true);
        space.imprint(update);

        let stored = space.get(&identity).unwrap();
        assert_eq!(stored.field(FieldId(1)), Some(&FieldValue::Text("first".into())));
        assert_eq!(stored.field(FieldId(2)), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn last_forget_evicts_and_clears_markers() {
        let space = open(schema());
        let a = Holder::persistent("a");
        let b = Holder::persistent("b");
        let identity = item_identity(&space, 1);

        space.remember(&a, &[identity.clone()]);
        space.remember(&b, &[identity.clone()]);
        space.imprint(item(&space, 1, "kept"));
        space.add_invalid(&identity);

        space.forget(&a, &[identity.clone()]);
        assert!(space.contains(&identity));
        assert!(space.is_invalid(&identity));

        space.forget(&b, &[identity.clone()]);
        assert!(!space.contains(&identity));
        assert!(!space.is_invalid(&identity));
    }

    #[test]
    fn diff_brackets_flatten_to_outermost() {
        let space = open(schema());
        let holder = Holder::persistent("h");
        let identity = item_identity(&space, 1);
        space.remember(&holder, &[identity.clone()]);

        space.start_diff();
        space.imprint(item(&space, 1, "one"));
        space.start_diff();
        space.imprint(item(&space, 1, "two"));
        let inner = space.end_diff().unwrap();
        assert!(inner.is_empty());
        let outer = space.end_diff().unwrap();

        let pair = outer.change(identity.idkey(space.schema())).unwrap();
        assert_eq!(pair.previous, None);
        assert_eq!(
            pair.latest.as_ref().unwrap().field(FieldId(1)),
            Some(&FieldValue::Text("two".into()))
        );
        assert!(space.end_diff().is_err());
    }

    #[test]
    fn actions_round_trip() {
        let space = open(schema());
        let first = space.add_action(b"a".to_vec(), RemotePriority::Immediate);
        let second = space.add_action(b"b".to_vec(), RemotePriority::Batched);
        assert_ne!(first, second);
        assert_eq!(space.actions().len(), 2);
        space.clear_actions(&[first]);
        let left = space.actions();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, second);
    }

    #[test]
    fn release_drops_later_writes_but_memory_still_reads() {
        let space = open(schema());
        let holder = Holder::persistent("h");
        let identity = item_identity(&space, 1);
        space.remember(&holder, &[identity.clone()]);
        space.imprint(item(&space, 1, "kept"));
        space.release();
        assert!(space.is_released());
        // Memory unaffected.
        assert!(space.contains(&identity));
        space.release();
    }
}
