//! Batched change observation.
//!
//! A [`Diff`] accumulates the net effect of a run of imprints: for each
//! touched entity, the state before the first change and after the last
//! one, plus the set of entities marked stale along the way.

use crate::entity::Entity;
use crate::types::{IdKey, KindId};
use std::collections::{HashMap, HashSet};

/// Before/after states of one entity over a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangePair {
    /// State before the first change in the batch; `None` if the
    /// entity did not exist.
    pub previous: Option<Entity>,
    /// State after the last change; `None` if the entity was evicted.
    pub latest: Option<Entity>,
}

/// The net change set of a bracketed batch of imprints.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    changes: HashMap<IdKey, ChangePair>,
    invalidated: HashSet<IdKey>,
}

impl Diff {
    /// Creates an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one change.
    ///
    /// The first record for a key fixes `previous`; later records only
    /// advance `latest`, so the pair is the net effect over the batch.
    pub fn record(&mut self, key: IdKey, previous: Option<Entity>, latest: Option<Entity>) {
        match self.changes.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().latest = latest;
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(ChangePair { previous, latest });
            }
        }
    }

    /// Records that an entity was marked stale.
    pub fn record_invalidated(&mut self, key: IdKey) {
        self.invalidated.insert(key);
    }

    /// Folds another diff into this one, with `other` as the later
    /// batch. Follows the same earliest-previous, newest-latest law as
    /// [`Diff::record`].
    pub fn merge(&mut self, other: Diff) {
        for (key, pair) in other.changes {
            self.record(key, pair.previous, pair.latest);
        }
        self.invalidated.extend(other.invalidated);
    }

    /// The change pair for a key, if it was touched.
    #[must_use]
    pub fn change(&self, key: IdKey) -> Option<&ChangePair> {
        self.changes.get(&key)
    }

    /// Iterates all changes.
    pub fn changes(&self) -> impl Iterator<Item = (IdKey, &ChangePair)> {
        self.changes.iter().map(|(key, pair)| (*key, pair))
    }

    /// Change pairs whose latest (or, for evictions, previous) entity
    /// is of the given kind.
    #[must_use]
    pub fn changes_of_kind(&self, kind: KindId) -> Vec<(IdKey, &ChangePair)> {
        self.changes
            .iter()
            .filter(|(_, pair)| {
                pair.latest
                    .as_ref()
                    .or(pair.previous.as_ref())
                    .is_some_and(|e| e.kind() == kind)
            })
            .map(|(key, pair)| (*key, pair))
            .collect()
    }

    /// Change pairs matching a predicate over (previous, latest).
    #[must_use]
    pub fn matching(
        &self,
        mut predicate: impl FnMut(Option<&Entity>, Option<&Entity>) -> bool,
    ) -> Vec<(IdKey, &ChangePair)> {
        self.changes
            .iter()
            .filter(|(_, pair)| predicate(pair.previous.as_ref(), pair.latest.as_ref()))
            .map(|(key, pair)| (*key, pair))
            .collect()
    }

    /// Keys marked stale during the batch.
    #[must_use]
    pub fn invalidated(&self) -> &HashSet<IdKey> {
        &self.invalidated
    }

    /// Number of changed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True if nothing changed and nothing was invalidated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.invalidated.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, KindSpec, Schema, SchemaBuilder};
    use crate::types::FieldId;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .kind(
                KindSpec::new("item")
                    .field("id", FieldType::Int)
                    .field("title", FieldType::Text)
                    .identity(&["id"]),
            )
            .build()
            .unwrap()
    }

    fn item(s: &Schema, id: i64, title: &str) -> Entity {
        Entity::new(s.kind_id("item").unwrap())
            .with_field(FieldId(0), id)
            .with_field(FieldId(1), title)
    }

    fn key(byte: u8) -> IdKey {
        IdKey::from_bytes([byte; 32])
    }

    #[test]
    fn net_effect_over_repeated_records() {
        let s = schema();
        let v1 = item(&s, 1, "one");
        let v2 = item(&s, 1, "two");
        let v3 = item(&s, 1, "three");

        let mut diff = Diff::new();
        diff.record(key(1), None, Some(v1.clone()));
        diff.record(key(1), Some(v1), Some(v2.clone()));
        diff.record(key(1), Some(v2), Some(v3.clone()));

        let pair = diff.change(key(1)).unwrap();
        // Earliest previous, newest latest.
        assert_eq!(pair.previous, None);
        assert_eq!(pair.latest, Some(v3));
        assert_eq!(diff.len(), 1);
    }

    #[test]
    fn merge_obeys_the_same_law() {
        let s = schema();
        let v1 = item(&s, 1, "one");
        let v2 = item(&s, 1, "two");

        let mut first = Diff::new();
        first.record(key(1), None, Some(v1.clone()));
        let mut second = Diff::new();
        second.record(key(1), Some(v1), Some(v2.clone()));
        second.record_invalidated(key(9));

        first.merge(second);
        let pair = first.change(key(1)).unwrap();
        assert_eq!(pair.previous, None);
        assert_eq!(pair.latest, Some(v2));
        assert!(first.invalidated().contains(&key(9)));
    }

    #[test]
    fn kind_and_predicate_queries() {
        let s = schema();
        let kind = s.kind_id("item").unwrap();
        let mut diff = Diff::new();
        diff.record(key(1), None, Some(item(&s, 1, "a")));
        // Eviction: latest is None, kind taken from previous.
        diff.record(key(2), Some(item(&s, 2, "b")), None);

        assert_eq!(diff.changes_of_kind(kind).len(), 2);
        let created = diff.matching(|previous, latest| previous.is_none() && latest.is_some());
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, key(1));
    }
}
