//! Graph flattening: splitting nested entity trees into flat,
//! individually-retained records.

use crate::entity::{Entity, FieldValue};
use crate::schema::Schema;
use crate::types::IdKey;
use std::collections::{HashSet, VecDeque};

/// Collects the identifiable entities directly nested in `entity`.
///
/// Walks through lists and through non-identifiable nested entities
/// (those are part of the record itself), but stops at identifiable
/// ones: their own children belong to their own flattening step.
#[must_use]
pub fn references<'a>(schema: &Schema, entity: &'a Entity) -> Vec<&'a Entity> {
    let mut out = Vec::new();
    for (_, value) in entity.declared_fields() {
        collect(schema, value, &mut out);
    }
    out
}

fn collect<'a>(schema: &Schema, value: &'a FieldValue, out: &mut Vec<&'a Entity>) {
    match value {
        FieldValue::Entity(nested) => {
            if schema.kind(nested.kind()).is_identifiable() {
                out.push(nested);
            } else {
                for (_, inner) in nested.declared_fields() {
                    collect(schema, inner, out);
                }
            }
        }
        FieldValue::List(items) => {
            for item in items {
                collect(schema, item, out);
            }
        }
        _ => {}
    }
}

/// Flattens a batch of entity trees into the distinct identifiable
/// entities they contain.
///
/// When the same identity occurs more than once, the first occurrence
/// wins, and every top-level entry is recorded before any nested one is
/// considered. Duplicates are not re-traversed, which also bounds the
/// walk on cyclic references.
#[must_use]
pub fn flatten(schema: &Schema, entities: &[Entity]) -> Vec<Entity> {
    let mut seen: HashSet<IdKey> = HashSet::new();
    let mut out = Vec::new();
    let mut queue: VecDeque<Entity> = VecDeque::new();

    for entity in entities {
        visit(schema, entity, &mut seen, &mut out, &mut queue);
    }
    while let Some(current) = queue.pop_front() {
        for nested in references(schema, &current) {
            visit(schema, nested, &mut seen, &mut out, &mut queue);
        }
    }
    out
}

fn visit(
    schema: &Schema,
    entity: &Entity,
    seen: &mut HashSet<IdKey>,
    out: &mut Vec<Entity>,
    queue: &mut VecDeque<Entity>,
) {
    match entity.identity(schema) {
        Some(identity) => {
            if seen.insert(identity.idkey(schema)) {
                out.push(entity.clone());
                queue.push_back(entity.clone());
            }
        }
        // Anonymous containers are not retained themselves but their
        // contents still flatten.
        None => queue.push_back(entity.clone()),
    }
}
