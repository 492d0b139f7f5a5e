//! The entity value model.
//!
//! An [`Entity`] is an immutable, partially-declared record of a known
//! kind. A field is *declared* iff it is present in the field map;
//! absence is not null, and the distinction drives both the merge law
//! and reaction evaluation. "Mutation" always means building a new
//! instance.

mod flatten;
mod identity;

pub use flatten::{flatten, references};
pub use identity::Identity;

use crate::schema::{FieldDef, Schema};
use crate::types::{FieldId, KindId};
use std::collections::BTreeMap;

/// A declared field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A nested entity.
    Entity(Box<Entity>),
    /// A sequence of values.
    List(Vec<FieldValue>),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Entity> for FieldValue {
    fn from(value: Entity) -> Self {
        Self::Entity(Box::new(value))
    }
}

/// Which fields participate in an equality check, and how nested
/// values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    /// Identity fields only.
    Identity,
    /// All fields; an absent field compares as its type default.
    State,
    /// Only fields declared on both sides.
    StateDeclared,
    /// Like `State`, but nested identifiable entities compare by
    /// identity only, avoiding deep graph walks.
    Flat,
    /// Like `Flat`, but lists compare by length only.
    FlatSized,
}

/// An immutable, identity-keyed, partially-declared record.
///
/// The derived `PartialEq`/`Eq`/`Hash` are strict structural equality
/// (same kind, same declared fields); use [`Entity::equals`] for the
/// parameterized equality modes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    kind: KindId,
    fields: BTreeMap<FieldId, FieldValue>,
}

impl Entity {
    /// Creates an entity of the given kind with no declared fields.
    #[must_use]
    pub fn new(kind: KindId) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    /// Returns the entity's kind.
    #[must_use]
    pub fn kind(&self) -> KindId {
        self.kind
    }

    /// Declares a field, consuming and returning the entity.
    #[must_use]
    pub fn with_field(mut self, field: FieldId, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Returns the declared value of a field, if any.
    #[must_use]
    pub fn field(&self, field: FieldId) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// True if the field is declared on this entity.
    #[must_use]
    pub fn is_declared(&self, field: FieldId) -> bool {
        self.fields.contains_key(&field)
    }

    /// Iterates over declared fields in field-id order.
    pub fn declared_fields(&self) -> impl Iterator<Item = (FieldId, &FieldValue)> {
        self.fields.iter().map(|(id, value)| (*id, value))
    }

    /// Number of declared fields.
    #[must_use]
    pub fn declared_len(&self) -> usize {
        self.fields.len()
    }

    /// Applies the merge law: declared fields of `update` win, every
    /// other field is inherited from `self`.
    ///
    /// Both entities must be of the same kind.
    #[must_use]
    pub fn merged_with(&self, update: &Entity) -> Entity {
        debug_assert_eq!(self.kind, update.kind, "merge across kinds");
        let mut fields = self.fields.clone();
        for (id, value) in &update.fields {
            fields.insert(*id, value.clone());
        }
        Entity {
            kind: self.kind,
            fields,
        }
    }

    /// Returns this entity's identity projection, or `None` if the
    /// kind is not identifiable.
    ///
    /// Undeclared identity fields project as their type default so the
    /// projection is always total.
    #[must_use]
    pub fn identity(&self, schema: &Schema) -> Option<Identity> {
        let def = schema.kind(self.kind);
        if !def.is_identifiable() {
            return None;
        }
        let mut key = Vec::with_capacity(def.identity.len());
        for field in &def.identity {
            let value = match self.fields.get(field) {
                Some(value) => value.clone(),
                None => def
                    .field(*field)
                    .and_then(|f| f.field_type.default_value())?,
            };
            key.push((*field, value));
        }
        Some(Identity::from_parts(self.kind, key))
    }

    /// Compares two entities under the given equality mode.
    #[must_use]
    pub fn equals(&self, other: &Entity, mode: Equality, schema: &Schema) -> bool {
        if self.kind != other.kind {
            return false;
        }
        let def = schema.kind(self.kind);

        match mode {
            Equality::Identity => def.identity.iter().all(|field| {
                let fdef = match def.field(*field) {
                    Some(fdef) => fdef,
                    None => return false,
                };
                field_matches(
                    fdef,
                    self.fields.get(field),
                    other.fields.get(field),
                    Equality::State,
                    schema,
                )
            }),
            Equality::StateDeclared => {
                for (field, value) in &self.fields {
                    if let Some(theirs) = other.fields.get(field) {
                        if !value_equals(value, theirs, mode, schema) {
                            return false;
                        }
                    }
                }
                true
            }
            Equality::State | Equality::Flat | Equality::FlatSized => {
                (0..def.fields.len()).all(|i| {
                    let field = FieldId(i as u16);
                    let fdef = &def.fields[i];
                    field_matches(
                        fdef,
                        self.fields.get(&field),
                        other.fields.get(&field),
                        mode,
                        schema,
                    )
                })
            }
        }
    }

    /// Compares a single field between two optional entities under
    /// `StateDeclared`, with the rule that a field newly declared on
    /// `is` counts as a change even when `was` never declared it.
    ///
    /// This is the change test reaction rules run on.
    #[must_use]
    pub fn field_changed(
        was: Option<&Entity>,
        is: &Entity,
        field: FieldId,
        schema: &Schema,
    ) -> bool {
        let Some(new_value) = is.field(field) else {
            // Field untouched on the new value: nothing to compare.
            return false;
        };
        match was.and_then(|w| w.field(field)) {
            Some(old_value) => {
                !value_equals(old_value, new_value, Equality::StateDeclared, schema)
            }
            // First creation or newly declared: fires.
            None => true,
        }
    }
}

fn field_matches(
    def: &FieldDef,
    a: Option<&FieldValue>,
    b: Option<&FieldValue>,
    mode: Equality,
    schema: &Schema,
) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => value_equals(x, y, mode, schema),
        (None, None) => true,
        (Some(x), None) | (None, Some(x)) => match def.field_type.default_value() {
            Some(default) => value_equals(x, &default, mode, schema),
            None => false,
        },
    }
}

fn value_equals(a: &FieldValue, b: &FieldValue, mode: Equality, schema: &Schema) -> bool {
    match (a, b) {
        (FieldValue::Entity(x), FieldValue::Entity(y)) => match mode {
            Equality::Flat | Equality::FlatSized => {
                match (x.identity(schema), y.identity(schema)) {
                    (Some(xi), Some(yi)) => xi == yi,
                    _ => x.equals(y, mode, schema),
                }
            }
            _ => x.equals(y, mode, schema),
        },
        (FieldValue::List(x), FieldValue::List(y)) => {
            if mode == Equality::FlatSized {
                return x.len() == y.len();
            }
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(xv, yv)| value_equals(xv, yv, mode, schema))
        }
        _ => a == b,
    }
}
