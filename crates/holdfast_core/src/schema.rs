//! Closed entity schema and dispatch tables.
//!
//! The schema is the statically-known set of entity kinds the store
//! handles. Each kind carries its field table (field order is the fixed
//! encode order), identity projection, reaction rules, and optional
//! derivation rule. Application code builds the schema once at startup;
//! dispatch is by `KindId` index, never by runtime type inspection.

use crate::entity::{Entity, FieldValue, Identity};
use crate::error::{CoreError, CoreResult};
use crate::space::SpaceView;
use crate::types::{FieldId, KindId};
use std::collections::{HashMap, HashSet};

/// Declared type of a field.
///
/// Nested entity values carry their own kind, so `Entity` and `List`
/// need no type parameter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
    /// A nested entity.
    Entity,
    /// A sequence of values.
    List,
}

impl FieldType {
    /// The value an absent field compares as under `State` equality.
    ///
    /// Nested entities have no default: an absent entity field only
    /// equals another absent entity field.
    #[must_use]
    pub fn default_value(self) -> Option<FieldValue> {
        match self {
            Self::Bool => Some(FieldValue::Bool(false)),
            Self::Int => Some(FieldValue::Int(0)),
            Self::Text => Some(FieldValue::Text(String::new())),
            Self::Bytes => Some(FieldValue::Bytes(Vec::new())),
            Self::List => Some(FieldValue::List(Vec::new())),
            Self::Entity => None,
        }
    }

    /// True for types allowed in an identity projection.
    #[must_use]
    pub fn is_scalar(self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Text | Self::Bytes)
    }
}

/// One field of a kind.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name, unique within the kind.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
}

/// Maps a field change on one entity to identities that must be marked
/// stale or recomputed.
///
/// The function sees the pre-merge value (`None` on first creation) and
/// the post-merge value, and returns the affected identities. This
/// inverts the dependency walk: each kind knows what it might affect,
/// so rule dispatch is constant-time per imprint.
pub type AffectedFn = fn(was: Option<&Entity>, is: &Entity) -> Vec<Identity>;

/// What a reaction does to the identities it maps to.
#[derive(Clone, Copy)]
pub enum ReactionEffect {
    /// Mark the identities invalid (stale, due for remote refresh).
    Invalidate(AffectedFn),
    /// Recompute the identities' derived values.
    Rederive(AffectedFn),
}

impl std::fmt::Debug for ReactionEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalidate(_) => f.write_str("Invalidate(..)"),
            Self::Rederive(_) => f.write_str("Rederive(..)"),
        }
    }
}

/// A declared reaction: when `field` changes, apply `effect`.
#[derive(Debug, Clone)]
pub struct ReactionRule {
    /// The watched field.
    pub field: FieldId,
    /// The effect to apply when it changes.
    pub effect: ReactionEffect,
}

/// Computes an entity's value from other retained entities.
///
/// Derivation is read-only over existing state: the view exposes
/// lookups but no mutation.
pub type DeriveFn = fn(view: &SpaceView<'_>, target: &Identity) -> Option<Entity>;

/// A resolved derivation rule.
#[derive(Clone)]
pub struct DeriveRule {
    /// The derivation function.
    pub derive: DeriveFn,
    /// Kinds the rule reads, used to reject cyclic derivations.
    pub reads: Vec<KindId>,
}

impl std::fmt::Debug for DeriveRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeriveRule")
            .field("reads", &self.reads)
            .finish_non_exhaustive()
    }
}

/// A fully resolved entity kind.
#[derive(Debug, Clone)]
pub struct KindDef {
    /// Kind name (the type tag in durable storage).
    pub name: String,
    /// Field table; index is the `FieldId`, order is the encode order.
    pub fields: Vec<FieldDef>,
    /// Identity projection. Empty means the kind is not identifiable.
    pub identity: Vec<FieldId>,
    /// Fields that higher layers must redact before export.
    pub secret: Vec<FieldId>,
    /// Reaction rules watched on imprint.
    pub reactions: Vec<ReactionRule>,
    /// Optional derivation rule.
    pub derive: Option<DeriveRule>,
}

impl KindDef {
    /// Looks up a field id by name.
    #[must_use]
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| FieldId(i as u16))
    }

    /// Returns the field definition for an id, if defined.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id.0 as usize)
    }

    /// True if this kind has an identity projection.
    #[must_use]
    pub fn is_identifiable(&self) -> bool {
        !self.identity.is_empty()
    }
}

/// The closed kind table.
#[derive(Debug)]
pub struct Schema {
    kinds: Vec<KindDef>,
    by_name: HashMap<String, KindId>,
}

impl Schema {
    /// Returns the kind definition for an id.
    ///
    /// # Panics
    ///
    /// Panics if the id was not produced by this schema; kind ids are
    /// only valid against the schema that assigned them.
    #[must_use]
    pub fn kind(&self, id: KindId) -> &KindDef {
        &self.kinds[id.0 as usize]
    }

    /// Looks up a kind id by name.
    #[must_use]
    pub fn kind_id(&self, name: &str) -> Option<KindId> {
        self.by_name.get(name).copied()
    }

    /// Looks up a kind definition by name.
    #[must_use]
    pub fn kind_by_name(&self, name: &str) -> Option<&KindDef> {
        self.kind_id(name).map(|id| self.kind(id))
    }

    /// Number of kinds in the schema.
    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True if the schema has no kinds.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Iterates over all kinds with their ids.
    pub fn kinds(&self) -> impl Iterator<Item = (KindId, &KindDef)> {
        self.kinds
            .iter()
            .enumerate()
            .map(|(i, def)| (KindId(i as u16), def))
    }
}

/// Unresolved kind description used while building a schema.
#[derive(Debug, Clone, Default)]
pub struct KindSpec {
    name: String,
    fields: Vec<FieldDef>,
    identity: Vec<String>,
    secret: Vec<String>,
    reactions: Vec<(String, ReactionEffect)>,
    derive: Option<(DeriveFn, Vec<String>)>,
}

impl KindSpec {
    /// Starts a kind description.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a field. Declaration order fixes the field ids.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
        });
        self
    }

    /// Declares the identity projection by field names.
    #[must_use]
    pub fn identity(mut self, names: &[&str]) -> Self {
        self.identity = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Declares secret fields by name.
    #[must_use]
    pub fn secret(mut self, names: &[&str]) -> Self {
        self.secret = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    /// Declares a reaction on a field.
    #[must_use]
    pub fn react_on(mut self, field: impl Into<String>, effect: ReactionEffect) -> Self {
        self.reactions.push((field.into(), effect));
        self
    }

    /// Declares a derivation rule reading the named kinds.
    #[must_use]
    pub fn derive(mut self, derive: DeriveFn, reads: &[&str]) -> Self {
        self.derive = Some((derive, reads.iter().map(|n| (*n).to_string()).collect()));
        self
    }
}

/// Builds and validates a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    specs: Vec<KindSpec>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind. Registration order fixes the kind ids.
    #[must_use]
    pub fn kind(mut self, spec: KindSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Resolves and validates the schema.
    ///
    /// # Errors
    ///
    /// Fails if kind or field names collide, identity fields are
    /// missing or non-scalar, reaction fields are unknown, derive
    /// rules read unknown kinds, or derivation rules form a cycle.
    pub fn build(self) -> CoreResult<Schema> {
        let mut by_name = HashMap::new();
        for (i, spec) in self.specs.iter().enumerate() {
            if by_name.insert(spec.name.clone(), KindId(i as u16)).is_some() {
                return Err(CoreError::schema_invalid(format!(
                    "duplicate kind name {:?}",
                    spec.name
                )));
            }
        }

        let mut kinds = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let mut seen = HashSet::new();
            for field in &spec.fields {
                if !seen.insert(field.name.as_str()) {
                    return Err(CoreError::schema_invalid(format!(
                        "duplicate field {:?} on kind {:?}",
                        field.name, spec.name
                    )));
                }
            }

            let resolve_field = |name: &String| -> CoreResult<FieldId> {
                spec.fields
                    .iter()
                    .position(|f| &f.name == name)
                    .map(|i| FieldId(i as u16))
                    .ok_or_else(|| {
                        CoreError::schema_invalid(format!(
                            "kind {:?} references unknown field {:?}",
                            spec.name, name
                        ))
                    })
            };

            let mut identity = Vec::new();
            for name in &spec.identity {
                let id = resolve_field(name)?;
                if !spec.fields[id.0 as usize].field_type.is_scalar() {
                    return Err(CoreError::schema_invalid(format!(
                        "identity field {:?} on kind {:?} must be scalar",
                        name, spec.name
                    )));
                }
                identity.push(id);
            }

            let mut secret = Vec::new();
            for name in &spec.secret {
                secret.push(resolve_field(name)?);
            }

            let mut reactions = Vec::new();
            for (name, effect) in &spec.reactions {
                reactions.push(ReactionRule {
                    field: resolve_field(name)?,
                    effect: *effect,
                });
            }

            let derive = match &spec.derive {
                Some((derive, reads)) => {
                    let mut read_ids = Vec::new();
                    for read in reads {
                        let id = by_name.get(read).copied().ok_or_else(|| {
                            CoreError::schema_invalid(format!(
                                "derive rule on kind {:?} reads unknown kind {:?}",
                                spec.name, read
                            ))
                        })?;
                        read_ids.push(id);
                    }
                    Some(DeriveRule {
                        derive: *derive,
                        reads: read_ids,
                    })
                }
                None => None,
            };

            kinds.push(KindDef {
                name: spec.name.clone(),
                fields: spec.fields.clone(),
                identity,
                secret,
                reactions,
                derive,
            });
        }

        let schema = Schema { kinds, by_name };
        schema.check_derive_cycles()?;
        Ok(schema)
    }
}

impl Schema {
    /// Rejects derivation rules that can reach themselves through other
    /// derived kinds, so `derive()` can never recurse unboundedly.
    fn check_derive_cycles(&self) -> CoreResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        fn visit(
            schema: &Schema,
            id: KindId,
            marks: &mut [Mark],
        ) -> Result<(), KindId> {
            match marks[id.0 as usize] {
                Mark::Black => return Ok(()),
                Mark::Grey => return Err(id),
                Mark::White => {}
            }
            marks[id.0 as usize] = Mark::Grey;
            if let Some(rule) = &schema.kind(id).derive {
                for read in &rule.reads {
                    if schema.kind(*read).derive.is_some() {
                        visit(schema, *read, marks)?;
                    }
                }
            }
            marks[id.0 as usize] = Mark::Black;
            Ok(())
        }

        let mut marks = vec![Mark::White; self.kinds.len()];
        for (id, def) in self.kinds() {
            if def.derive.is_some() {
                if let Err(cycle_at) = visit(self, id, &mut marks) {
                    return Err(CoreError::schema_invalid(format!(
                        "cyclic derivation involving kind {:?}",
                        self.kind(cycle_at).name
                    )));
                }
            }
        }
        Ok(())
    }
}
