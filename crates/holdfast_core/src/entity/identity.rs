//! Identity projections and stable idkey derivation.

use crate::entity::FieldValue;
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::types::{FieldId, IdKey, KindId};
use holdfast_codec::Writer;
use sha2::{Digest, Sha256};

/// The identity projection of an entity: its kind plus the values of
/// its identity fields.
///
/// Two entities with equal identities are the same logical entity
/// regardless of their remaining state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    kind: KindId,
    key: Vec<(FieldId, FieldValue)>,
}

impl Identity {
    /// Builds an identity for a named kind from named field values.
    ///
    /// The values must cover exactly the kind's identity fields; order
    /// does not matter.
    ///
    /// # Errors
    ///
    /// Fails if the kind or a field name is unknown, the kind is not
    /// identifiable, or the values do not match the identity
    /// projection.
    pub fn of(
        schema: &Schema,
        kind: &str,
        values: &[(&str, FieldValue)],
    ) -> CoreResult<Identity> {
        let kind_id = schema.kind_id(kind).ok_or_else(|| CoreError::UnknownKind {
            name: kind.to_string(),
        })?;
        let def = schema.kind(kind_id);
        if !def.is_identifiable() {
            return Err(CoreError::NotIdentifiable {
                kind: kind.to_string(),
            });
        }
        if values.len() != def.identity.len() {
            return Err(CoreError::invalid_operation(format!(
                "identity of kind {kind:?} takes {} field(s), got {}",
                def.identity.len(),
                values.len()
            )));
        }

        let mut key = Vec::with_capacity(def.identity.len());
        for field in &def.identity {
            let name = &def.fields[field.0 as usize].name;
            let value = values
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, v)| v.clone())
                .ok_or_else(|| CoreError::invalid_operation(format!(
                    "identity of kind {kind:?} is missing field {name:?}"
                )))?;
            key.push((*field, value));
        }
        Ok(Self::from_parts(kind_id, key))
    }

    /// Builds an identity from already-resolved parts.
    ///
    /// The key is normalized to field-id order so equal identities
    /// always hash to the same idkey.
    #[must_use]
    pub fn from_parts(kind: KindId, mut key: Vec<(FieldId, FieldValue)>) -> Identity {
        key.sort_by_key(|(field, _)| *field);
        Self { kind, key }
    }

    /// The identity's kind.
    #[must_use]
    pub fn kind(&self) -> KindId {
        self.kind
    }

    /// The identity field values, in field-id order.
    #[must_use]
    pub fn key(&self) -> &[(FieldId, FieldValue)] {
        &self.key
    }

    /// Derives the stable storage key for this identity.
    ///
    /// SHA-256 over the canonical encoding of the kind name and the
    /// identity fields in field-id order. Keyed by kind *name*, not
    /// kind id, so reordering the schema does not orphan stored rows.
    #[must_use]
    pub fn idkey(&self, schema: &Schema) -> IdKey {
        let mut writer = Writer::new();
        writer.put_str(&schema.kind(self.kind).name);
        for (field, value) in &self.key {
            writer.put_u16(field.as_u16());
            crate::engine::blob::encode_value(schema, &mut writer, value);
        }
        let digest = Sha256::digest(writer.into_bytes());
        IdKey::from_bytes(digest.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, KindSpec, SchemaBuilder};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .kind(
                KindSpec::new("pair")
                    .field("a", FieldType::Int)
                    .field("b", FieldType::Text)
                    .field("extra", FieldType::Text)
                    .identity(&["a", "b"]),
            )
            .kind(KindSpec::new("anon").field("x", FieldType::Int))
            .build()
            .unwrap()
    }

    #[test]
    fn of_accepts_any_field_order() {
        let s = schema();
        let a = Identity::of(&s, "pair", &[("a", 1i64.into()), ("b", "x".into())]).unwrap();
        let b = Identity::of(&s, "pair", &[("b", "x".into()), ("a", 1i64.into())]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.idkey(&s), b.idkey(&s));
    }

    #[test]
    fn of_rejects_wrong_projection() {
        let s = schema();
        assert!(Identity::of(&s, "pair", &[("a", 1i64.into())]).is_err());
        assert!(Identity::of(&s, "pair", &[("a", 1i64.into()), ("extra", "x".into())]).is_err());
        assert!(Identity::of(&s, "anon", &[]).is_err());
        assert!(Identity::of(&s, "nope", &[]).is_err());
    }

    #[test]
    fn idkey_is_stable_and_distinct() {
        let s = schema();
        let a = Identity::of(&s, "pair", &[("a", 1i64.into()), ("b", "x".into())]).unwrap();
        let b = Identity::of(&s, "pair", &[("a", 2i64.into()), ("b", "x".into())]).unwrap();
        assert_eq!(a.idkey(&s), a.idkey(&s));
        assert_ne!(a.idkey(&s), b.idkey(&s));
    }
}
