//! Entity blob encoding.
//!
//! A stored blob is the kind name followed by the declared fields in
//! field-id order, each as a field id plus a tagged value. Kinds are
//! tagged by *name* so stored rows survive schema reordering. Secret
//! fields are included in plaintext at this layer; redaction belongs to
//! export surfaces above the store.

use crate::entity::{Entity, FieldValue};
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::types::FieldId;
use holdfast_codec::{CodecError, Reader, Writer};

const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_BYTES: u8 = 0x04;
const TAG_ENTITY: u8 = 0x05;
const TAG_LIST: u8 = 0x06;

/// Encodes an entity into its stored blob form.
#[must_use]
pub fn encode_entity(schema: &Schema, entity: &Entity) -> Vec<u8> {
    let mut writer = Writer::new();
    write_entity(schema, &mut writer, entity);
    writer.into_bytes()
}

fn write_entity(schema: &Schema, writer: &mut Writer, entity: &Entity) {
    writer.put_str(&schema.kind(entity.kind()).name);
    writer.put_u16(entity.declared_len() as u16);
    for (field, value) in entity.declared_fields() {
        writer.put_u16(field.as_u16());
        encode_value(schema, writer, value);
    }
}

/// Encodes one tagged value. Also the canonical encoding idkeys are
/// hashed over.
pub(crate) fn encode_value(schema: &Schema, writer: &mut Writer, value: &FieldValue) {
    match value {
        FieldValue::Bool(v) => {
            writer.put_u8(TAG_BOOL);
            writer.put_u8(u8::from(*v));
        }
        FieldValue::Int(v) => {
            writer.put_u8(TAG_INT);
            writer.put_i64(*v);
        }
        FieldValue::Text(v) => {
            writer.put_u8(TAG_TEXT);
            writer.put_str(v);
        }
        FieldValue::Bytes(v) => {
            writer.put_u8(TAG_BYTES);
            writer.put_bytes(v);
        }
        FieldValue::Entity(v) => {
            writer.put_u8(TAG_ENTITY);
            write_entity(schema, writer, v);
        }
        FieldValue::List(items) => {
            writer.put_u8(TAG_LIST);
            writer.put_u32(items.len() as u32);
            for item in items {
                encode_value(schema, writer, item);
            }
        }
    }
}

/// Decodes a stored blob back into an entity.
///
/// # Errors
///
/// Fails on truncated or malformed input, on a kind name the schema
/// does not define, and on field ids outside the kind's field table.
pub fn decode_entity(schema: &Schema, bytes: &[u8]) -> CoreResult<Entity> {
    let mut reader = Reader::new(bytes);
    let entity = read_entity(schema, &mut reader)?;
    reader.expect_end()?;
    Ok(entity)
}

fn read_entity(schema: &Schema, reader: &mut Reader<'_>) -> CoreResult<Entity> {
    let kind_name = reader.take_str()?;
    let kind = schema
        .kind_id(kind_name)
        .ok_or_else(|| CoreError::UnknownKind {
            name: kind_name.to_string(),
        })?;
    let def = schema.kind(kind);
    let count = reader.take_u16()?;
    let mut entity = Entity::new(kind);
    for _ in 0..count {
        let field = FieldId(reader.take_u16()?);
        if def.field(field).is_none() {
            return Err(CoreError::UnknownField {
                kind: def.name.clone(),
                field: field.as_u16(),
            });
        }
        let value = read_value(schema, reader)?;
        entity = entity.with_field(field, value);
    }
    Ok(entity)
}

fn read_value(schema: &Schema, reader: &mut Reader<'_>) -> CoreResult<FieldValue> {
    let offset = reader.position();
    match reader.take_u8()? {
        TAG_BOOL => match reader.take_u8()? {
            0 => Ok(FieldValue::Bool(false)),
            1 => Ok(FieldValue::Bool(true)),
            tag => Err(CodecError::BadTag { tag, offset }.into()),
        },
        TAG_INT => Ok(FieldValue::Int(reader.take_i64()?)),
        TAG_TEXT => Ok(FieldValue::Text(reader.take_str()?.to_string())),
        TAG_BYTES => Ok(FieldValue::Bytes(reader.take_bytes()?.to_vec())),
        TAG_ENTITY => Ok(FieldValue::Entity(Box::new(read_entity(schema, reader)?))),
        TAG_LIST => {
            let count = reader.take_u32()?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(read_value(schema, reader)?);
            }
            Ok(FieldValue::List(items))
        }
        tag => Err(CodecError::BadTag { tag, offset }.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Equality;
    use crate::schema::{FieldType, KindSpec, SchemaBuilder};

    fn schema() -> Schema {
        SchemaBuilder::new()
            .kind(
                KindSpec::new("item")
                    .field("id", FieldType::Int)
                    .field("title", FieldType::Text)
                    .field("favorite", FieldType::Bool)
                    .field("author", FieldType::Entity)
                    .field("tags", FieldType::List)
                    .field("raw", FieldType::Bytes)
                    .identity(&["id"]),
            )
            .kind(
                KindSpec::new("author")
                    .field("name", FieldType::Text)
                    .identity(&["name"]),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_state() {
        let s = schema();
        let author = Entity::new(s.kind_id("author").unwrap()).with_field(FieldId(0), "lee");
        let item = Entity::new(s.kind_id("item").unwrap())
            .with_field(FieldId(0), 42i64)
            .with_field(FieldId(1), "a title")
            .with_field(FieldId(2), true)
            .with_field(FieldId(3), author)
            .with_field(
                FieldId(4),
                FieldValue::List(vec![
                    FieldValue::Text("x".into()),
                    FieldValue::Int(-7),
                ]),
            )
            .with_field(FieldId(5), vec![0u8, 255, 3]);

        let blob = encode_entity(&s, &item);
        let decoded = decode_entity(&s, &blob).unwrap();
        assert!(decoded.equals(&item, Equality::State, &s));
        // Canonical form: re-encoding the decoded entity is identity.
        assert_eq!(encode_entity(&s, &decoded), blob);
    }

    #[test]
    fn partial_declaration_survives() {
        let s = schema();
        let item = Entity::new(s.kind_id("item").unwrap()).with_field(FieldId(0), 1i64);
        let decoded = decode_entity(&s, &encode_entity(&s, &item)).unwrap();
        assert_eq!(decoded.declared_len(), 1);
        assert!(!decoded.is_declared(FieldId(1)));
    }

    #[test]
    fn unknown_kind_rejected() {
        let s = schema();
        let mut writer = Writer::new();
        writer.put_str("ghost");
        writer.put_u16(0);
        let result = decode_entity(&s, &writer.into_bytes());
        assert!(matches!(result, Err(CoreError::UnknownKind { .. })));
    }

    #[test]
    fn unknown_field_rejected() {
        let s = schema();
        let mut writer = Writer::new();
        writer.put_str("author");
        writer.put_u16(1);
        writer.put_u16(999);
        writer.put_u8(TAG_INT);
        writer.put_i64(1);
        let result = decode_entity(&s, &writer.into_bytes());
        assert!(matches!(result, Err(CoreError::UnknownField { field: 999, .. })));
    }

    #[test]
    fn bad_tag_and_trailing_bytes_rejected() {
        let s = schema();
        let item = Entity::new(s.kind_id("item").unwrap()).with_field(FieldId(0), 1i64);
        let mut blob = encode_entity(&s, &item);

        let mut trailing = blob.clone();
        trailing.push(0);
        assert!(matches!(
            decode_entity(&s, &trailing),
            Err(CoreError::Codec(CodecError::TrailingBytes { .. }))
        ));

        // Corrupt the value tag of the first field.
        let tag_at = blob.len() - 9;
        blob[tag_at] = 0x7f;
        assert!(matches!(
            decode_entity(&s, &blob),
            Err(CoreError::Codec(CodecError::BadTag { tag: 0x7f, .. }))
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        let s = schema();
        let item = Entity::new(s.kind_id("item").unwrap()).with_field(FieldId(0), 1i64);
        let blob = encode_entity(&s, &item);
        let result = decode_entity(&s, &blob[..blob.len() - 2]);
        assert!(matches!(
            result,
            Err(CoreError::Codec(CodecError::UnexpectedEof { .. }))
        ));
    }
}
