//! Property-based generators for the sample schema.

use crate::fixtures::{item, ITEM};
use holdfast_core::{Entity, FieldValue};
use proptest::prelude::*;

/// Strategy producing scalar field values.
pub fn arb_scalar() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        "[a-z ]{0,16}".prop_map(FieldValue::Text),
        proptest::collection::vec(any::<u8>(), 0..32).prop_map(FieldValue::Bytes),
    ]
}

/// Strategy producing item entities with a random subset of fields
/// declared. The identity field is always declared.
pub fn arb_item() -> impl Strategy<Value = Entity> {
    (
        any::<i64>(),
        proptest::option::of("[a-z ]{0,16}"),
        proptest::option::of(any::<bool>()),
        proptest::collection::vec(arb_scalar(), 0..4),
    )
        .prop_map(|(id, title, favorite, tags)| {
            let mut entity = Entity::new(ITEM).with_field(item::ID, id);
            if let Some(title) = title {
                entity = entity.with_field(item::TITLE, title);
            }
            if let Some(favorite) = favorite {
                entity = entity.with_field(item::FAVORITE, favorite);
            }
            if !tags.is_empty() {
                entity = entity.with_field(item::TAGS, FieldValue::List(tags));
            }
            entity
        })
}
