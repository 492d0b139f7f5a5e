//! The sample schema and store construction helpers.
//!
//! Three kinds: `item` (identified by id, with a reaction-bearing
//! favorite flag), `author` (identified by name, referenced from
//! items), and `shelf` (a derived aggregate counting favorite items).

use holdfast_core::{
    Entity, FieldId, FieldType, FieldValue, Identity, KindId, KindSpec, ReactionEffect, Schema,
    SchemaBuilder, Space, SpaceView,
};
use holdfast_storage::{MemoryBackend, TableBackend};
use std::sync::Arc;

/// Kind id of `item` in the sample schema.
pub const ITEM: KindId = KindId::new(0);
/// Kind id of `author` in the sample schema.
pub const AUTHOR: KindId = KindId::new(1);
/// Kind id of `shelf` in the sample schema.
pub const SHELF: KindId = KindId::new(2);

/// Field ids of the `item` kind.
pub mod item {
    use super::FieldId;

    /// Identity field.
    pub const ID: FieldId = FieldId::new(0);
    /// Display title.
    pub const TITLE: FieldId = FieldId::new(1);
    /// Favorite flag; rederives the favorites shelf on change.
    pub const FAVORITE: FieldId = FieldId::new(2);
    /// Nested author reference; invalidated when the title changes.
    pub const AUTHOR: FieldId = FieldId::new(3);
    /// Free-form tag list.
    pub const TAGS: FieldId = FieldId::new(4);
    /// Secret field, redacted by export surfaces.
    pub const SECRET_NOTE: FieldId = FieldId::new(5);
}

/// Field ids of the `author` kind.
pub mod author {
    use super::FieldId;

    /// Identity field.
    pub const NAME: FieldId = FieldId::new(0);
    /// Short biography.
    pub const BIO: FieldId = FieldId::new(1);
}

/// Field ids of the `shelf` kind.
pub mod shelf {
    use super::FieldId;

    /// Identity field.
    pub const NAME: FieldId = FieldId::new(0);
    /// Derived count of favorite items.
    pub const COUNT: FieldId = FieldId::new(1);
}

/// Name of the derived shelf the favorite reaction targets.
pub const FAVORITES_SHELF: &str = "favorites";

fn favorites_shelf_affected(_was: Option<&Entity>, _is: &Entity) -> Vec<Identity> {
    vec![Identity::from_parts(
        SHELF,
        vec![(shelf::NAME, FieldValue::Text(FAVORITES_SHELF.to_string()))],
    )]
}

fn item_author_affected(_was: Option<&Entity>, is: &Entity) -> Vec<Identity> {
    let Some(FieldValue::Entity(nested)) = is.field(item::AUTHOR) else {
        return Vec::new();
    };
    let Some(name) = nested.field(author::NAME) else {
        return Vec::new();
    };
    vec![Identity::from_parts(
        AUTHOR,
        vec![(author::NAME, name.clone())],
    )]
}

fn derive_shelf(view: &SpaceView<'_>, target: &Identity) -> Option<Entity> {
    let count = view
        .of_kind(ITEM)
        .into_iter()
        .filter(|e| matches!(e.field(item::FAVORITE), Some(FieldValue::Bool(true))))
        .count() as i64;
    let name = target.key().first().map(|(_, value)| value.clone())?;
    Some(
        Entity::new(SHELF)
            .with_field(shelf::NAME, name)
            .with_field(shelf::COUNT, count),
    )
}

/// Builds the sample schema.
#[must_use]
pub fn sample_schema() -> Schema {
    SchemaBuilder::new()
        .kind(
            KindSpec::new("item")
                .field("id", FieldType::Int)
                .field("title", FieldType::Text)
                .field("favorite", FieldType::Bool)
                .field("author", FieldType::Entity)
                .field("tags", FieldType::List)
                .field("secret_note", FieldType::Text)
                .identity(&["id"])
                .secret(&["secret_note"])
                .react_on("favorite", ReactionEffect::Rederive(favorites_shelf_affected))
                .react_on("title", ReactionEffect::Invalidate(item_author_affected)),
        )
        .kind(
            KindSpec::new("author")
                .field("name", FieldType::Text)
                .field("bio", FieldType::Text)
                .identity(&["name"]),
        )
        .kind(
            KindSpec::new("shelf")
                .field("name", FieldType::Text)
                .field("count", FieldType::Int)
                .identity(&["name"])
                .derive(derive_shelf, &["item"]),
        )
        .build()
        .expect("sample schema is valid")
}

/// Opens a space over a fresh in-memory backend.
#[must_use]
pub fn memory_space() -> Space {
    space_over(Arc::new(MemoryBackend::default()))
}

/// Opens a space with the sample schema over the given backend.
#[must_use]
pub fn space_over(backend: Arc<dyn TableBackend>) -> Space {
    Space::open(sample_schema(), backend).expect("space opens")
}

/// Builds an item entity with id and title declared.
#[must_use]
pub fn item_entity(id: i64, title: &str) -> Entity {
    Entity::new(ITEM)
        .with_field(item::ID, id)
        .with_field(item::TITLE, title)
}

/// Builds an author entity.
#[must_use]
pub fn author_entity(name: &str, bio: &str) -> Entity {
    Entity::new(AUTHOR)
        .with_field(author::NAME, name)
        .with_field(author::BIO, bio)
}

/// Identity of an item by id.
#[must_use]
pub fn item_id(id: i64) -> Identity {
    Identity::from_parts(ITEM, vec![(item::ID, FieldValue::Int(id))])
}

/// Identity of an author by name.
#[must_use]
pub fn author_id(name: &str) -> Identity {
    Identity::from_parts(AUTHOR, vec![(author::NAME, FieldValue::Text(name.to_string()))])
}

/// Identity of a shelf by name.
#[must_use]
pub fn shelf_id(name: &str) -> Identity {
    Identity::from_parts(SHELF, vec![(shelf::NAME, FieldValue::Text(name.to_string()))])
}
