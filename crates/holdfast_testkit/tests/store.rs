//! Space-level scenarios over the sample schema.

use holdfast_core::{Entity, Equality, FieldValue, Holder};
use holdfast_testkit::prelude::*;
use holdfast_testkit::{author, item, shelf};

#[test]
fn title_then_favorite_merge_scenario() {
    let space = memory_space();
    let holder = Holder::persistent("reading-list");

    space.remember_entities(&holder, &[item_entity(7, "The Long Way")]);

    // A later partial update declares only the favorite flag.
    let update = Entity::new(ITEM)
        .with_field(item::ID, 7i64)
        .with_field(item::FAVORITE, true);
    space.imprint(update);

    let stored = space.get(&item_id(7)).unwrap();
    assert_eq!(
        stored.field(item::TITLE),
        Some(&FieldValue::Text("The Long Way".into()))
    );
    assert_eq!(stored.field(item::FAVORITE), Some(&FieldValue::Bool(true)));
}

#[test]
fn two_holder_release_scenario() {
    let space = memory_space();
    let list = Holder::persistent("list");
    let detail = Holder::persistent("detail");

    space.remember_entities(&list, &[item_entity(1, "shared")]);
    space.remember(&detail, &[item_id(1)]);

    space.forget(&list, &[item_id(1)]);
    assert!(space.contains(&item_id(1)), "detail still holds the item");

    space.forget(&detail, &[item_id(1)]);
    assert!(!space.contains(&item_id(1)), "last release evicts");
}

#[test]
fn session_release_is_bulk() {
    let space = memory_space();
    let screen = Holder::session("screen");
    let pinned = Holder::persistent("pinned");

    space.remember_entities(&screen, &[item_entity(1, "a"), item_entity(2, "b")]);
    space.remember(&pinned, &[item_id(2)]);

    space.release_session();
    assert!(!space.contains(&item_id(1)));
    assert!(space.contains(&item_id(2)), "persistent hold survives");
}

#[test]
fn diff_covers_the_whole_batch() {
    let space = memory_space();
    let holder = Holder::persistent("h");
    space.remember(&holder, &[item_id(1), item_id(2)]);

    space.start_diff();
    space.imprint(item_entity(1, "one"));
    space.imprint(item_entity(2, "two"));
    space.imprint(item_entity(1, "one, revised"));
    let diff = space.end_diff().unwrap();

    assert_eq!(diff.len(), 2);
    let schema = space.schema();
    let pair = diff.change(item_id(1).idkey(schema)).unwrap();
    assert_eq!(pair.previous, None, "earliest previous survives");
    assert_eq!(
        pair.latest.as_ref().unwrap().field(item::TITLE),
        Some(&FieldValue::Text("one, revised".into()))
    );
    assert!(diff.changes_of_kind(ITEM).len() == 2);
}

#[test]
fn flatten_prefers_top_level_state() {
    let space = memory_space();
    let holder = Holder::persistent("h");

    let nested = item_entity(1, "with author").with_field(
        item::AUTHOR,
        author_entity("lee", "stale bio"),
    );
    // Top-level author listed alongside; its state must win.
    space.remember_entities(&holder, &[nested, author_entity("lee", "fresh bio")]);

    let stored = space.get(&author_id("lee")).unwrap();
    assert_eq!(
        stored.field(author::BIO),
        Some(&FieldValue::Text("fresh bio".into()))
    );
}

#[test]
fn nested_authors_are_retained_transitively() {
    let space = memory_space();
    let holder = Holder::persistent("h");

    let entity = item_entity(1, "t").with_field(item::AUTHOR, author_entity("lee", "bio"));
    space.remember_entities(&holder, &[entity]);

    assert!(space.contains(&author_id("lee")));
    // The author is held too, so an imprint of it is accepted.
    space.imprint(author_entity("lee", "new bio"));
    assert_eq!(
        space.get(&author_id("lee")).unwrap().field(author::BIO),
        Some(&FieldValue::Text("new bio".into()))
    );
}

#[test]
fn favorite_change_rederives_the_shelf() {
    let space = memory_space();
    let holder = Holder::persistent("h");
    space.remember_entities(&holder, &[item_entity(1, "a"), item_entity(2, "b")]);

    // Seed the shelf cache.
    let initial = space.derive(&shelf_id(FAVORITES_SHELF)).unwrap();
    assert_eq!(initial.field(shelf::COUNT), Some(&FieldValue::Int(0)));

    let favorite = Entity::new(ITEM)
        .with_field(item::ID, 1i64)
        .with_field(item::FAVORITE, true);
    space.imprint(favorite);

    let shelf_now = space.get(&shelf_id(FAVORITES_SHELF)).unwrap();
    assert_eq!(shelf_now.field(shelf::COUNT), Some(&FieldValue::Int(1)));
}

#[test]
fn newly_declared_field_fires_reactions() {
    let space = memory_space();
    let holder = Holder::persistent("h");
    // First imprint never declared favorite at all.
    space.remember_entities(&holder, &[item_entity(1, "a")]);
    space.derive(&shelf_id(FAVORITES_SHELF)).unwrap();

    let update = Entity::new(ITEM)
        .with_field(item::ID, 1i64)
        .with_field(item::FAVORITE, true);
    space.imprint(update);

    let shelf_now = space.get(&shelf_id(FAVORITES_SHELF)).unwrap();
    assert_eq!(shelf_now.field(shelf::COUNT), Some(&FieldValue::Int(1)));
}

#[test]
fn title_change_invalidates_the_author() {
    let space = memory_space();
    let holder = Holder::persistent("h");
    let entity = item_entity(1, "original").with_field(item::AUTHOR, author_entity("lee", "b"));
    space.remember_entities(&holder, &[entity.clone()]);
    assert!(!space.is_invalid(&author_id("lee")));

    let update = entity.with_field(item::TITLE, "changed");
    space.imprint(update);
    assert!(space.is_invalid(&author_id("lee")));

    // Forgetting the author clears its marker with it.
    space.forget(&holder, &[author_id("lee")]);
    assert!(!space.is_invalid(&author_id("lee")));
}

#[test]
fn derive_caches_until_rederived() {
    let space = memory_space();
    let first = space.derive(&shelf_id(FAVORITES_SHELF)).unwrap();
    // Cached: a second derive sees the same value without recompute.
    let second = space.derive(&shelf_id(FAVORITES_SHELF)).unwrap();
    assert!(first.equals(&second, Equality::State, space.schema()));
    assert!(space.contains(&shelf_id(FAVORITES_SHELF)));
}

#[test]
fn derive_without_rule_is_none() {
    let space = memory_space();
    assert!(space.derive(&item_id(404)).is_none());
    assert!(space.derive(&author_id("nobody")).is_none());
}

#[test]
fn unretained_imprints_are_dropped() {
    let space = memory_space();
    space.imprint(item_entity(9, "nobody asked"));
    assert!(!space.contains(&item_id(9)));
}

#[test]
fn actions_queue_in_order_and_clear_by_id() {
    let space = memory_space();
    use holdfast_core::RemotePriority;

    let a = space.add_action(b"create item".to_vec(), RemotePriority::Immediate);
    let b = space.add_action(b"sync later".to_vec(), RemotePriority::Batched);

    let queued = space.actions();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].id, a);
    assert_eq!(queued[1].id, b);

    space.clear_actions(&[a]);
    assert_eq!(space.actions().len(), 1);
}

#[test]
fn clear_wipes_everything() {
    let space = memory_space();
    let holder = Holder::persistent("h");
    space.remember_entities(&holder, &[item_entity(1, "a")]);
    space.add_invalid(&item_id(1));

    space.clear();
    assert!(!space.contains(&item_id(1)));
    assert!(space.invalid().is_empty());
    assert!(space.actions().is_empty());
}
