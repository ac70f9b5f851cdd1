mod common;

use common::*;
use rustmemorm::prelude::*;
use std::sync::Arc;

fn products(lines: &[Arc<Entity<InvoiceLine>>]) -> Vec<String> {
    lines.iter().map(|line| line.product().unwrap()).collect()
}

#[test]
fn test_owner_save_cascades_to_new_items() {
    let fx = fixture();
    let invoice = saved_invoice(&fx.context, "INV-30", &["a", "b"]);
    let lines = invoice.lines().items().unwrap();
    assert_eq!(products(&lines), vec!["a", "b"]);
    for line in &lines {
        assert_eq!(line.state(), PersistenceState::Original);
        assert_eq!(fx.store.calls_for(MapperOp::Insert, &**line).unwrap(), 1);
        assert!(line.invoice().unwrap().points_to(&invoice));
    }
    assert_eq!(fx.store.row_count(INVOICE_LINE).unwrap(), 2);
}

#[test]
fn test_remove_then_kill_deletes_each_object_once() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-31", &["a", "b"]);
    let relation = owner.lines();
    let items = relation.items().unwrap();
    let (a, b) = (items[0].clone(), items[1].clone());

    assert!(relation.remove(&a).unwrap());
    assert_eq!(owner.state(), PersistenceState::Changed);
    assert_eq!(relation.pending_delete().len(), 1);

    owner.save().unwrap();
    assert_eq!(a.state(), PersistenceState::Deleted);
    assert!(relation.pending_delete().is_empty());
    assert_eq!(fx.store.calls_for(MapperOp::Insert, &*b).unwrap(), 1);
    assert_eq!(fx.store.calls_for(MapperOp::Update, &*b).unwrap(), 0);

    owner.kill().unwrap();
    assert_eq!(owner.state(), PersistenceState::Deleted);
    assert_eq!(b.state(), PersistenceState::Deleted);

    assert_eq!(fx.store.calls_for(MapperOp::Delete, &*a).unwrap(), 1);
    assert_eq!(fx.store.calls_for(MapperOp::Delete, &*owner).unwrap(), 1);
    assert_eq!(fx.store.calls_for(MapperOp::Delete, &*b).unwrap(), 1);
    assert_eq!(
        fx.store.all_calls_for(&*b).unwrap(),
        vec![MapperOp::Insert, MapperOp::Delete]
    );
    assert_eq!(fx.store.row_count(INVOICE_LINE).unwrap(), 0);
    assert_eq!(fx.store.row_count(INVOICE).unwrap(), 0);
}

#[test]
fn test_relation_loads_lazily_from_store() {
    let fx = fixture();
    let key = saved_invoice(&fx.context, "INV-32", &["x", "y", "z"]).key();
    saved_invoice(&fx.context, "INV-33", &["other"]);
    fx.context.clear_identity_map().unwrap();

    let stub = fx.context.get::<Invoice>(key).unwrap();
    let relation = stub.lines();
    assert!(!relation.is_loaded());

    let lines = relation.items().unwrap();
    assert!(relation.is_loaded());
    assert_eq!(products(&lines), vec!["x", "y", "z"]);
    assert!(lines.iter().all(|line| line.invoice().unwrap().points_to(&stub)));
    assert_eq!(stub.state(), PersistenceState::Virtual);
}

#[test]
fn test_loader_failure_leaves_relation_unloaded() {
    let fx = fixture();
    let key = saved_invoice(&fx.context, "INV-34", &["a"]).key();
    fx.context.clear_identity_map().unwrap();

    let stub = fx.context.get::<Invoice>(key).unwrap();
    fx.store.fail_next(MapperOp::Select);
    assert!(stub.lines().items().is_err());
    assert!(!stub.lines().is_loaded());
    assert_eq!(stub.lines().len().unwrap(), 1);
}

#[test]
fn test_aborted_kill_restores_items() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-35", &["a", "b"]);
    let relation = owner.lines();
    assert_eq!(relation.len().unwrap(), 2);

    fx.store.fail_next(MapperOp::Delete);
    assert!(owner.kill().is_err());
    assert_eq!(owner.state(), PersistenceState::Original);
    assert_eq!(products(&relation.items().unwrap()), vec!["a", "b"]);
    assert!(relation.pending_delete().is_empty());
    assert_eq!(fx.store.count(MapperOp::Delete), 0);

    owner.kill().unwrap();
    assert_eq!(fx.store.count(MapperOp::Delete), 3);
}

#[test]
fn test_membership_changes_mark_owner_changed() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-36", &["a"]);
    let relation = owner.lines();

    let line = relation.add().unwrap();
    assert_eq!(owner.state(), PersistenceState::Changed);
    assert!(line.invoice().unwrap().points_to(&owner));
    line.set_product("c".to_string()).unwrap();

    owner.save().unwrap();
    assert_eq!(line.state(), PersistenceState::Original);
    assert_eq!(fx.store.row_count(INVOICE_LINE).unwrap(), 2);

    relation.clear().unwrap();
    assert_eq!(owner.state(), PersistenceState::Changed);
    assert!(relation.is_empty().unwrap());
    owner.save().unwrap();
    assert_eq!(fx.store.row_count(INVOICE_LINE).unwrap(), 0);
    assert_eq!(fx.store.count(MapperOp::Delete), 2);
}

#[test]
fn test_changed_items_are_saved_with_owner() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-37", &["a", "b"]);
    let items = owner.lines().items().unwrap();
    items[1].set_quantity(10).unwrap();
    assert_eq!(items[1].state(), PersistenceState::Changed);

    // items change on their own; the owner needs a change of its own to save
    owner.set_total(money(5000)).unwrap();
    owner.save().unwrap();
    assert_eq!(items[1].state(), PersistenceState::Original);
    assert_eq!(fx.store.calls_for(MapperOp::Update, &*items[1]).unwrap(), 1);
    assert_eq!(fx.store.calls_for(MapperOp::Update, &*items[0]).unwrap(), 0);
}

#[test]
fn test_unsaved_items_are_dropped_without_delete() {
    let fx = fixture();
    let owner = fx.context.create::<Invoice>().unwrap();
    let relation = owner.lines();
    let draft = relation.add().unwrap();
    assert!(relation.remove(&draft).unwrap());
    assert!(!relation.remove(&draft).unwrap());

    owner.save().unwrap();
    assert_eq!(draft.state(), PersistenceState::New);
    assert_eq!(fx.store.count(MapperOp::Delete), 0);
    assert_eq!(fx.store.row_count(INVOICE_LINE).unwrap(), 0);
}

#[test]
fn test_readding_removed_item_cancels_delete() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-38", &["a"]);
    let relation = owner.lines();
    let a = relation.items().unwrap()[0].clone();

    relation.remove(&a).unwrap();
    relation.add_item(a.clone()).unwrap();
    relation.add_item(a.clone()).unwrap();
    assert!(relation.pending_delete().is_empty());
    assert_eq!(relation.len().unwrap(), 1);

    owner.save().unwrap();
    assert_eq!(a.state(), PersistenceState::Original);
    assert_eq!(fx.store.count(MapperOp::Delete), 0);
}

#[test]
fn test_cascade_failure_is_reported() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-39", &[]);
    let line = owner.lines().add().unwrap();

    fx.store.fail_next(MapperOp::Insert);
    assert!(matches!(owner.save().unwrap_err(), OrmError::Mapper(_)));
    // the owner's own update went through
    assert_eq!(owner.state(), PersistenceState::Original);
    assert_eq!(line.state(), PersistenceState::New);

    line.save().unwrap();
    assert_eq!(fx.store.row_count(INVOICE_LINE).unwrap(), 1);
}

#[test]
fn test_deleted_owner_rejects_membership_changes() {
    let fx = fixture();
    let owner = saved_invoice(&fx.context, "INV-40", &[]);
    let relation = owner.lines();
    owner.kill().unwrap();

    assert!(matches!(
        relation.add().unwrap_err(),
        OrmError::InvalidState {
            state: PersistenceState::Deleted,
            ..
        }
    ));
}
