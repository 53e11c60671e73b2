//! Bindings driven by remote changes from a second replica.
//!
//! Tests cover:
//! - One notification per remote transaction
//! - Collection caches following remote inserts, updates and deletes
//! - Ordered map order stability and concurrent inserts
//! - Duplicate and forbidden updates
//! - Concurrent leaf and subtree writes to one path
//! - Swapped sources only reporting the current map

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use weft_bind::{
    BindError, CollectionEvent, CrdtMappedList, CrdtObject, CrdtProp, MappedCrdtMap,
    MappedCrdtOrderedMap, SequenceEvent, ValueMapper, Watchable,
};
use weft_store::{CrdtRoot, ReplicatedDoc, TransactExt, Value};

fn sync(a: &ReplicatedDoc, b: &ReplicatedDoc) {
    b.apply_update(&a.encode_diff(&b.state_vector()).unwrap())
        .unwrap();
    a.apply_update(&b.encode_diff(&a.state_vector()).unwrap())
        .unwrap();
}

fn counter() -> (Arc<Mutex<usize>>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    (count, move || *sink.lock() += 1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    label: String,
    x: i64,
    y: i64,
}

#[test]
fn test_single_notification_for_three_field_transaction() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");

    let theirs: CrdtObject<Node> = CrdtObject::new(alice.get_map("node").unwrap());
    let ours: CrdtObject<Node> = CrdtObject::new(bob.get_map("node").unwrap());
    let (count, bump) = counter();
    let _sub = ours.on_remote_change(bump);

    theirs
        .update(|w| {
            w.set("label", "start")?;
            w.set("x", 10)?;
            w.set("y", 20)?;
            Ok(())
        })
        .unwrap();
    sync(&alice, &bob);

    assert_eq!(*count.lock(), 1);
    assert_eq!(
        ours.get_clone().unwrap(),
        Node {
            label: "start".into(),
            x: 10,
            y: 20
        }
    );
}

#[test]
fn test_local_writes_do_not_notify() {
    let alice = ReplicatedDoc::new("alice");
    let obj: CrdtObject<Node> = CrdtObject::new(alice.get_map("node").unwrap());
    let (count, bump) = counter();
    let _sub = obj.on_remote_change(bump);

    obj.update(|w| w.set("x", 1)).unwrap();
    assert_eq!(*count.lock(), 0);
}

#[test]
fn test_prop_only_reacts_to_its_key() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");

    let their_title: CrdtProp<String> = CrdtProp::new(alice.get_map("meta").unwrap(), "title");
    let their_zoom: CrdtProp<u32> = CrdtProp::new(alice.get_map("meta").unwrap(), "zoom");
    let title: CrdtProp<String> = CrdtProp::new(bob.get_map("meta").unwrap(), "title");
    let (count, bump) = counter();
    let _sub = title.on_remote_change(bump);

    their_zoom.set(&3).unwrap();
    sync(&alice, &bob);
    assert_eq!(*count.lock(), 0);

    their_title.set(&"Flow".to_string()).unwrap();
    sync(&alice, &bob);
    assert_eq!(*count.lock(), 1);
    assert_eq!(title.get().unwrap().as_deref(), Some("Flow"));

    assert!(their_title.clear());
    sync(&alice, &bob);
    assert_eq!(*count.lock(), 2);
    assert_eq!(title.get().unwrap(), None);
}

#[test]
fn test_mapped_map_follows_remote_changes() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());

    let theirs = MappedCrdtMap::new(alice.get_map("tags").unwrap(), mapper.clone(), true);
    let ours = MappedCrdtMap::new(bob.get_map("tags").unwrap(), mapper, true);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = ours.on_change(move |event| sink.lock().push(event.clone()));

    theirs.add("urgent", "#f00".into()).unwrap();
    sync(&alice, &bob);
    assert_eq!(ours.get("urgent").as_deref(), Some("#f00"));

    theirs.update("urgent", "#e00".into()).unwrap();
    sync(&alice, &bob);
    assert_eq!(ours.get("urgent").as_deref(), Some("#e00"));

    assert!(theirs.remove("urgent"));
    sync(&alice, &bob);
    assert!(!ours.has("urgent"));

    assert_eq!(
        *events.lock(),
        vec![
            CollectionEvent::Added {
                key: "urgent".into(),
                value: "#f00".into()
            },
            CollectionEvent::Updated {
                key: "urgent".into(),
                value: "#e00".into()
            },
            CollectionEvent::Removed {
                key: "urgent".into()
            },
        ]
    );
}

#[test]
fn test_duplicate_add_is_rejected() {
    let alice = ReplicatedDoc::new("alice");
    let tags = MappedCrdtMap::new(
        alice.get_map("tags").unwrap(),
        Arc::new(ValueMapper::<String>::new()),
        false,
    );
    tags.add("a", "1".into()).unwrap();
    assert_eq!(
        tags.add("a", "2".into()),
        Err(BindError::DuplicateKey("a".into()))
    );
}

#[test]
#[should_panic(expected = "does not allow updates")]
fn test_remote_update_on_append_only_collection_panics() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());

    let a = MappedCrdtMap::new(alice.get_map("tags").unwrap(), mapper.clone(), false);
    let b = MappedCrdtMap::new(bob.get_map("tags").unwrap(), mapper, false);

    // Concurrent adds of one key: whichever replica loses sees an overwrite
    a.add("k", "from alice".into()).unwrap();
    b.add("k", "from bob".into()).unwrap();
    sync(&alice, &bob);
}

#[test]
fn test_concurrent_same_key_add_converges() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());

    let a = MappedCrdtMap::new(alice.get_map("tags").unwrap(), mapper.clone(), true);
    let b = MappedCrdtMap::new(bob.get_map("tags").unwrap(), mapper, true);
    a.add("k", "from alice".into()).unwrap();
    b.add("k", "from bob".into()).unwrap();
    sync(&alice, &bob);

    assert_eq!(a.get("k"), b.get("k"));
    assert_eq!(a.to_json(), b.to_json());
}

#[test]
fn test_ordered_map_order_stability() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());

    let ours = MappedCrdtOrderedMap::new(alice.get_map("items").unwrap(), mapper.clone(), true);
    let theirs = MappedCrdtOrderedMap::new(bob.get_map("items").unwrap(), mapper, true);
    let reorders = Arc::new(Mutex::new(0));
    let sink = reorders.clone();
    let _sub = theirs.on_change(move |event| {
        if matches!(event, CollectionEvent::Reordered) {
            *sink.lock() += 1;
        }
    });

    for key in ["a", "b", "c"] {
        ours.add(key, key.to_uppercase()).unwrap();
    }
    sync(&alice, &bob);
    assert_eq!(theirs.keys(), vec!["a", "b", "c"]);

    assert!(ours.remove("b").unwrap());
    assert_eq!(ours.keys(), vec!["a", "c"]);
    sync(&alice, &bob);
    assert_eq!(theirs.keys(), vec!["a", "c"]);

    ours.set_order(&["c", "a"]).unwrap();
    assert_eq!(ours.keys(), vec!["c", "a"]);
    sync(&alice, &bob);
    assert_eq!(theirs.keys(), vec!["c", "a"]);
    assert_eq!(theirs.get_index("a"), Some(1));
    assert!(*reorders.lock() >= 1);
}

#[test]
fn test_ordered_map_concurrent_inserts_agree() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());

    let a = MappedCrdtOrderedMap::new(alice.get_map("items").unwrap(), mapper.clone(), true);
    let b = MappedCrdtOrderedMap::new(bob.get_map("items").unwrap(), mapper, true);
    a.add("from-alice", "A".into()).unwrap();
    b.add("from-bob", "B".into()).unwrap();
    sync(&alice, &bob);

    assert_eq!(a.len(), 2);
    assert_eq!(a.keys(), b.keys());
    // Both landed on index 0; the key breaks the tie
    assert_eq!(a.keys(), vec!["from-alice", "from-bob"]);
}

#[test]
fn test_mapped_list_follows_remote_changes() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());

    let theirs = CrdtMappedList::new(alice.get_list("palette").unwrap(), mapper.clone());
    let ours = CrdtMappedList::new(bob.get_list("palette").unwrap(), mapper);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = ours.on_change(move |event| sink.lock().push(event.clone()));

    theirs
        .set_all(vec!["red".into(), "green".into(), "blue".into()])
        .unwrap();
    sync(&alice, &bob);
    assert_eq!(ours.to_vec(), vec!["red", "green", "blue"]);

    theirs.remove(1).unwrap();
    sync(&alice, &bob);
    assert_eq!(ours.to_vec(), vec!["red", "blue"]);
    assert_eq!(
        events.lock().last(),
        Some(&SequenceEvent::Removed { index: 1, count: 1 })
    );
}

#[test]
fn test_concurrent_leaf_and_subtree_agree() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let theirs: CrdtObject<serde_json::Value> = CrdtObject::new(alice.get_map("shape").unwrap());
    let ours: CrdtObject<serde_json::Value> = CrdtObject::new(bob.get_map("shape").unwrap());

    theirs.update(|w| w.set("pos.x", 1)).unwrap();
    sync(&alice, &bob);

    // One side collapses the record to a leaf while the other adds a field
    theirs.update(|w| w.set("pos", 5)).unwrap();
    ours.update(|w| w.set("pos.y", 2)).unwrap();
    sync(&alice, &bob);

    for object in [&theirs, &ours] {
        assert_eq!(object.get("pos"), Some(Value::from_json(json!({"y": 2}))));
        assert_eq!(object.get("pos.y"), Some(Value::Int(2)));
        assert_eq!(
            object.get_clone_value(),
            Value::from_json(json!({"pos": {"y": 2}}))
        );
        assert_eq!(object.get_clone().unwrap(), json!({"pos": {"y": 2}}));
    }
}

#[test]
fn test_swapped_prop_only_hears_the_current_map() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let their_first: CrdtProp<String> = CrdtProp::new(alice.get_map("m1").unwrap(), "title");
    let their_second: CrdtProp<String> = CrdtProp::new(alice.get_map("m2").unwrap(), "title");

    let source = Watchable::new(bob.get_map("m1").unwrap());
    let title: CrdtProp<String> = CrdtProp::new(source.clone(), "title");
    let (count, bump) = counter();
    let _sub = title.on_remote_change(bump);
    source.set(bob.get_map("m2").unwrap());

    their_first.set(&"stale".to_string()).unwrap();
    sync(&alice, &bob);
    assert_eq!(*count.lock(), 0);

    their_second.set(&"fresh".to_string()).unwrap();
    sync(&alice, &bob);
    assert_eq!(*count.lock(), 1);
    assert_eq!(title.get().unwrap().as_deref(), Some("fresh"));
}

#[test]
fn test_swapped_mapped_map_only_hears_the_current_map() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let mapper = Arc::new(ValueMapper::<String>::new());
    let their_first = MappedCrdtMap::new(alice.get_map("m1").unwrap(), mapper.clone(), true);
    let their_second = MappedCrdtMap::new(alice.get_map("m2").unwrap(), mapper.clone(), true);

    let source = Watchable::new(bob.get_map("m1").unwrap());
    let ours = MappedCrdtMap::new(source.clone(), mapper, true);
    source.set(bob.get_map("m2").unwrap());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = ours.on_change(move |event| sink.lock().push(event.clone()));

    // Both maps change in the same remote transaction
    alice.transact_with(|| {
        their_first.add("old", "1".into()).unwrap();
        their_second.add("new", "2".into()).unwrap();
    });
    sync(&alice, &bob);

    assert_eq!(
        *events.lock(),
        vec![CollectionEvent::Added {
            key: "new".into(),
            value: "2".into()
        }]
    );
    assert!(!ours.has("old"));
}
