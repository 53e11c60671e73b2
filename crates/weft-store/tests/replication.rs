//! Integration tests for the replicated backend.
//!
//! Tests cover:
//! - Remote events framed by before/after, no local echo
//! - Transactions commit as one update
//! - Convergence of concurrent map and list writes
//! - Nested collections travelling with their content
//! - Backends agreeing on the same script

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use weft_store::{
    CrdtMap, CrdtRoot, Entry, ListEvent, MapEvent, MapExt, NoopRoot, ReplicatedDoc, StoreError,
    TransactExt, Value,
};

/// Deliver everything each replica has that the other lacks.
fn sync(a: &ReplicatedDoc, b: &ReplicatedDoc) {
    b.apply_update(&a.encode_diff(&b.state_vector()).unwrap())
        .unwrap();
    a.apply_update(&b.encode_diff(&a.state_vector()).unwrap())
        .unwrap();
}

fn record_map(map: &dyn CrdtMap) -> (Arc<Mutex<Vec<String>>>, weft_store::Subscription) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let sub = map.subscribe(Box::new(move |event: &MapEvent| {
        let line = match event {
            MapEvent::RemoteBeforeTransaction => "before".to_string(),
            MapEvent::RemoteInsert { key, .. } => format!("insert:{}", key),
            MapEvent::RemoteUpdate { key, .. } => format!("update:{}", key),
            MapEvent::RemoteDelete { key } => format!("delete:{}", key),
            MapEvent::RemoteAfterTransaction => "after".to_string(),
        };
        sink.lock().push(line);
    }));
    (log, sub)
}

#[test]
fn test_remote_events_are_framed_and_not_echoed() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");

    let alice_map = alice.get_map("settings").unwrap();
    let bob_map = bob.get_map("settings").unwrap();
    let (alice_log, _a) = record_map(alice_map.as_ref());
    let (bob_log, _b) = record_map(bob_map.as_ref());

    alice_map.transact_with(|| {
        alice_map.set_value("theme", "dark").unwrap();
        alice_map.set_value("zoom", 2).unwrap();
        alice_map.set_value("grid", true).unwrap();
    });
    sync(&alice, &bob);

    assert!(alice_log.lock().is_empty());
    assert_eq!(
        *bob_log.lock(),
        vec!["before", "insert:grid", "insert:theme", "insert:zoom", "after"]
    );

    // Both edits arrive in one diff, hence one remote transaction
    bob_log.lock().clear();
    alice_map.set_value("zoom", 3).unwrap();
    alice_map.delete("grid");
    sync(&alice, &bob);
    assert_eq!(
        *bob_log.lock(),
        vec!["before", "delete:grid", "update:zoom", "after"]
    );
    assert_eq!(bob_map.get_value("zoom"), Some(Value::Int(3)));
}

#[test]
fn test_transaction_commits_one_update() {
    let doc = ReplicatedDoc::new("alice");
    let map = doc.get_map("m").unwrap();
    let list = doc.get_list("l").unwrap();

    let updates: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let _sub = doc.on_update(move |u| sink.lock().push(u.to_vec()));
    doc.transact_with(|| {
        map.set_value("a", 1).unwrap();
        // Nested transaction folds into the outer one
        map.transact_with(|| map.set_value("b", 2).unwrap());
        list.push(Entry::Value(Value::from("x"))).unwrap();
    });

    let updates = updates.lock();
    assert_eq!(updates.len(), 1);

    let bob = ReplicatedDoc::new("bob");
    bob.apply_update(&updates[0]).unwrap();
    assert_eq!(bob.get_map("m").unwrap().to_json(), json!({"a": 1, "b": 2}));
    assert_eq!(bob.get_list("l").unwrap().to_json(), json!(["x"]));
}

#[test]
fn test_transaction_closes_on_panic() {
    let doc = ReplicatedDoc::new("alice");
    let map = doc.get_map("m").unwrap();
    let committed = Arc::new(Mutex::new(0usize));
    let counter = committed.clone();
    let _sub = doc.on_update(move |_| *counter.lock() += 1);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        map.transact_with(|| {
            map.set_value("a", 1).unwrap();
            panic!("boom");
        })
    }));
    assert!(result.is_err());

    // The aborted level was closed, so later writes still commit on their own
    map.set_value("b", 2).unwrap();
    assert_eq!(*committed.lock(), 2);
}

#[test]
fn test_concurrent_map_writes_converge() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let a = alice.get_map("m").unwrap();
    let b = bob.get_map("m").unwrap();

    a.set_value("color", "red").unwrap();
    b.set_value("color", "blue").unwrap();
    a.set_value("only_alice", 1).unwrap();
    b.delete("missing");
    sync(&alice, &bob);

    // Either write may win, but both replicas pick the same one
    let winner = a.get_value("color");
    assert!(winner == Some(Value::from("red")) || winner == Some(Value::from("blue")));
    assert_eq!(b.get_value("color"), winner);
    assert_eq!(a.to_json(), b.to_json());
}

#[test]
fn test_concurrent_list_inserts_converge() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let a = alice.get_list("l").unwrap();
    let b = bob.get_list("l").unwrap();

    a.push(Entry::Value(Value::from("a1"))).unwrap();
    sync(&alice, &bob);

    a.push(Entry::Value(Value::from("a2"))).unwrap();
    b.insert(0, vec![Entry::Value(Value::from("b0"))]).unwrap();
    b.push(Entry::Value(Value::from("b2"))).unwrap();
    sync(&alice, &bob);

    assert_eq!(a.to_json(), b.to_json());
    assert_eq!(a.len(), 4);
    assert_eq!(a.get(0), Some(Entry::Value(Value::from("b0"))));
    assert_eq!(a.get(1), Some(Entry::Value(Value::from("a1"))));
}

#[test]
fn test_list_events_fold_runs() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let a = alice.get_list("l").unwrap();
    let b = bob.get_list("l").unwrap();

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let _sub = b.subscribe(Box::new(move |event: &ListEvent| {
        let line = match event {
            ListEvent::RemoteBeforeTransaction => "before".to_string(),
            ListEvent::RemoteInsert { index, entries } => {
                format!("insert:{}+{}", index, entries.len())
            }
            ListEvent::RemoteDelete { index, count } => format!("delete:{}+{}", index, count),
            ListEvent::RemoteAfterTransaction => "after".to_string(),
        };
        sink.lock().push(line);
    }));

    a.insert(
        0,
        vec![
            Entry::Value(Value::Int(1)),
            Entry::Value(Value::Int(2)),
            Entry::Value(Value::Int(3)),
        ],
    )
    .unwrap();
    sync(&alice, &bob);
    a.delete(0, 2).unwrap();
    sync(&alice, &bob);

    assert_eq!(
        *log.lock(),
        vec!["before", "insert:0+3", "after", "before", "delete:0+2", "after"]
    );
    assert_eq!(b.to_json(), json!([3]));
}

#[test]
fn test_nested_collections_replicate_with_content() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let root = alice.get_map("stories").unwrap();

    let factory = alice.factory();
    let steps = factory
        .make_list(vec![Entry::Value(Value::from("open")), Entry::Value(Value::from("close"))])
        .unwrap();
    let story = factory
        .make_map(vec![
            ("name".to_string(), Entry::Value(Value::from("Login"))),
            ("steps".to_string(), Entry::List(steps.clone())),
        ])
        .unwrap();
    root.set("s1", Entry::Map(story.clone())).unwrap();

    // Mutations through handles taken before attaching keep working
    steps.push(Entry::Value(Value::from("logout"))).unwrap();
    story.set_value("name", "Sign in").unwrap();

    sync(&alice, &bob);
    let expected = json!({"s1": {"name": "Sign in", "steps": ["open", "close", "logout"]}});
    assert_eq!(bob.get_map("stories").unwrap().to_json(), expected);
    assert_eq!(root.to_json(), expected);
}

#[test]
fn test_attach_rules() {
    let doc = ReplicatedDoc::new("alice");
    let other = ReplicatedDoc::new("bob");
    let root = doc.get_map("m").unwrap();

    let child = doc.factory().make_map(Vec::new()).unwrap();
    root.set("a", Entry::Map(child.clone())).unwrap();
    assert!(matches!(
        root.set("b", Entry::Map(child)),
        Err(StoreError::AlreadyAttached(_))
    ));

    let foreign = other.factory().make_map(Vec::new()).unwrap();
    assert!(matches!(
        root.set("c", Entry::Map(foreign)),
        Err(StoreError::ForeignCollection(_))
    ));

    let noop_child = NoopRoot::new().factory().make_list(Vec::new()).unwrap();
    assert!(matches!(
        root.set("d", Entry::List(noop_child)),
        Err(StoreError::ForeignCollection(_))
    ));
}

#[test]
fn test_kind_mismatch_and_clear() {
    let doc = ReplicatedDoc::new("alice");
    doc.get_list("palette").unwrap();
    assert!(matches!(
        doc.get_map("palette"),
        Err(StoreError::KindMismatch { .. })
    ));

    assert!(!doc.has_data());
    doc.get_list("palette")
        .unwrap()
        .push(Entry::Value(Value::from("#fff")))
        .unwrap();
    doc.get_map("tags").unwrap().set_value("a", true).unwrap();
    assert!(doc.has_data());

    let bob = ReplicatedDoc::new("bob");
    sync(&doc, &bob);
    assert!(bob.has_data());

    doc.clear();
    sync(&doc, &bob);
    assert!(!doc.has_data());
    assert!(!bob.has_data());
}

#[test]
fn test_encoded_updates_and_duplicates() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let map = alice.get_map("m").unwrap();
    map.set_value("k", "v").unwrap();
    map.delete("gone");

    let bytes = alice.encode_state_as_update();
    assert!(bob.apply_update(&bytes).unwrap());
    assert!(!bob.apply_update(&bytes).unwrap());
    assert!(matches!(
        bob.apply_update(&[0xff, 0xff, 0xff]),
        Err(StoreError::Decode(_))
    ));
    assert_eq!(bob.get_map("m").unwrap().get_value("k"), Some(Value::from("v")));

    // A diff against an up-to-date vector carries nothing new
    let nothing = alice.encode_diff(&bob.state_vector()).unwrap();
    assert!(!bob.apply_update(&nothing).unwrap());
}

#[test]
fn test_remote_deletes_reach_listeners_once() {
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");
    let a = alice.get_map("m").unwrap();
    a.set_value("x", 1).unwrap();
    sync(&alice, &bob);

    let b = bob.get_map("m").unwrap();
    let (log, _sub) = record_map(b.as_ref());
    a.delete("x");
    let delete = alice.encode_diff(&bob.state_vector()).unwrap();
    bob.apply_update(&delete).unwrap();
    bob.apply_update(&delete).unwrap();

    assert_eq!(*log.lock(), vec!["before", "delete:x", "after"]);
    assert!(!b.has("x"));
}

/// Run the same script against any root.
fn script(root: &dyn CrdtRoot) -> serde_json::Value {
    let tags = root.get_map("tags").unwrap();
    let palette = root.get_list("palette").unwrap();
    root.transact_with(|| {
        tags.set_value("urgent", Value::Absent).unwrap();
        tags.set_value("draft", Value::Absent).unwrap();
        palette
            .insert(
                0,
                vec![Entry::Value("#000".into()), Entry::Value("#fff".into())],
            )
            .unwrap();
    });
    tags.delete("draft");
    palette.insert(1, vec![Entry::Value("#f00".into())]).unwrap();
    let nested = root.factory().make_map(Vec::new()).unwrap();
    nested.set_value("depth", 1).unwrap();
    tags.set("meta", Entry::Map(nested)).unwrap();
    root.to_json()
}

#[test]
fn test_backends_agree() {
    let noop = NoopRoot::new();
    let alice = ReplicatedDoc::new("alice");
    let bob = ReplicatedDoc::new("bob");

    let expected = script(&noop);
    assert_eq!(script(&alice), expected);
    sync(&alice, &bob);
    assert_eq!(bob.to_json(), expected);
    assert_eq!(
        expected,
        json!({
            "palette": ["#000", "#f00", "#fff"],
            "tags": {"meta": {"depth": 1}, "urgent": null}
        })
    );
}
