//! Property: concurrent edits converge whatever order replicas hear them in.

use proptest::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use weft_store::{CrdtRoot, Entry, MapExt, ReplicatedDoc, Value};

#[derive(Clone, Debug)]
enum Op {
    Set(u8, i64),
    Delete(u8),
    Insert(usize, i64),
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, any::<i64>()).prop_map(|(k, v)| Op::Set(k, v)),
        (0u8..4).prop_map(Op::Delete),
        (0usize..8, any::<i64>()).prop_map(|(p, v)| Op::Insert(p, v)),
        (0usize..8).prop_map(Op::Remove),
    ]
}

/// Apply `ops` locally and return the updates they committed.
fn edit(doc: &ReplicatedDoc, ops: &[Op]) -> Vec<Vec<u8>> {
    let committed: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = committed.clone();
    let _sub = doc.on_update(move |update| sink.lock().push(update.to_vec()));

    let map = doc.get_map("m").unwrap();
    let list = doc.get_list("l").unwrap();
    for op in ops {
        match op {
            Op::Set(k, v) => map.set_value(&format!("k{}", k), *v).unwrap(),
            Op::Delete(k) => {
                map.delete(&format!("k{}", k));
            }
            Op::Insert(p, v) => {
                let at = p % (list.len() + 1);
                list.insert(at, vec![Entry::Value(Value::Int(*v))]).unwrap();
            }
            Op::Remove(p) => {
                if !list.is_empty() {
                    list.delete(p % list.len(), 1).unwrap();
                }
            }
        }
    }
    let updates = committed.lock().clone();
    updates
}

fn snapshot(doc: &ReplicatedDoc) -> (serde_json::Value, serde_json::Value) {
    (
        doc.get_map("m").unwrap().to_json(),
        doc.get_list("l").unwrap().to_json(),
    )
}

fn replay(doc: &ReplicatedDoc, first: &[Vec<u8>], second: &[Vec<u8>]) {
    for update in first.iter().chain(second) {
        doc.apply_update(update).unwrap();
    }
}

proptest! {
    #[test]
    fn prop_delivery_order_does_not_matter(
        ours in prop::collection::vec(op(), 0..12),
        theirs in prop::collection::vec(op(), 0..12),
    ) {
        let alice = ReplicatedDoc::new("alice");
        let bob = ReplicatedDoc::new("bob");
        let from_alice = edit(&alice, &ours);
        let from_bob = edit(&bob, &theirs);

        let left = ReplicatedDoc::new("carol");
        let right = ReplicatedDoc::new("dave");
        replay(&left, &from_alice, &from_bob);
        replay(&right, &from_bob, &from_alice);
        replay(&alice, &from_bob, &[]);
        replay(&bob, &from_alice, &[]);

        let expected = snapshot(&alice);
        prop_assert_eq!(&snapshot(&bob), &expected);
        prop_assert_eq!(&snapshot(&left), &expected);
        prop_assert_eq!(&snapshot(&right), &expected);
    }
}
