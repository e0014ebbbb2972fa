//! Property tests for update-tree laws.

use canopy::{expand, Branch, Location, MergeStrategy, MirrorStore, Payload, Transaction, TreeError};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

type Writes = Vec<(Vec<String>, Option<Payload>)>;

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => prop::sample::select(vec!["a", "b", "c", "users", "42"]).prop_map(String::from),
        1 => "[a-z0-9.$ -]{1,5}",
    ]
}

fn payload() -> impl Strategy<Value = Option<Payload>> {
    prop_oneof![
        3 => any::<i64>().prop_map(|n| Some(json!(n))),
        1 => "[a-z]{0,6}".prop_map(|s| Some(json!(s))),
        1 => Just(None),
    ]
}

/// Write sets in which no location is an ancestor of another.
fn writes() -> impl Strategy<Value = Writes> {
    prop::collection::vec((prop::collection::vec(segment(), 1..5), payload()), 1..20).prop_map(
        |candidates| {
            let mut kept: Writes = Vec::new();
            for (path, payload) in candidates {
                let overlaps = kept
                    .iter()
                    .any(|(other, _)| path.starts_with(other) || other.starts_with(&path));
                if !overlaps {
                    kept.push((path, payload));
                }
            }
            kept
        },
    )
}

fn location(prefix: &str, path: &[String]) -> Location {
    Location::from_segments(std::iter::once(prefix.to_string()).chain(path.iter().cloned()))
}

fn leaf_map(tree: &Branch) -> BTreeMap<String, Option<Payload>> {
    tree.leaves()
        .into_iter()
        .map(|leaf| (leaf.location().path(), leaf.payload().cloned()))
        .collect()
}

fn transaction(prefix: &str, writes: &Writes) -> Transaction {
    let mut tx = Transaction::new(Arc::new(MirrorStore::new()));
    for (path, payload) in writes {
        match payload {
            Some(value) => tx.write(&location(prefix, path), value.clone()),
            None => tx.delete(&location(prefix, path)),
        }
    }
    tx
}

proptest! {
    #[test]
    fn rendered_location_parses_back(path in prop::collection::vec(segment(), 0..6)) {
        let location = Location::from_segments(path.clone());
        let parsed = Location::parse(&location.path());
        prop_assert_eq!(parsed.segments(), path.as_slice());
        prop_assert!(parsed.is_rooted());
    }

    #[test]
    fn separator_never_becomes_a_segment(
        left in "[a-z]{1,4}",
        right in "[a-z]{1,4}",
    ) {
        let joined = format!("{left}/{right}");
        let built = std::panic::catch_unwind(|| Location::root().child(joined.as_str()));
        prop_assert!(built.is_err());
        let expected = vec![left, right];
        let joined_location = Location::root().join(&joined);
        prop_assert_eq!(joined_location.segments(), expected.as_slice());
    }

    #[test]
    fn flatten_then_expand_restores_writes(writes in writes()) {
        let mut tx = transaction("root", &writes);

        let (target, update) = tx.tree().flatten();
        prop_assert_eq!(update.len(), writes.len());

        let rebuilt = expand(&target, &update).unwrap();
        prop_assert_eq!(leaf_map(&rebuilt), leaf_map(tx.tree()));

        let expected: BTreeMap<_, _> = writes
            .iter()
            .map(|(path, payload)| (location("root", path).path(), payload.clone()))
            .collect();
        prop_assert_eq!(leaf_map(&rebuilt), expected);
        tx.cancel();
    }

    #[test]
    fn value_and_descendant_are_exclusive(
        path in prop::collection::vec(segment(), 1..4),
        suffix in prop::collection::vec(segment(), 1..3),
    ) {
        let upper = location("root", &path);
        let lower = location("root", &[path.clone(), suffix].concat());

        let mut tree = Branch::new(Location::root());
        tree.insert(&upper, Some(json!(1))).unwrap();
        prop_assert_eq!(
            tree.insert(&lower, Some(json!(2))),
            Err(TreeError::InsertBelowValue(upper.clone()))
        );

        let mut tree = Branch::new(Location::root());
        tree.insert(&lower, Some(json!(2))).unwrap();
        prop_assert_eq!(
            tree.insert(&upper, Some(json!(1))),
            Err(TreeError::InsertAboveSubtree(upper.clone()))
        );
    }

    #[test]
    fn disjoint_merge_is_order_independent(left in writes(), right in writes()) {
        let mut ab = transaction("left", &left);
        ab.merge(transaction("right", &right), MergeStrategy::KeepExisting);

        let mut ba = transaction("right", &right);
        ba.merge(transaction("left", &left), MergeStrategy::TakeIncoming);

        let merged = leaf_map(ab.tree());
        prop_assert_eq!(&merged, &leaf_map(ba.tree()));
        prop_assert_eq!(merged.len(), left.len() + right.len());
        ab.cancel();
        ba.cancel();
    }
}
