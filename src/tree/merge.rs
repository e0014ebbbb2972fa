//! Combining two trees rooted at the same location.

use super::node::{Branch, Leaf, UpdateNode};
use super::Payload;
use crate::error::TreeError;
use crate::location::Location;

impl Branch {
    /// Merge `other` into this branch.
    ///
    /// Children missing here are appended as-is. Where both trees hold a leaf,
    /// `resolver(existing, incoming)` picks the payload that stays. A leaf
    /// facing a branch is a [`TreeError::KindMismatch`]; the check runs before
    /// anything is modified.
    pub fn merge<R>(&mut self, other: Branch, resolver: R) -> Result<(), TreeError>
    where
        R: FnMut(&Leaf, &Leaf) -> Option<Payload>,
    {
        self.merge_with(other, resolver, |_, _| {})
    }

    /// [`merge`](Self::merge) that also reports every appended subtree to
    /// `on_append(parent, child)`.
    pub fn merge_with<R, A>(
        &mut self,
        other: Branch,
        mut resolver: R,
        mut on_append: A,
    ) -> Result<(), TreeError>
    where
        R: FnMut(&Leaf, &Leaf) -> Option<Payload>,
        A: FnMut(&Location, &UpdateNode),
    {
        self.ensure_same_location(&other)?;
        self.check_mergeable(&other)?;
        self.merge_children(other, &mut resolver, &mut on_append);
        Ok(())
    }

    /// Overlay `other` onto this branch the way a store applies writes.
    ///
    /// Incoming data always wins: an incoming leaf replaces whatever is
    /// stored (a tombstone removes it), an incoming branch is merged into a
    /// stored branch, and replaces a stored scalar. A stored JSON object is
    /// first expanded into a branch so its other fields survive, unless one
    /// of its keys is not a valid segment; then it is replaced like a scalar.
    /// Branches emptied by deletes are removed.
    ///
    /// `on_replace(existing, incoming)` fires for every stored node that is
    /// overwritten, and for every pruned branch with an empty branch as
    /// `incoming`. `on_append(parent, child)` fires for every new subtree.
    pub fn apply<R, A>(&mut self, other: Branch, mut on_replace: R, mut on_append: A) -> Result<(), TreeError>
    where
        R: FnMut(&UpdateNode, &UpdateNode),
        A: FnMut(&Location, &UpdateNode),
    {
        self.ensure_same_location(&other)?;
        self.apply_children(other, &mut on_replace, &mut on_append);
        Ok(())
    }

    fn ensure_same_location(&self, other: &Branch) -> Result<(), TreeError> {
        if other.location() != self.location() {
            return Err(TreeError::UnrelatedLocation {
                location: other.location().clone(),
                ancestor: self.location().clone(),
            });
        }
        Ok(())
    }

    fn check_mergeable(&self, other: &Branch) -> Result<(), TreeError> {
        for incoming in other.children() {
            match (self.child(incoming.key()), incoming) {
                (None, _) => {}
                (Some(UpdateNode::Branch(existing)), UpdateNode::Branch(incoming)) => {
                    existing.check_mergeable(incoming)?
                }
                (Some(UpdateNode::Leaf(_)), UpdateNode::Leaf(_)) => {}
                (Some(existing), _) => {
                    return Err(TreeError::KindMismatch(existing.location().clone()))
                }
            }
        }
        Ok(())
    }

    fn merge_children<R, A>(&mut self, other: Branch, resolver: &mut R, on_append: &mut A)
    where
        R: FnMut(&Leaf, &Leaf) -> Option<Payload>,
        A: FnMut(&Location, &UpdateNode),
    {
        for incoming in other.children {
            let Some(index) = self.position(incoming.key()) else {
                on_append(self.location(), &incoming);
                self.children.push(incoming);
                continue;
            };
            match (&mut self.children[index], incoming) {
                (UpdateNode::Branch(existing), UpdateNode::Branch(incoming)) => {
                    existing.merge_children(incoming, resolver, on_append)
                }
                (UpdateNode::Leaf(existing), UpdateNode::Leaf(incoming)) => {
                    let winner = resolver(existing, &incoming);
                    existing.set_payload(winner);
                }
                _ => unreachable!("node kinds are checked before merging"),
            }
        }
    }

    fn apply_children<R, A>(&mut self, other: Branch, on_replace: &mut R, on_append: &mut A)
    where
        R: FnMut(&UpdateNode, &UpdateNode),
        A: FnMut(&Location, &UpdateNode),
    {
        for incoming in other.children {
            let Some(index) = self.position(incoming.key()) else {
                if let Some(incoming) = incoming.without_tombstones() {
                    on_append(self.location(), &incoming);
                    self.children.push(incoming);
                }
                continue;
            };

            let incoming = match incoming {
                UpdateNode::Leaf(leaf) => {
                    let incoming = UpdateNode::Leaf(leaf);
                    on_replace(&self.children[index], &incoming);
                    if incoming.is_empty() {
                        self.children.remove(index);
                    } else {
                        self.children[index] = incoming;
                    }
                    continue;
                }
                UpdateNode::Branch(branch) => branch,
            };

            if let UpdateNode::Leaf(stored) = &self.children[index] {
                let promoted = stored
                    .payload()
                    .and_then(|value| Branch::from_value(stored.location().clone(), value));
                match promoted {
                    Some(promoted) => {
                        self.children[index] = UpdateNode::Branch(promoted);
                    }
                    None => {
                        if let Some(replacement) = UpdateNode::Branch(incoming).without_tombstones() {
                            on_replace(&self.children[index], &replacement);
                            self.children[index] = replacement;
                        }
                        continue;
                    }
                }
            }

            if let UpdateNode::Branch(existing) = &mut self.children[index] {
                existing.apply_children(incoming, on_replace, on_append);
                if existing.is_empty() {
                    let pruned = self.children.remove(index);
                    let emptied = UpdateNode::Branch(Branch::new(pruned.location().clone()));
                    on_replace(&pruned, &emptied);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loc(path: &str) -> Location {
        Location::parse(path)
    }

    fn tree(writes: &[(&str, Option<Payload>)]) -> Branch {
        let mut root = Branch::new(Location::root());
        for (path, payload) in writes {
            root.insert(&loc(path), payload.clone()).unwrap();
        }
        root
    }

    fn payload_at(root: &Branch, path: &str) -> Option<Payload> {
        root.child_by_location(&loc(path))
            .and_then(UpdateNode::as_leaf)
            .and_then(|leaf| leaf.payload().cloned())
    }

    #[test]
    fn test_merge_disjoint_is_union() {
        let mut left = tree(&[("/a/x", Some(json!(1)))]);
        let right = tree(&[("/a/y", Some(json!(2))), ("/b", Some(json!(3)))]);

        let mut appended = Vec::new();
        left.merge_with(
            right,
            |_, _| panic!("no conflicts expected"),
            |parent, child| appended.push((parent.clone(), child.location().clone())),
        )
        .unwrap();

        assert_eq!(payload_at(&left, "/a/x"), Some(json!(1)));
        assert_eq!(payload_at(&left, "/a/y"), Some(json!(2)));
        assert_eq!(payload_at(&left, "/b"), Some(json!(3)));
        assert_eq!(
            appended,
            vec![(loc("/a"), loc("/a/y")), (Location::root(), loc("/b"))]
        );
    }

    #[test]
    fn test_merge_conflict_uses_resolver() {
        let mut left = tree(&[("/a", Some(json!("old")))]);
        let right = tree(&[("/a", Some(json!("new")))]);

        let mut calls = 0;
        left.merge(right, |existing, incoming| {
            calls += 1;
            assert_eq!(existing.payload(), Some(&json!("old")));
            assert_eq!(incoming.payload(), Some(&json!("new")));
            Some(json!("resolved"))
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(payload_at(&left, "/a"), Some(json!("resolved")));
    }

    #[test]
    fn test_merge_kind_mismatch_leaves_tree_untouched() {
        let mut left = tree(&[("/a/b", Some(json!(1))), ("/z", Some(json!(0)))]);
        let right = tree(&[("/a", Some(json!(2))), ("/y", Some(json!(9)))]);
        let before = left.clone();

        let err = left.merge(right, |_, incoming| incoming.payload().cloned());
        assert_eq!(err, Err(TreeError::KindMismatch(loc("/a"))));
        assert_eq!(left, before);
    }

    #[test]
    fn test_apply_replaces_and_deletes() {
        let mut stored = tree(&[
            ("/users/1/name", Some(json!("Ann"))),
            ("/users/2/name", Some(json!("Bob"))),
            ("/flag", Some(json!(true))),
        ]);
        let incoming = tree(&[
            ("/users/1/name", Some(json!("Anne"))),
            ("/users/2", None),
            ("/flag", Some(json!({"on": true}))),
            ("/ghost", None),
        ]);

        let mut replaced = Vec::new();
        stored
            .apply(
                incoming,
                |existing, _| replaced.push(existing.location().clone()),
                |_, _| panic!("nothing new"),
            )
            .unwrap();

        assert_eq!(payload_at(&stored, "/users/1/name"), Some(json!("Anne")));
        assert!(stored.child_by_location(&loc("/users/2")).is_none());
        assert_eq!(payload_at(&stored, "/flag"), Some(json!({"on": true})));
        assert!(stored.child("ghost").is_none());
        assert_eq!(replaced, vec![loc("/users/1/name"), loc("/users/2"), loc("/flag")]);
    }

    #[test]
    fn test_apply_expands_stored_object() {
        let mut stored = tree(&[("/users/42", Some(json!({"name": "Ann"})))]);
        let incoming = tree(&[("/users/42/age", Some(json!(30)))]);

        stored.apply(incoming, |_, _| {}, |_, _| {}).unwrap();

        assert_eq!(payload_at(&stored, "/users/42/name"), Some(json!("Ann")));
        assert_eq!(payload_at(&stored, "/users/42/age"), Some(json!(30)));
    }

    #[test]
    fn test_apply_prunes_emptied_branches() {
        let mut stored = tree(&[("/a/b/c", Some(json!(1))), ("/keep", Some(json!(2)))]);
        let incoming = tree(&[("/a/b/c", None)]);

        let mut replaced = Vec::new();
        stored
            .apply(
                incoming,
                |existing, incoming| {
                    replaced.push((existing.location().clone(), incoming.is_empty()))
                },
                |_, _| {},
            )
            .unwrap();

        assert!(stored.child("a").is_none());
        assert_eq!(stored.len(), 1);
        // Innermost first: the deleted leaf, then each branch it emptied
        assert_eq!(
            replaced,
            vec![(loc("/a/b/c"), true), (loc("/a/b"), true), (loc("/a"), true)]
        );
    }

    #[test]
    fn test_apply_keeps_partially_emptied_branch() {
        let mut stored = tree(&[("/a/x", Some(json!(1))), ("/a/y", Some(json!(2)))]);
        let incoming = tree(&[("/a/x", None)]);

        let mut replaced = Vec::new();
        stored
            .apply(incoming, |existing, _| replaced.push(existing.location().clone()), |_, _| {})
            .unwrap();

        assert_eq!(payload_at(&stored, "/a/y"), Some(json!(2)));
        assert_eq!(replaced, vec![loc("/a/x")]);
    }

    #[test]
    fn test_apply_replaces_object_with_unaddressable_keys() {
        let mut stored = tree(&[("/cfg", Some(json!({"a/b": 1, "ok": 2})))]);
        let incoming = tree(&[("/cfg/ok", Some(json!(3)))]);

        stored.apply(incoming, |_, _| {}, |_, _| {}).unwrap();

        assert_eq!(payload_at(&stored, "/cfg/ok"), Some(json!(3)));
        assert!(stored.child_by_location(&loc("/cfg")).and_then(UpdateNode::as_branch).is_some_and(|b| b.len() == 1));
    }
}
