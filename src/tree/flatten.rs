//! Reducing a tree to one multi-path write and back.

use super::node::{Branch, UpdateNode};
use super::Payload;
use crate::error::TreeError;
use crate::location::Location;
use std::collections::BTreeMap;

/// Relative path → payload; `None` deletes the value at that path.
pub type FlatUpdate = BTreeMap<String, Option<Payload>>;

impl Branch {
    /// Deepest branch reachable through single-branch chains.
    ///
    /// Writes under `/a/b/c` and `/a/b/d` share `/a/b`, which is where the
    /// physical write should be addressed.
    pub fn nearest_compound(&self) -> &Branch {
        let mut nearest = self;
        while let [UpdateNode::Branch(next)] = nearest.children.as_slice() {
            nearest = next;
        }
        nearest
    }

    /// Flatten into the target location and its relative-path map.
    pub fn flatten(&self) -> (Location, FlatUpdate) {
        let target = self.nearest_compound();
        let update = target
            .leaves()
            .into_iter()
            .map(|leaf| {
                let path = leaf
                    .location()
                    .relative_path(target.location())
                    .unwrap_or_default();
                (path, leaf.payload().cloned())
            })
            .collect();
        (target.location().clone(), update)
    }
}

/// Rebuild a root-anchored tree from a flattened update addressed at `root`.
///
/// Paths that overlap (`"a"` and `"a/b"`) are rejected the same way the
/// insertion rules reject them.
pub fn expand(root: &Location, update: &FlatUpdate) -> Result<Branch, TreeError> {
    let mut tree = Branch::new(Location::root());
    for (path, payload) in update {
        tree.insert(&root.join(path), payload.clone())?;
    }
    Ok(tree)
}
