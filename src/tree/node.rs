//! Node types, insertion and lookup.

use super::Payload;
use crate::error::TreeError;
use crate::location::{is_valid_segment, Location};
use std::fmt;

/// Default bound on location depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Fail if `location` is deeper than `max_depth` segments.
pub fn check_depth(location: &Location, max_depth: usize) -> Result<(), TreeError> {
    if location.depth() > max_depth {
        return Err(TreeError::DepthExceeded {
            location: location.clone(),
            max: max_depth,
        });
    }
    Ok(())
}

/// A single value (or tombstone) at one location.
#[derive(Clone, Debug, PartialEq)]
pub struct Leaf {
    location: Location,
    payload: Option<Payload>,
}

impl Leaf {
    pub fn new(location: Location, payload: Option<Payload>) -> Self {
        Self { location, payload }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The stored value; `None` marks a delete.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    pub fn set_payload(&mut self, payload: Option<Payload>) {
        self.payload = payload;
    }

    pub fn into_payload(self) -> Option<Payload> {
        self.payload
    }
}

/// Named children under one location, in insertion order.
#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    location: Location,
    pub(super) children: Vec<UpdateNode>,
}

/// A node of an update tree.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateNode {
    Leaf(Leaf),
    Branch(Branch),
}

impl UpdateNode {
    pub fn location(&self) -> &Location {
        match self {
            UpdateNode::Leaf(leaf) => &leaf.location,
            UpdateNode::Branch(branch) => &branch.location,
        }
    }

    /// Last segment of the node's location.
    pub fn key(&self) -> &str {
        self.location().last().unwrap_or_default()
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, UpdateNode::Branch(_))
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            UpdateNode::Leaf(leaf) => Some(leaf),
            UpdateNode::Branch(_) => None,
        }
    }

    pub fn as_branch(&self) -> Option<&Branch> {
        match self {
            UpdateNode::Branch(branch) => Some(branch),
            UpdateNode::Leaf(_) => None,
        }
    }

    /// A tombstone leaf or a branch without children.
    pub fn is_empty(&self) -> bool {
        match self {
            UpdateNode::Leaf(leaf) => leaf.is_tombstone(),
            UpdateNode::Branch(branch) => branch.is_empty(),
        }
    }

    /// Materialize the node as one JSON value.
    pub fn to_value(&self) -> Option<Payload> {
        match self {
            UpdateNode::Leaf(leaf) => leaf.payload.clone(),
            UpdateNode::Branch(branch) => branch.to_value(),
        }
    }

    /// Copy of the node with all tombstones (and branches left empty by
    /// removing them) stripped, `None` if nothing remains.
    pub(crate) fn without_tombstones(self) -> Option<UpdateNode> {
        match self {
            UpdateNode::Leaf(leaf) if leaf.is_tombstone() => None,
            UpdateNode::Leaf(leaf) => Some(UpdateNode::Leaf(leaf)),
            UpdateNode::Branch(mut branch) => {
                branch.children = branch
                    .children
                    .into_iter()
                    .filter_map(UpdateNode::without_tombstones)
                    .collect();
                if branch.children.is_empty() {
                    None
                } else {
                    Some(UpdateNode::Branch(branch))
                }
            }
        }
    }
}

/// Result of [`Branch::nearest_child`].
#[derive(Debug, Clone, Copy)]
pub enum Nearest<'a> {
    Branch(&'a Branch),
    Leaf(&'a Leaf),
}

impl<'a> Nearest<'a> {
    pub fn location(&self) -> &'a Location {
        match self {
            Nearest::Branch(branch) => branch.location(),
            Nearest::Leaf(leaf) => leaf.location(),
        }
    }
}

impl Branch {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            children: Vec::new(),
        }
    }

    /// Branch holding the fields of a JSON object as leaves.
    ///
    /// `None` for non-objects and for objects with a key that is not a
    /// valid location segment, since such a field has no location.
    pub fn from_value(location: Location, value: &Payload) -> Option<Self> {
        let fields = value.as_object()?;
        if !fields.keys().all(|key| is_valid_segment(key)) {
            return None;
        }
        let mut branch = Branch::new(location);
        for (key, field) in fields {
            let child = branch.location.child(key.as_str());
            branch
                .children
                .push(UpdateNode::Leaf(Leaf::new(child, Some(field.clone()))));
        }
        Some(branch)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn children(&self) -> &[UpdateNode] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    /// Direct child keyed by `segment`.
    pub fn child(&self, segment: &str) -> Option<&UpdateNode> {
        self.children.iter().find(|c| c.key() == segment)
    }

    pub(super) fn position(&self, segment: &str) -> Option<usize> {
        self.children.iter().position(|c| c.key() == segment)
    }

    /// Insert a value (or a tombstone) at `location`.
    ///
    /// Missing intermediate branches are created. Writing the same location
    /// twice keeps the last payload. Writing at a location that already has
    /// descendants, or below a location holding a value, is an error.
    pub fn insert(&mut self, location: &Location, payload: Option<Payload>) -> Result<(), TreeError> {
        let rest = match location.segments_after(&self.location) {
            Some(rest) => rest,
            None if *location == self.location => {
                return Err(TreeError::InsertAboveSubtree(location.clone()))
            }
            None => {
                return Err(TreeError::UnrelatedLocation {
                    location: location.clone(),
                    ancestor: self.location.clone(),
                })
            }
        };

        let last = rest.len() - 1;
        let mut current = self;
        for (i, segment) in rest.iter().enumerate() {
            let is_target = i == last;
            let node = current;
            let index = match node.position(segment) {
                Some(index) => index,
                None => {
                    let child_location = node.location.child(segment.as_str());
                    if is_target {
                        node.children
                            .push(UpdateNode::Leaf(Leaf::new(child_location, payload)));
                        return Ok(());
                    }
                    node.children
                        .push(UpdateNode::Branch(Branch::new(child_location)));
                    node.children.len() - 1
                }
            };

            match &mut node.children[index] {
                UpdateNode::Branch(branch) => {
                    if is_target {
                        return Err(TreeError::InsertAboveSubtree(location.clone()));
                    }
                    current = branch;
                }
                UpdateNode::Leaf(leaf) => {
                    if !is_target {
                        return Err(TreeError::InsertBelowValue(leaf.location.clone()));
                    }
                    tracing::trace!(%location, "replaced earlier value");
                    leaf.payload = payload;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Node reached by following `path` from this branch.
    pub fn child_by_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&UpdateNode> {
        let (first, rest) = path.split_first()?;
        let child = self.child(first.as_ref())?;
        if rest.is_empty() {
            return Some(child);
        }
        match child {
            UpdateNode::Branch(branch) => branch.child_by_path(rest),
            UpdateNode::Leaf(_) => None,
        }
    }

    /// Node stored at `location`, which must lie below this branch.
    pub fn child_by_location(&self, location: &Location) -> Option<&UpdateNode> {
        self.child_by_path(location.segments_after(&self.location)?)
    }

    /// Most specific existing node along `path`, with the segments that could
    /// not be followed.
    pub fn nearest_child<'a, 'p, S: AsRef<str>>(&'a self, path: &'p [S]) -> (Nearest<'a>, &'p [S]) {
        let Some((first, rest)) = path.split_first() else {
            return (Nearest::Branch(self), path);
        };
        match self.child(first.as_ref()) {
            None => (Nearest::Branch(self), path),
            Some(UpdateNode::Branch(branch)) => branch.nearest_child(rest),
            Some(UpdateNode::Leaf(leaf)) => (Nearest::Leaf(leaf), rest),
        }
    }

    /// Every leaf below this branch, depth first in insertion order.
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        for child in &self.children {
            match child {
                UpdateNode::Leaf(leaf) => out.push(leaf),
                UpdateNode::Branch(branch) => branch.collect_leaves(out),
            }
        }
    }

    /// JSON object built from the children, `None` if nothing has a value.
    pub fn to_value(&self) -> Option<Payload> {
        let fields: serde_json::Map<String, Payload> = self
            .children
            .iter()
            .filter_map(|child| child.to_value().map(|v| (child.key().to_string(), v)))
            .collect();
        if fields.is_empty() {
            None
        } else {
            Some(Payload::Object(fields))
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for leaf in self.leaves() {
            let path = leaf
                .location
                .relative_path(&self.location)
                .unwrap_or_default();
            let rendered = match &leaf.payload {
                Some(value) => value.to_string(),
                None => "<delete>".to_string(),
            };
            map.entry(&path, &format_args!("{rendered}"));
        }
        map.finish()
    }
}
