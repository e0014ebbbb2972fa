//! Update trees shaped like the remote store.
//!
//! A tree is made of two node kinds:
//! - [`Leaf`]: one payload (or a tombstone) at one location
//! - [`Branch`]: named children, one per next path segment
//!
//! Writes are inserted by path and coalesce under shared ancestors, so
//! `/a/b` and `/a/c` end up as two leaves of one branch at `/a`. A location
//! never holds a leaf and a branch at the same time.
//!
//! Trees are combined with [`Branch::merge`] (transactions, caller-chosen
//! conflict resolution) or [`Branch::apply`] (stores, incoming data replaces
//! existing data), and reduced to one atomic multi-path write with
//! [`Branch::flatten`].

mod flatten;
mod merge;
mod node;

pub use flatten::{expand, FlatUpdate};
pub use node::{check_depth, Branch, Leaf, Nearest, UpdateNode, DEFAULT_MAX_DEPTH};

/// Opaque, pre-serialized value stored at a leaf.
pub type Payload = serde_json::Value;
