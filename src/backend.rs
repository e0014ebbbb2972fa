//! The capability a transaction commits against.
//!
//! Implemented by [`MirrorStore`](crate::MirrorStore) for tests and offline
//! use, and by network clients in production.

use crate::error::{CanopyError, Result};
use crate::location::{is_valid_segment, Location};
use crate::subscriptions::{CancelCallback, ChangeKinds, ObserverToken, UpdateCallback};
use crate::tree::{Nearest, Payload, UpdateNode};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::Duration;

pub use crate::tree::FlatUpdate;

/// A store that can apply multi-path writes, load and observe locations.
pub trait Backend: Send + Sync {
    /// Apply every entry of `update` (paths relative to `root`) as one atomic
    /// write.
    fn commit(&self, update: FlatUpdate, root: &Location) -> Result<()>;

    /// Start loading `location`. The result is delivered through the
    /// returned handle, which gives up after `timeout`.
    fn load(&self, location: &Location, timeout: Duration) -> PendingLoad;

    /// Register an observer for the given change kinds at `location`.
    ///
    /// Callbacks run after the commit that caused them has been applied and
    /// must not block on a commit running on another thread.
    fn observe(
        &self,
        location: &Location,
        kinds: ChangeKinds,
        on_update: UpdateCallback,
        on_cancel: CancelCallback,
    ) -> ObserverToken;

    /// Remove one observer.
    fn unobserve(&self, token: ObserverToken) {
        drop(token);
    }

    /// Remove every observer registered at `location`.
    fn unobserve_all(&self, location: &Location);
}

/// Point-in-time view of the data at one location.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    location: Location,
    node: Option<UpdateNode>,
}

impl Snapshot {
    pub fn new(location: Location, node: Option<UpdateNode>) -> Self {
        Self { location, node }
    }

    /// Placeholder for a location with no data.
    pub fn empty(location: Location) -> Self {
        Self::new(location, None)
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn node(&self) -> Option<&UpdateNode> {
        self.node.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.node.as_ref().is_some_and(|node| !node.is_empty())
    }

    /// The value, with branches materialized as JSON objects.
    pub fn value(&self) -> Option<Payload> {
        self.node.as_ref().and_then(UpdateNode::to_value)
    }

    pub fn has_children(&self) -> bool {
        match &self.node {
            Some(UpdateNode::Branch(branch)) => !branch.is_empty(),
            Some(UpdateNode::Leaf(leaf)) => {
                leaf.payload().and_then(Payload::as_object).is_some_and(|o| !o.is_empty())
            }
            None => false,
        }
    }

    /// Snapshots of the direct children.
    pub fn children(&self) -> Vec<Snapshot> {
        match &self.node {
            Some(UpdateNode::Branch(branch)) => branch
                .children()
                .iter()
                .map(|child| Snapshot::new(child.location().clone(), Some(child.clone())))
                .collect(),
            Some(UpdateNode::Leaf(leaf)) => match leaf.payload().and_then(Payload::as_object) {
                Some(fields) => fields
                    .iter()
                    .filter(|(key, _)| is_valid_segment(key))
                    .map(|(key, value)| leaf_snapshot(self.location.child(key.as_str()), value))
                    .collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Snapshot of a descendant given by a relative path such as `"a/b"`.
    ///
    /// Descends into stored branches as well as into JSON objects held by
    /// leaves.
    pub fn child(&self, path: &str) -> Snapshot {
        let location = self.location.join(path);
        let Some(rest) = location.segments_after(&self.location) else {
            return self.clone();
        };
        match &self.node {
            Some(UpdateNode::Branch(branch)) => resolve(branch.nearest_child(rest), &location),
            Some(UpdateNode::Leaf(leaf)) => descend_value(leaf.payload(), rest, location.clone()),
            None => Snapshot::empty(location),
        }
    }
}

fn leaf_snapshot(location: Location, value: &Payload) -> Snapshot {
    let leaf = crate::tree::Leaf::new(location.clone(), Some(value.clone()));
    Snapshot::new(location, Some(UpdateNode::Leaf(leaf)))
}

/// Turn a nearest-node lookup into a snapshot of `location`.
pub(crate) fn resolve(nearest: (Nearest<'_>, &[String]), location: &Location) -> Snapshot {
    match nearest {
        (Nearest::Branch(branch), []) => {
            Snapshot::new(location.clone(), Some(UpdateNode::Branch(branch.clone())))
        }
        (Nearest::Leaf(leaf), rest) => descend_value(leaf.payload(), rest, location.clone()),
        (Nearest::Branch(_), _) => Snapshot::empty(location.clone()),
    }
}

fn descend_value(value: Option<&Payload>, path: &[String], location: Location) -> Snapshot {
    let mut current = value;
    for segment in path {
        current = current
            .and_then(Payload::as_object)
            .and_then(|fields| fields.get(segment));
    }
    match current {
        Some(value) => leaf_snapshot(location, value),
        None => Snapshot::empty(location),
    }
}

/// A load in flight.
///
/// Backends reply on a channel; the caller decides when to block on it.
pub struct PendingLoad {
    location: Location,
    timeout: Duration,
    receiver: Receiver<Result<Snapshot>>,
}

impl PendingLoad {
    pub fn new(location: Location, timeout: Duration, receiver: Receiver<Result<Snapshot>>) -> Self {
        Self {
            location,
            timeout,
            receiver,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Block until the snapshot arrives or the timeout elapses.
    pub fn wait(self) -> Result<Snapshot> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CanopyError::Timeout {
                location: self.location,
                timeout: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(CanopyError::backend(format!(
                "load of {} abandoned by backend",
                self.location
            ))),
        }
    }

    /// Wait on the current thread and hand the outcome to one of two
    /// callbacks.
    pub fn then<F, C>(self, on_complete: F, on_cancel: C)
    where
        F: FnOnce(Snapshot),
        C: FnOnce(CanopyError),
    {
        match self.wait() {
            Ok(snapshot) => on_complete(snapshot),
            Err(err) => on_cancel(err),
        }
    }
}
