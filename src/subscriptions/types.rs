//! Observer types: change kinds, events and handles.

use super::manager::ObserverRegistry;
use crate::error::CanopyError;
use crate::location::Location;
use crate::tree::Payload;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::Weak;

/// What happened at an observed location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The value at the location itself was written.
    Value,
    /// A child appeared under the location.
    ChildAdded,
    /// A child under the location was deleted.
    ChildRemoved,
    /// A child under the location was overwritten.
    ChildChanged,
}

impl ChangeKind {
    const fn bit(self) -> u8 {
        match self {
            ChangeKind::Value => 1,
            ChangeKind::ChildAdded => 1 << 1,
            ChangeKind::ChildRemoved => 1 << 2,
            ChangeKind::ChildChanged => 1 << 3,
        }
    }
}

/// A set of [`ChangeKind`]s an observer is interested in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeKinds(u8);

impl ChangeKinds {
    pub const VALUE: ChangeKinds = ChangeKinds(ChangeKind::Value.bit());
    pub const CHILD_ADDED: ChangeKinds = ChangeKinds(ChangeKind::ChildAdded.bit());
    pub const CHILD_REMOVED: ChangeKinds = ChangeKinds(ChangeKind::ChildRemoved.bit());
    pub const CHILD_CHANGED: ChangeKinds = ChangeKinds(ChangeKind::ChildChanged.bit());
    pub const CHILDREN: ChangeKinds = ChangeKinds(
        ChangeKind::ChildAdded.bit() | ChangeKind::ChildRemoved.bit() | ChangeKind::ChildChanged.bit(),
    );
    pub const ALL: ChangeKinds = ChangeKinds(Self::VALUE.0 | Self::CHILDREN.0);

    pub const fn empty() -> Self {
        ChangeKinds(0)
    }

    pub fn contains(self, kind: ChangeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<ChangeKind> for ChangeKinds {
    fn from(kind: ChangeKind) -> Self {
        ChangeKinds(kind.bit())
    }
}

impl BitOr for ChangeKinds {
    type Output = ChangeKinds;

    fn bitor(self, rhs: Self) -> Self {
        ChangeKinds(self.0 | rhs.0)
    }
}

impl fmt::Debug for ChangeKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = [
            ChangeKind::Value,
            ChangeKind::ChildAdded,
            ChangeKind::ChildRemoved,
            ChangeKind::ChildChanged,
        ];
        f.debug_set()
            .entries(kinds.iter().filter(|k| self.contains(**k)))
            .finish()
    }
}

/// One change delivered to the observers of `observed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Location the observer is registered at.
    pub observed: Location,
    /// Location whose data changed (the observed location for `Value`, the
    /// child for child events).
    pub location: Location,
    pub kind: ChangeKind,
    /// New value at `location`; `None` after a delete.
    pub value: Option<Payload>,
}

/// Callback receiving change events.
pub type UpdateCallback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Callback receiving the error that ended an observation.
pub type CancelCallback = Box<dyn Fn(&CanopyError) + Send + Sync>;

/// Unique identifier for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Registration handle. Dropping it removes the observer.
pub struct ObserverToken {
    pub(super) id: ObserverId,
    pub(super) location: Location,
    pub(super) registry: Weak<ObserverRegistry>,
}

impl ObserverToken {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl fmt::Debug for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverToken")
            .field("id", &self.id)
            .field("location", &self.location)
            .finish()
    }
}

impl Drop for ObserverToken {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.location, self.id);
        }
    }
}

/// Items delivered to a channel subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Change { event: ChangeEvent },
    /// The subscription ended; nothing follows.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// All observers at the location were removed.
    Unobserved,
}

/// Channel-backed observation. Dropping it unsubscribes.
pub struct Subscription {
    pub token: ObserverToken,
    pub receiver: crossbeam_channel::Receiver<SubscriptionEvent>,
}

impl Subscription {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<SubscriptionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<SubscriptionEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kinds_set() {
        let kinds = ChangeKinds::VALUE | ChangeKinds::CHILD_ADDED;
        assert!(kinds.contains(ChangeKind::Value));
        assert!(kinds.contains(ChangeKind::ChildAdded));
        assert!(!kinds.contains(ChangeKind::ChildRemoved));
        assert!(ChangeKinds::empty().is_empty());
        assert!(ChangeKinds::ALL.contains(ChangeKind::ChildChanged));
        assert_eq!(ChangeKinds::from(ChangeKind::ChildRemoved), ChangeKinds::CHILD_REMOVED);
        assert_eq!(format!("{:?}", kinds), "{Value, ChildAdded}");
    }
}
