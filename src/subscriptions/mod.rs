//! Change notifications for observed locations.
//!
//! Observers register at a location for a set of [`ChangeKind`]s:
//! - `Value`: the value at the location was written
//! - `ChildAdded` / `ChildRemoved` / `ChildChanged`: a direct child changed
//!
//! Registration returns an [`ObserverToken`]; dropping the token removes the
//! observer. Observers either receive callbacks or read from a bounded
//! channel ([`Subscription`]); slow channel subscribers are dropped.
//!
//! # Example
//!
//! ```ignore
//! let registry = ObserverRegistry::new();
//! let subscription = registry.subscribe(&"/users".into(), ChangeKinds::CHILD_ADDED, 64);
//!
//! loop {
//!     match subscription.recv() {
//!         Ok(SubscriptionEvent::Change { event }) => println!("added {}", event.location),
//!         Ok(SubscriptionEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::ObserverRegistry;
pub use types::{
    CancelCallback, ChangeEvent, ChangeKind, ChangeKinds, DropReason, ObserverId, ObserverToken,
    Subscription, SubscriptionEvent, UpdateCallback,
};
