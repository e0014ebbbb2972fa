//! # Canopy
//!
//! Hierarchical update trees and transactions for a path-addressed JSON
//! store, plus an in-memory mirror of that store.
//!
//! ## Core Concepts
//!
//! - **Locations**: slash-separated paths into the store
//! - **Update trees**: buffered writes that coalesce under shared ancestors
//! - **Transactions**: preconditions, rollbacks, completions and one atomic
//!   multi-path write per commit
//! - **Backends**: anything that commits, loads and observes locations; the
//!   [`MirrorStore`] is the in-memory one
//!
//! ## Example
//!
//! ```ignore
//! use canopy::{Backend, Location, MirrorStore, Transaction};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MirrorStore::new());
//!
//! let mut tx = Transaction::new(store.clone());
//! tx.write(&Location::parse("/users/42/name"), json!("Ann"));
//! tx.write(&Location::parse("/users/42/age"), json!(30));
//! tx.add_completion(|ok| println!("applied: {ok}"));
//! tx.commit()?;
//!
//! assert_eq!(
//!     store.value(&Location::parse("/users/42")),
//!     Some(json!({"name": "Ann", "age": 30}))
//! );
//! ```

pub mod backend;
pub mod error;
pub mod location;
pub mod persist;
pub mod store;
pub mod subscriptions;
pub mod transaction;
pub mod tree;

// Re-exports
pub use backend::{Backend, FlatUpdate, PendingLoad, Snapshot};
pub use error::{CanopyError, Result, TreeError};
pub use location::{is_valid_segment, Location};
pub use store::{MirrorStore, MirrorStoreConfig};
pub use subscriptions::{
    CancelCallback, ChangeEvent, ChangeKind, ChangeKinds, DropReason, ObserverId, ObserverRegistry,
    ObserverToken, Subscription, SubscriptionEvent, UpdateCallback,
};
pub use transaction::{
    Completion, EmptyCommitPolicy, MergeStrategy, Precondition, PreconditionContext, Rollback,
    Substate, Transaction, TransactionConfig, TransactionState,
};
pub use tree::{expand, Branch, Leaf, Payload, UpdateNode};
