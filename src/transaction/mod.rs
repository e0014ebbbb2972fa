//! Multi-location write transactions.
//!
//! A [`Transaction`] collects writes and deletes for any number of rooted
//! locations and applies them with a single atomic backend call:
//!
//! 1. preconditions run (and may queue more work) until none are left
//! 2. transactions merged while preconditions were pending are folded in
//! 3. the update tree is flattened at its most specific common location
//! 4. the backend applies the flattened update atomically
//! 5. completions run; on failure rollbacks run first (most recent first)
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MirrorStore::new());
//! let mut tx = Transaction::new(store.clone());
//! tx.write(&"/users/42/name".into(), json!("Ann"));
//! tx.delete(&"/invites/42".into());
//! tx.add_rollback(|| cache.forget(42));
//! tx.commit()?;
//! ```

mod engine;
mod precondition;
mod types;

pub use engine::Transaction;
pub use precondition::{Precondition, PreconditionContext};
pub use types::{
    Completion, EmptyCommitPolicy, MergeStrategy, Rollback, Substate, TransactionConfig,
    TransactionState,
};
