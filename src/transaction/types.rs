//! Transaction state, configuration and merge policy.

use crate::tree::{Leaf, Payload, DEFAULT_MAX_DEPTH};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Open: accepts writes and callbacks.
    Waiting,
    /// Handing the flattened update to the backend.
    Performing,
    Completed,
    Failed,
    /// Abandoned with [`Transaction::cancel`](super::Transaction::cancel).
    Cancelled,
    /// Folded into another transaction.
    Merged,
}

/// Orthogonal marker set by [`Transaction::revert`](super::Transaction::revert).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Substate {
    #[default]
    None,
    Reverted,
}

/// What committing a transaction without any writes does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EmptyCommitPolicy {
    /// Complete successfully without contacting the backend.
    #[default]
    Succeed,
    /// Fail with [`CanopyError::EmptyTransaction`](crate::CanopyError::EmptyTransaction).
    Reject,
}

/// Transaction configuration.
#[derive(Clone, Debug)]
pub struct TransactionConfig {
    /// Deepest location a write may target.
    /// Default: 32
    pub max_depth: usize,

    /// Run rollbacks when a commit fails.
    /// Default: true
    pub revert_on_error: bool,

    /// Behaviour of commits with nothing to write.
    pub empty_commit: EmptyCommitPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            revert_on_error: true,
            empty_commit: EmptyCommitPolicy::default(),
        }
    }
}

type Resolver = Arc<dyn Fn(&Leaf, &Leaf) -> Option<Payload> + Send + Sync>;

/// How conflicting leaves are resolved when merging transactions.
#[derive(Clone)]
pub enum MergeStrategy {
    /// The value already in the receiving transaction stays.
    KeepExisting,
    /// The value from the merged transaction replaces it.
    TakeIncoming,
    /// A custom resolver receives `(existing, incoming)` and returns the
    /// payload to keep (`None` for a delete).
    Resolve(Resolver),
}

impl MergeStrategy {
    pub fn resolve_with<F>(resolver: F) -> Self
    where
        F: Fn(&Leaf, &Leaf) -> Option<Payload> + Send + Sync + 'static,
    {
        MergeStrategy::Resolve(Arc::new(resolver))
    }

    pub(crate) fn resolve(&self, existing: &Leaf, incoming: &Leaf) -> Option<Payload> {
        match self {
            MergeStrategy::KeepExisting => existing.payload().cloned(),
            MergeStrategy::TakeIncoming => incoming.payload().cloned(),
            MergeStrategy::Resolve(resolver) => resolver(existing, incoming),
        }
    }
}

impl fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::KeepExisting => f.write_str("KeepExisting"),
            MergeStrategy::TakeIncoming => f.write_str("TakeIncoming"),
            MergeStrategy::Resolve(_) => f.write_str("Resolve(..)"),
        }
    }
}

/// Compensating action run on revert.
pub type Rollback = Box<dyn FnOnce() + Send>;

/// Callback told whether the transaction was applied.
pub type Completion = Box<dyn FnOnce(bool) + Send>;
