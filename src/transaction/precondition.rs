//! Async checks that gate a commit.

use super::types::{Completion, MergeStrategy, Rollback};
use super::Transaction;
use crate::error::CanopyError;
use crate::location::Location;
use crate::tree::Payload;
use crossbeam_channel::Sender;

/// A check run before the writes of a transaction are applied.
pub type Precondition = Box<dyn FnOnce(PreconditionContext) + Send>;

/// Path of indices into nested scheduled merges naming the transaction a
/// precondition belongs to. Empty for the committing transaction itself.
pub(super) type Owner = Vec<usize>;

/// Changes requested by a precondition, applied by the committing thread.
pub(super) enum Amendment {
    Write(Location, Option<Payload>),
    Precondition(Precondition),
    Rollback(Rollback),
    Completion(Completion),
    Merge(Box<Transaction>, MergeStrategy),
    Resolved(Result<(), CanopyError>),
}

/// Handle given to a running precondition.
///
/// It may be moved to another thread and resolved later. Before resolving,
/// the precondition can add writes, further preconditions and callbacks to
/// the transaction that registered it, or merge another transaction into
/// it. A precondition of a transaction awaiting a merge therefore amends
/// that transaction, and its writes go through the merge strategy when it
/// is folded in. Dropping the context unresolved counts as a failure.
pub struct PreconditionContext {
    sender: Sender<(Owner, Amendment)>,
    owner: Owner,
    resolved: bool,
}

impl PreconditionContext {
    pub(super) fn new(sender: Sender<(Owner, Amendment)>, owner: Owner) -> Self {
        Self {
            sender,
            owner,
            resolved: false,
        }
    }

    pub fn write(&self, location: &Location, value: Payload) {
        self.send(Amendment::Write(location.clone(), Some(value)));
    }

    pub fn delete(&self, location: &Location) {
        self.send(Amendment::Write(location.clone(), None));
    }

    /// Queue another precondition; it runs in the next drain round.
    pub fn add_precondition<F>(&self, precondition: F)
    where
        F: FnOnce(PreconditionContext) + Send + 'static,
    {
        self.send(Amendment::Precondition(Box::new(precondition)));
    }

    pub fn add_rollback<F>(&self, rollback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Amendment::Rollback(Box::new(rollback)));
    }

    pub fn add_completion<F>(&self, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.send(Amendment::Completion(Box::new(completion)));
    }

    /// Merge `other` into the transaction this precondition belongs to.
    pub fn merge(&self, other: Transaction, strategy: MergeStrategy) {
        self.send(Amendment::Merge(Box::new(other), strategy));
    }

    /// Report that the check passed.
    pub fn succeed(mut self) {
        self.resolve(Ok(()));
    }

    /// Report that the check failed.
    pub fn fail(mut self, err: CanopyError) {
        self.resolve(Err(err));
    }

    /// Report the outcome of a fallible check.
    pub fn finish(mut self, result: Result<(), CanopyError>) {
        self.resolve(result);
    }

    fn resolve(&mut self, result: Result<(), CanopyError>) {
        self.resolved = true;
        self.send(Amendment::Resolved(result));
    }

    fn send(&self, amendment: Amendment) {
        // The receiver lives until every context of the round has resolved.
        let _ = self.sender.send((self.owner.clone(), amendment));
    }
}

impl Drop for PreconditionContext {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolve(Err(CanopyError::PreconditionAbandoned));
        }
    }
}
