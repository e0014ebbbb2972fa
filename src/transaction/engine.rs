//! The transaction: buffered writes, callbacks and the commit protocol.

use super::precondition::{Amendment, Owner, Precondition, PreconditionContext};
use super::types::{
    Completion, EmptyCommitPolicy, MergeStrategy, Rollback, Substate, TransactionConfig,
    TransactionState,
};
use crate::backend::Backend;
use crate::error::{CanopyError, Result, TreeError};
use crate::location::Location;
use crate::tree::{check_depth, Branch, Payload};
use crossbeam_channel::unbounded;
use std::fmt;
use std::mem;
use std::sync::Arc;

/// A set of writes committed as one atomic multi-path update.
///
/// Writes and deletes are buffered in an update tree. [`commit`](Self::commit)
/// runs the registered preconditions, flattens the tree to the most specific
/// common location and hands it to the backend in one call. Completions run
/// after the outcome is known; rollbacks run in reverse registration order
/// when the transaction is reverted.
///
/// Mutating a transaction that is no longer open panics, as does writing a
/// value that collides with the tree structure. A transaction must end up
/// committed, reverted, cancelled or merged; dropping an open one panics.
pub struct Transaction {
    backend: Arc<dyn Backend>,
    config: TransactionConfig,
    root: Branch,
    preconditions: Vec<Precondition>,
    /// LIFO: the last pushed rollback runs first.
    rollbacks: Vec<Rollback>,
    completions: Vec<Completion>,
    scheduled_merges: Vec<(Transaction, MergeStrategy)>,
    state: TransactionState,
    substate: Substate,
}

impl Transaction {
    /// Open a transaction against `backend` with default configuration.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, TransactionConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: TransactionConfig) -> Self {
        Self {
            backend,
            config,
            root: Branch::new(Location::root()),
            preconditions: Vec::new(),
            rollbacks: Vec::new(),
            completions: Vec::new(),
            scheduled_merges: Vec::new(),
            state: TransactionState::Waiting,
            substate: Substate::None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn substate(&self) -> Substate {
        self.substate
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Buffered writes.
    pub fn tree(&self) -> &Branch {
        &self.root
    }

    pub fn is_invalidated(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Completed
                | TransactionState::Failed
                | TransactionState::Cancelled
                | TransactionState::Merged
        ) || self.substate == Substate::Reverted
    }

    pub fn has_operations(&self) -> bool {
        !self.root.is_empty() || !self.preconditions.is_empty() || !self.scheduled_merges.is_empty()
    }

    // --- Writes ---

    /// Write `value` at `location`, replacing an earlier write to the same
    /// location.
    pub fn write(&mut self, location: &Location, value: Payload) {
        self.insert(location, Some(value));
    }

    /// Delete the value (or whole subtree) at `location`.
    pub fn delete(&mut self, location: &Location) {
        self.insert(location, None);
    }

    fn insert(&mut self, location: &Location, payload: Option<Payload>) {
        self.assert_open("write");
        if !location.is_rooted() {
            invariant_violation(TreeError::NotRooted(location.clone()));
        }
        if let Err(err) = check_depth(location, self.config.max_depth)
            .and_then(|()| self.root.insert(location, payload))
        {
            invariant_violation(err);
        }
    }

    // --- Callbacks ---

    /// Register a compensating action. Rollbacks run most recent first.
    pub fn add_rollback<F>(&mut self, rollback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.assert_open("add rollback");
        self.rollbacks.push(Box::new(rollback));
    }

    /// Register a callback told whether the transaction was applied.
    /// Completions run in registration order.
    pub fn add_completion<F>(&mut self, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.assert_open("add completion");
        self.completions.push(Box::new(completion));
    }

    /// Register a check that must succeed before anything is written.
    pub fn add_precondition<F>(&mut self, precondition: F)
    where
        F: FnOnce(PreconditionContext) + Send + 'static,
    {
        self.assert_open("add precondition");
        self.preconditions.push(Box::new(precondition));
    }

    // --- Merging ---

    /// Fold `other` into this transaction.
    ///
    /// Conflicting leaves are settled by `strategy`. `other`'s completions
    /// are adopted and its rollbacks replayed as one step of this
    /// transaction's rollback stack. If `other` still has preconditions the
    /// fold is deferred: they run during [`commit`](Self::commit), amending
    /// `other`, which is then folded in with `strategy`.
    pub fn merge(&mut self, other: Transaction, strategy: MergeStrategy) {
        self.assert_open("merge");
        other.assert_open("be merged");

        if other.preconditions.is_empty() && other.scheduled_merges.is_empty() {
            self.fold(other, strategy);
            return;
        }

        tracing::debug!(
            preconditions = other.preconditions.len(),
            "scheduling merge until preconditions resolve"
        );
        self.scheduled_merges.push((other, strategy));
    }

    fn fold(&mut self, mut other: Transaction, strategy: MergeStrategy) {
        for (nested, nested_strategy) in mem::take(&mut other.scheduled_merges) {
            other.fold(nested, nested_strategy);
        }

        let tree = mem::replace(&mut other.root, Branch::new(Location::root()));
        if let Err(err) = self
            .root
            .merge(tree, |existing, incoming| strategy.resolve(existing, incoming))
        {
            invariant_violation(err);
        }

        self.completions.append(&mut other.completions);
        let chain = mem::take(&mut other.rollbacks);
        if !chain.is_empty() {
            self.rollbacks.push(Box::new(move || run_rollbacks(chain)));
        }
        other.state = TransactionState::Merged;
    }

    // --- Commit ---

    /// Commit using the configured `revert_on_error`.
    pub fn commit(&mut self) -> Result<()> {
        self.commit_with(self.config.revert_on_error)
    }

    /// Run preconditions, then apply all writes atomically.
    ///
    /// Precondition failures are collected and returned together as
    /// [`CanopyError::Preconditions`]; backend failures are returned as-is.
    /// On failure the transaction is reverted when `revert_on_error` is set.
    /// Either way completions run before this returns.
    pub fn commit_with(&mut self, revert_on_error: bool) -> Result<()> {
        self.assert_open("commit");

        let errors = self.drain_preconditions();
        if !errors.is_empty() {
            tracing::warn!(failures = errors.len(), "preconditions failed");
            self.fail(revert_on_error);
            return Err(CanopyError::Preconditions(errors));
        }

        for (other, strategy) in mem::take(&mut self.scheduled_merges) {
            self.fold(other, strategy);
        }
        self.state = TransactionState::Performing;

        let (target, update) = self.root.flatten();
        let result = if update.is_empty() {
            match self.config.empty_commit {
                EmptyCommitPolicy::Succeed => Ok(()),
                EmptyCommitPolicy::Reject => Err(CanopyError::EmptyTransaction),
            }
        } else {
            tracing::debug!(%target, entries = update.len(), "committing update");
            self.backend.commit(update, &target)
        };

        match result {
            Ok(()) => {
                self.state = TransactionState::Completed;
                self.finish(true);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%target, error = %err, "commit failed");
                self.fail(revert_on_error);
                Err(err)
            }
        }
    }

    /// Run preconditions, including those of scheduled merges, until none
    /// are left, collecting every failure.
    fn drain_preconditions(&mut self) -> Vec<CanopyError> {
        let mut errors = Vec::new();

        loop {
            let mut round = Vec::new();
            self.collect_preconditions(&mut Vec::new(), &mut round);
            if round.is_empty() {
                break;
            }

            let mut outstanding = round.len();
            let (sender, receiver) = unbounded();
            for (owner, precondition) in round {
                precondition(PreconditionContext::new(sender.clone(), owner));
            }
            drop(sender);

            while outstanding > 0 {
                let Ok((owner, amendment)) = receiver.recv() else {
                    break;
                };
                match amendment {
                    Amendment::Resolved(result) => {
                        outstanding -= 1;
                        if let Err(err) = result {
                            errors.push(err);
                        }
                    }
                    amendment => self.scheduled_mut(&owner).amend(amendment),
                }
            }
        }

        errors
    }

    /// Take the pending preconditions of this transaction and of every
    /// scheduled merge below it, each tagged with its owner.
    fn collect_preconditions(&mut self, owner: &mut Owner, out: &mut Vec<(Owner, Precondition)>) {
        for precondition in mem::take(&mut self.preconditions) {
            out.push((owner.clone(), precondition));
        }
        for (index, (other, _)) in self.scheduled_merges.iter_mut().enumerate() {
            owner.push(index);
            other.collect_preconditions(owner, out);
            owner.pop();
        }
    }

    /// Scheduled merges are only appended while draining, so owner paths
    /// stay valid for the whole drain.
    fn scheduled_mut(&mut self, owner: &[usize]) -> &mut Transaction {
        match owner.split_first() {
            None => self,
            Some((&index, rest)) => self.scheduled_merges[index].0.scheduled_mut(rest),
        }
    }

    fn amend(&mut self, amendment: Amendment) {
        match amendment {
            Amendment::Write(location, payload) => self.insert(&location, payload),
            Amendment::Precondition(precondition) => self.preconditions.push(precondition),
            Amendment::Rollback(rollback) => self.rollbacks.push(rollback),
            Amendment::Completion(completion) => self.completions.push(completion),
            Amendment::Merge(other, strategy) => self.merge(*other, strategy),
            Amendment::Resolved(_) => {}
        }
    }

    fn fail(&mut self, revert_on_error: bool) {
        self.state = TransactionState::Failed;
        self.abandon_scheduled(revert_on_error);
        if revert_on_error {
            self.revert();
        }
        self.finish(false);
    }

    /// Close out transactions whose merge never happened.
    fn abandon_scheduled(&mut self, revert: bool) {
        for (mut other, _) in mem::take(&mut self.scheduled_merges) {
            other.state = TransactionState::Failed;
            other.abandon_scheduled(revert);
            if revert {
                other.revert();
            }
            other.finish(false);
        }
    }

    /// Run completions and release the buffered writes. Rollbacks of a
    /// failed, unreverted transaction stay for a later [`revert`](Self::revert).
    fn finish(&mut self, success: bool) {
        for completion in mem::take(&mut self.completions) {
            completion(success);
        }
        self.root.clear();
        self.preconditions.clear();
        if success {
            self.rollbacks.clear();
        }
    }

    // --- Revert / cancel ---

    /// Run every rollback, most recent first, and mark the transaction
    /// reverted.
    ///
    /// Only an open or failed transaction can be reverted. Reverting an open
    /// one also tells its completions it was not applied.
    pub fn revert(&mut self) {
        let revertible = matches!(
            self.state,
            TransactionState::Waiting | TransactionState::Failed
        ) && self.substate != Substate::Reverted;
        if !revertible {
            panic!(
                "Reversion cannot be made: transaction is {:?}/{:?}",
                self.state, self.substate
            );
        }

        run_rollbacks(mem::take(&mut self.rollbacks));
        self.substate = Substate::Reverted;

        if self.state == TransactionState::Waiting {
            self.abandon_scheduled(true);
            self.finish(false);
        }
    }

    /// Abandon an open transaction without running rollbacks.
    pub fn cancel(&mut self) {
        self.assert_open("cancel");
        self.state = TransactionState::Cancelled;
        self.abandon_scheduled(false);
        self.rollbacks.clear();
        self.finish(false);
    }

    fn assert_open(&self, operation: &str) {
        if self.is_invalidated() {
            panic!(
                "Transaction is invalidated ({:?}/{:?}), cannot {}. Create a new one.",
                self.state, self.substate, operation
            );
        }
    }
}

fn run_rollbacks(mut stack: Vec<Rollback>) {
    while let Some(rollback) = stack.pop() {
        rollback();
    }
}

fn invariant_violation(err: TreeError) -> ! {
    panic!("Invalid transaction write: {err}");
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let unresolved =
            self.state == TransactionState::Waiting && self.substate != Substate::Reverted;
        if unresolved && !std::thread::panicking() {
            tracing::error!(pending = %self.root, "open transaction dropped");
            panic!("Transaction requires performing, reversion or merging");
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root, f)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("substate", &self.substate)
            .field("writes", &self.root.leaves().len())
            .field("preconditions", &self.preconditions.len())
            .field("rollbacks", &self.rollbacks.len())
            .field("completions", &self.completions.len())
            .field("scheduled_merges", &self.scheduled_merges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MirrorStore;
    use serde_json::json;

    fn open() -> Transaction {
        Transaction::new(Arc::new(MirrorStore::new()))
    }

    #[test]
    fn test_has_operations() {
        let mut tx = open();
        assert!(!tx.has_operations());

        tx.add_precondition(|ctx| ctx.succeed());
        assert!(tx.has_operations());

        tx.write(&Location::parse("/a"), json!(1));
        tx.commit().unwrap();
        assert!(!tx.has_operations());
        assert!(tx.is_invalidated());
    }

    #[test]
    fn test_later_write_replaces_earlier() {
        let mut tx = open();
        tx.write(&Location::parse("/a/b"), json!(1));
        tx.delete(&Location::parse("/a/b"));
        tx.write(&Location::parse("/a/c"), json!("x"));

        assert_eq!(tx.to_string(), r#"{"a/b": <delete>, "a/c": "x"}"#);
        let (target, update) = tx.tree().flatten();
        assert_eq!(target, Location::parse("/a"));
        assert_eq!(update["b"], None);
        tx.cancel();
    }

    #[test]
    fn test_keep_existing_strategy() {
        let mut a = open();
        a.write(&Location::parse("/k"), json!("mine"));
        let mut b = open();
        b.write(&Location::parse("/k"), json!("theirs"));

        a.merge(b, MergeStrategy::KeepExisting);
        let (_, update) = a.tree().flatten();
        assert_eq!(update["k"], Some(json!("mine")));
        a.cancel();
    }

    #[test]
    fn test_custom_resolver() {
        let mut a = open();
        a.write(&Location::parse("/n"), json!(2));
        let mut b = open();
        b.write(&Location::parse("/n"), json!(3));

        a.merge(
            b,
            MergeStrategy::resolve_with(|existing, incoming| {
                let sum = existing.payload()?.as_i64()? + incoming.payload()?.as_i64()?;
                Some(json!(sum))
            }),
        );
        let (_, update) = a.tree().flatten();
        assert_eq!(update["n"], Some(json!(5)));
        a.cancel();
    }

    #[test]
    fn test_debug_counts() {
        let mut tx = open();
        tx.write(&Location::parse("/a"), json!(1));
        tx.add_rollback(|| {});
        let rendered = format!("{tx:?}");
        assert!(rendered.contains("writes: 1"));
        assert!(rendered.contains("rollbacks: 1"));
        tx.revert();
    }
}
