//! In-memory mirror of the remote store.

use crate::backend::{resolve, Backend, FlatUpdate, PendingLoad, Snapshot};
use crate::error::{CanopyError, Result};
use crate::location::Location;
use crate::persist;
use crate::subscriptions::{
    CancelCallback, ChangeEvent, ChangeKind, ChangeKinds, ObserverRegistry, ObserverToken,
    Subscription, UpdateCallback,
};
use crate::tree::{check_depth, expand, Branch, Payload, UpdateNode, DEFAULT_MAX_DEPTH};
use crossbeam_channel::bounded;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Mirror store configuration.
#[derive(Clone, Debug)]
pub struct MirrorStoreConfig {
    /// Deepest location a commit may touch.
    /// Default: 32
    pub max_depth: usize,

    /// Delay before load replies are delivered (None = reply immediately).
    pub load_latency: Option<Duration>,

    /// Buffer size for channel subscriptions.
    /// Default: 1000
    pub subscription_buffer: usize,
}

impl Default for MirrorStoreConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            load_latency: None,
            subscription_buffer: 1000,
        }
    }
}

/// An in-memory store with the same tree model and backend contract as the
/// remote store.
///
/// Commits are applied atomically and serialized per store. Change
/// notifications for a commit are computed while the commit is applied and
/// delivered only after it has been fully applied.
///
/// Observer callbacks run on the committing thread after the store state has
/// been unlocked, so they may read the store and commit to it. A commit made
/// from a callback is applied and dispatched before the remaining events of
/// the outer commit are delivered.
pub struct MirrorStore {
    config: MirrorStoreConfig,

    /// Current database state.
    tree: RwLock<Branch>,

    observers: Arc<ObserverRegistry>,

    /// Serializes commits, including their notification dispatch. Reentrant
    /// so observer callbacks can commit on the same thread.
    commit_lock: ReentrantMutex<()>,

    /// Held while the tree is modified or saved.
    write_lock: Mutex<()>,

    /// Error returned by the next commit instead of applying it.
    fault: Mutex<Option<String>>,
}

impl MirrorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_config(MirrorStoreConfig::default())
    }

    pub fn with_config(config: MirrorStoreConfig) -> Self {
        Self::from_tree(Branch::new(Location::root()), config)
    }

    fn from_tree(tree: Branch, config: MirrorStoreConfig) -> Self {
        Self {
            config,
            tree: RwLock::new(tree),
            observers: ObserverRegistry::new(),
            commit_lock: ReentrantMutex::new(()),
            write_lock: Mutex::new(()),
            fault: Mutex::new(None),
        }
    }

    /// Open a store previously written with [`save`](Self::save).
    pub fn open(path: impl AsRef<Path>, config: MirrorStoreConfig) -> Result<Self> {
        let tree = persist::read_tree(path.as_ref())?;
        Ok(Self::from_tree(tree, config))
    }

    /// Write the current state to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let _lock = self.write_lock.lock();
        persist::write_tree(path.as_ref(), &self.tree.read())
    }

    pub fn config(&self) -> &MirrorStoreConfig {
        &self.config
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// Make the next commit fail with `message` without applying anything.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        *self.fault.lock() = Some(message.into());
    }

    /// Current data at `location`, read synchronously.
    pub fn snapshot(&self, location: &Location) -> Snapshot {
        let tree = self.tree.read();
        resolve(tree.nearest_child(location.segments()), location)
    }

    /// Current value at `location`.
    pub fn value(&self, location: &Location) -> Option<Payload> {
        self.snapshot(location).value()
    }

    /// Channel subscription for `kinds` at `location`.
    pub fn subscribe(&self, location: &Location, kinds: ChangeKinds) -> Subscription {
        self.observers
            .subscribe(location, kinds, self.config.subscription_buffer)
    }

    /// Remove all data. Observers stay registered and are not notified.
    pub fn clear(&self) {
        let _lock = self.write_lock.lock();
        self.tree.write().clear();
    }

    fn apply(&self, update: &FlatUpdate, root: &Location) -> Result<Vec<ChangeEvent>> {
        for path in update.keys() {
            check_depth(&root.join(path), self.config.max_depth)?;
        }
        let incoming = expand(root, update)?;

        let notify = !self.observers.is_empty();
        let events = RefCell::new(Vec::new());
        self.tree.write().apply(
            incoming,
            |existing, incoming| {
                if notify {
                    replaced(&mut events.borrow_mut(), existing, incoming);
                }
            },
            |parent, child| {
                if notify {
                    appended(&mut events.borrow_mut(), parent, child);
                }
            },
        )?;
        Ok(events.into_inner())
    }
}

impl Default for MirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MirrorStore {
    fn commit(&self, update: FlatUpdate, root: &Location) -> Result<()> {
        let _serial = self.commit_lock.lock();

        let events = {
            let _lock = self.write_lock.lock();
            if let Some(message) = self.fault.lock().take() {
                return Err(CanopyError::Backend(message));
            }
            self.apply(&update, root)?
        };

        tracing::debug!(%root, entries = update.len(), events = events.len(), "applied commit");
        self.observers.dispatch(&events);
        Ok(())
    }

    fn load(&self, location: &Location, timeout: Duration) -> PendingLoad {
        let snapshot = self.snapshot(location);
        let (sender, receiver) = bounded(1);

        match self.config.load_latency {
            None => {
                let _ = sender.send(Ok(snapshot));
            }
            Some(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    let _ = sender.send(Ok(snapshot));
                });
            }
        }

        PendingLoad::new(location.clone(), timeout, receiver)
    }

    fn observe(
        &self,
        location: &Location,
        kinds: ChangeKinds,
        on_update: UpdateCallback,
        on_cancel: CancelCallback,
    ) -> ObserverToken {
        self.observers.observe(location, kinds, on_update, on_cancel)
    }

    fn unobserve_all(&self, location: &Location) {
        self.observers.remove_all(location);
    }
}

// --- Change collection ---

fn event(observed: &Location, node: &UpdateNode, kind: ChangeKind) -> ChangeEvent {
    ChangeEvent {
        observed: observed.clone(),
        location: node.location().clone(),
        kind,
        value: node.to_value(),
    }
}

/// A stored node was overwritten by `incoming` (a tombstone removes it).
fn replaced(events: &mut Vec<ChangeEvent>, _existing: &UpdateNode, incoming: &UpdateNode) {
    let location = incoming.location();
    events.push(event(location, incoming, ChangeKind::Value));
    if let Some(parent) = location.parent() {
        let kind = if incoming.is_empty() {
            ChangeKind::ChildRemoved
        } else {
            ChangeKind::ChildChanged
        };
        events.push(event(&parent, incoming, kind));
    }
}

/// A new subtree appeared under `parent`.
fn appended(events: &mut Vec<ChangeEvent>, parent: &Location, child: &UpdateNode) {
    events.push(event(parent, child, ChangeKind::ChildAdded));
    events.push(event(child.location(), child, ChangeKind::Value));
    if let UpdateNode::Branch(branch) = child {
        for grandchild in branch.children() {
            appended(events, branch.location(), grandchild);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loc(path: &str) -> Location {
        Location::parse(path)
    }

    fn update(entries: &[(&str, Option<Payload>)]) -> FlatUpdate {
        entries
            .iter()
            .map(|(path, value)| (path.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_commit_and_load() {
        let store = MirrorStore::new();
        store
            .commit(
                update(&[("c", Some(json!(1))), ("d", Some(json!(2)))]),
                &loc("/a/b"),
            )
            .unwrap();

        assert_eq!(store.value(&loc("/a/b/c")), Some(json!(1)));
        assert_eq!(store.value(&loc("/a/b")), Some(json!({"c": 1, "d": 2})));
        assert_eq!(store.value(&loc("/a")), Some(json!({"b": {"c": 1, "d": 2}})));

        let snapshot = store
            .load(&loc("/a/b/d"), Duration::from_secs(1))
            .wait()
            .unwrap();
        assert_eq!(snapshot.value(), Some(json!(2)));
    }

    #[test]
    fn test_load_missing_returns_placeholder() {
        let store = MirrorStore::new();
        let snapshot = store.load(&loc("/nope"), Duration::from_secs(1)).wait().unwrap();
        assert_eq!(snapshot.location(), &loc("/nope"));
        assert!(!snapshot.exists());
        assert_eq!(snapshot.value(), None);
    }

    #[test]
    fn test_load_latency_and_timeout() {
        let store = MirrorStore::with_config(MirrorStoreConfig {
            load_latency: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let err = store
            .load(&loc("/a"), Duration::from_millis(10))
            .wait()
            .unwrap_err();
        assert!(matches!(err, CanopyError::Timeout { .. }));

        let snapshot = store.load(&loc("/a"), Duration::from_secs(5)).wait();
        assert!(snapshot.is_ok());
    }

    #[test]
    fn test_injected_fault_leaves_state() {
        let store = MirrorStore::new();
        store.commit(update(&[("x", Some(json!(1)))]), &loc("/")).unwrap();

        store.fail_next_commit("offline");
        let err = store
            .commit(update(&[("x", Some(json!(2)))]), &loc("/"))
            .unwrap_err();
        assert!(matches!(err, CanopyError::Backend(ref m) if m == "offline"));
        assert_eq!(store.value(&loc("/x")), Some(json!(1)));

        // The fault is consumed
        store.commit(update(&[("x", Some(json!(3)))]), &loc("/")).unwrap();
        assert_eq!(store.value(&loc("/x")), Some(json!(3)));
    }

    #[test]
    fn test_depth_limit() {
        let store = MirrorStore::with_config(MirrorStoreConfig {
            max_depth: 2,
            ..Default::default()
        });
        let err = store
            .commit(update(&[("b/c", Some(json!(1)))]), &loc("/a"))
            .unwrap_err();
        assert!(matches!(err, CanopyError::Tree(_)));
        assert_eq!(store.value(&loc("/")), None);
    }

    #[test]
    fn test_change_events() {
        let store = MirrorStore::new();
        store
            .commit(update(&[("1", Some(json!("a"))), ("2", Some(json!("b")))]), &loc("/items"))
            .unwrap();

        let subscription = store.subscribe(&loc("/items"), ChangeKinds::CHILDREN);
        store
            .commit(
                update(&[("1", Some(json!("z"))), ("2", None), ("3", Some(json!("c")))]),
                &loc("/items"),
            )
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(crate::subscriptions::SubscriptionEvent::Change { event }) = subscription.try_recv() {
            kinds.push((event.kind, event.location.to_string()));
        }
        assert_eq!(
            kinds,
            vec![
                (ChangeKind::ChildChanged, "/items/1".to_string()),
                (ChangeKind::ChildRemoved, "/items/2".to_string()),
                (ChangeKind::ChildAdded, "/items/3".to_string()),
            ]
        );
    }

    #[test]
    fn test_emptied_parent_reports_removal() {
        let store = MirrorStore::new();
        store
            .commit(update(&[("flags/beta", Some(json!(true))), ("name", Some(json!("x")))]), &Location::root())
            .unwrap();

        let subscription = store.subscribe(&Location::root(), ChangeKinds::CHILD_REMOVED);
        store.commit(update(&[("beta", None)]), &loc("/flags")).unwrap();

        let event = match subscription.try_recv() {
            Ok(crate::subscriptions::SubscriptionEvent::Change { event }) => event,
            other => panic!("Expected a change, got {:?}", other),
        };
        assert_eq!(event.location, loc("/flags"));
        assert_eq!(event.value, None);
        assert!(subscription.try_recv().is_err());
        assert_eq!(store.value(&loc("/flags")), None);
    }

    #[test]
    fn test_observer_may_commit_to_same_store() {
        let store = Arc::new(MirrorStore::new());
        let weak = Arc::downgrade(&store);
        let _token = store.observe(
            &loc("/orders"),
            ChangeKinds::CHILD_ADDED,
            Box::new(move |event| {
                let Some(store) = weak.upgrade() else { return };
                let key = event.location.last().unwrap_or("unknown").to_string();
                store
                    .commit(update(&[(key.as_str(), Some(json!("seen")))]), &loc("/audit"))
                    .unwrap();
            }),
            Box::new(|_| {}),
        );

        // Runs on a worker so a deadlock fails the test instead of hanging it
        let worker = Arc::clone(&store);
        let (done, finished) = bounded(1);
        thread::spawn(move || {
            worker
                .commit(update(&[("7", Some(json!({"qty": 1})))]), &loc("/orders"))
                .unwrap();
            let _ = done.send(());
        });

        finished.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(store.value(&loc("/audit/7")), Some(json!("seen")));
        assert_eq!(store.value(&loc("/orders/7/qty")), Some(json!(1)));
    }
}
