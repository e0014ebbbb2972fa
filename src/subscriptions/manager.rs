//! Observer registry fanning store changes out to listeners.

use crate::error::CanopyError;
use crate::location::Location;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    CancelCallback, ChangeEvent, ChangeKinds, DropReason, ObserverId, ObserverToken, Subscription,
    SubscriptionEvent, UpdateCallback,
};

type SharedUpdate = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type SharedCancel = Arc<dyn Fn(&CanopyError) + Send + Sync>;

/// Where an observer's events go.
#[derive(Clone)]
enum Sink {
    Callback {
        on_update: SharedUpdate,
        on_cancel: SharedCancel,
    },
    /// `limit` change events fit; the extra slot holds the final notice.
    Channel {
        sender: Sender<SubscriptionEvent>,
        limit: usize,
    },
}

/// Internal observer state.
struct Observer {
    id: ObserverId,
    kinds: ChangeKinds,
    sink: Sink,
}

/// Per-location observer sets.
///
/// Events are delivered outside the internal lock, so callbacks may observe,
/// drop tokens or read the store they are attached to. The mirror store
/// also lets them commit to it; see [`MirrorStore`](crate::MirrorStore).
pub struct ObserverRegistry {
    observers: RwLock<HashMap<Location, Vec<Observer>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Create a new registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register callbacks for `kinds` at `location`.
    pub fn observe(
        self: &Arc<Self>,
        location: &Location,
        kinds: ChangeKinds,
        on_update: UpdateCallback,
        on_cancel: CancelCallback,
    ) -> ObserverToken {
        let sink = Sink::Callback {
            on_update: Arc::from(on_update),
            on_cancel: Arc::from(on_cancel),
        };
        self.register(location, kinds, sink)
    }

    /// Register a bounded channel for `kinds` at `location`.
    ///
    /// A subscriber with `buffer_size` undelivered changes is dropped on the
    /// next one and receives [`DropReason::BufferOverflow`] as its last item.
    pub fn subscribe(
        self: &Arc<Self>,
        location: &Location,
        kinds: ChangeKinds,
        buffer_size: usize,
    ) -> Subscription {
        let (sender, receiver) = bounded(buffer_size + 1);
        let sink = Sink::Channel {
            sender,
            limit: buffer_size,
        };
        let token = self.register(location, kinds, sink);
        Subscription { token, receiver }
    }

    fn register(self: &Arc<Self>, location: &Location, kinds: ChangeKinds, sink: Sink) -> ObserverToken {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.observers
            .write()
            .entry(location.clone())
            .or_default()
            .push(Observer { id, kinds, sink });

        ObserverToken {
            id,
            location: location.clone(),
            registry: Arc::downgrade(self),
        }
    }

    /// Remove one observer. Unknown ids are ignored.
    pub(crate) fn remove(&self, location: &Location, id: ObserverId) {
        let mut observers = self.observers.write();
        if let Some(set) = observers.get_mut(location) {
            set.retain(|o| o.id != id);
            if set.is_empty() {
                observers.remove(location);
            }
        }
    }

    /// Remove every observer at `location`, telling each one why.
    pub fn remove_all(&self, location: &Location) {
        let removed = self.observers.write().remove(location).unwrap_or_default();
        if removed.is_empty() {
            return;
        }

        let err = CanopyError::Unobserved(location.clone());
        for observer in removed {
            match observer.sink {
                Sink::Callback { on_cancel, .. } => on_cancel(&err),
                Sink::Channel { sender, .. } => {
                    let _ = sender.try_send(SubscriptionEvent::Dropped {
                        reason: DropReason::Unobserved,
                    });
                }
            }
        }
    }

    /// Total number of observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().values().map(Vec::len).sum()
    }

    /// Number of observers at `location`.
    pub fn observers_at(&self, location: &Location) -> usize {
        self.observers.read().get(location).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver a batch of events, in order, to the observers registered at
    /// each event's `observed` location.
    pub fn dispatch(&self, events: &[ChangeEvent]) {
        let mut overflowed = Vec::new();

        for event in events {
            let sinks: Vec<(ObserverId, Sink)> = {
                let observers = self.observers.read();
                match observers.get(&event.observed) {
                    Some(set) => set
                        .iter()
                        .filter(|o| o.kinds.contains(event.kind))
                        .map(|o| (o.id, o.sink.clone()))
                        .collect(),
                    None => continue,
                }
            };

            for (id, sink) in sinks {
                if overflowed.iter().any(|(_, dropped, _)| *dropped == id) {
                    continue;
                }
                match sink {
                    Sink::Callback { on_update, .. } => on_update(event),
                    Sink::Channel { sender, limit } => {
                        let sent = SubscriptionEvent::Change {
                            event: event.clone(),
                        };
                        let delivered = sender.len() < limit
                            && !matches!(
                                sender.try_send(sent),
                                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_))
                            );
                        if !delivered {
                            overflowed.push((event.observed.clone(), id, sender));
                        }
                    }
                }
            }
        }

        // Remove dropped subscriptions
        for (location, id, sender) in overflowed {
            tracing::warn!(%location, ?id, "dropping slow subscriber");
            self.remove(&location, id);
            let _ = sender.try_send(SubscriptionEvent::Dropped {
                reason: DropReason::BufferOverflow,
            });
        }
    }
}
