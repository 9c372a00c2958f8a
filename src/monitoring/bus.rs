/*!
 * Event Bus
 * Observer registration for supervisor events
 *
 * Design: emitters never know who is listening. Listeners are registered with
 * `subscribe` and stay attached while the returned `Subscription` lives.
 * Delivery is fire-and-forget: no acknowledgment, and a panicking listener is
 * contained and counted instead of unwinding into the emitter.
 */

use super::events::{EventKind, SupervisorEvent};
use ahash::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

type Listener = Arc<dyn Fn(&SupervisorEvent) + Send + Sync>;

struct Entry {
    /// None = every kind
    kind: Option<EventKind>,
    listener: Listener,
}

struct BusInner {
    listeners: RwLock<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    emitted: [AtomicU64; EventKind::ALL.len()],
    listener_panics: AtomicU64,
}

/// Event bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub events_emitted: u64,
    pub by_kind: Vec<(EventKind, u64)>,
    pub listener_panics: u64,
    pub active_listeners: usize,
}

/// Cheap cloneable handle to a shared event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new event bus with no listeners
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(HashMap::default()),
                next_id: AtomicU64::new(1),
                emitted: Default::default(),
                listener_panics: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to every event
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SupervisorEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    /// Subscribe to a single event kind
    pub fn subscribe_kind<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SupervisorEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Subscribe through a channel (for consumers living in their own task)
    pub fn subscribe_channel(&self) -> (Subscription, flume::Receiver<SupervisorEvent>) {
        let (tx, rx) = flume::unbounded();
        let subscription = self.subscribe(move |event| {
            // Receiver gone means the consumer stopped listening
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    fn register(&self, kind: Option<EventKind>, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .insert(id, Entry { kind, listener });

        debug!(subscription_id = id, kind = ?kind, "listener subscribed");

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            attached: true,
        }
    }

    /// Deliver an event to all matching listeners, returns how many received it
    pub fn emit(&self, event: SupervisorEvent) -> usize {
        let kind = event.kind();
        self.inner.emitted[kind.index()].fetch_add(1, Ordering::Relaxed);

        // Snapshot under the lock, call outside it so listeners may (un)subscribe
        let targets: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .values()
            .filter(|entry| entry.kind.map_or(true, |k| k == kind))
            .map(|entry| Arc::clone(&entry.listener))
            .collect();

        let mut delivered = 0;
        for listener in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.inner.listener_panics.fetch_add(1, Ordering::Relaxed);
                    warn!(event = %kind, "event listener panicked, delivery continues");
                }
            }
        }
        delivered
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Get bus statistics
    pub fn stats(&self) -> BusStats {
        let by_kind: Vec<(EventKind, u64)> = EventKind::ALL
            .iter()
            .map(|kind| (*kind, self.inner.emitted[kind.index()].load(Ordering::Relaxed)))
            .collect();

        BusStats {
            events_emitted: by_kind.iter().map(|(_, count)| count).sum(),
            by_kind,
            listener_panics: self.inner.listener_panics.load(Ordering::Relaxed),
            active_listeners: self.listener_count(),
        }
    }

    /// Count of events emitted for one kind
    pub fn emitted(&self, kind: EventKind) -> u64 {
        self.inner.emitted[kind.index()].load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Detach handle returned by `subscribe`
///
/// The listener stays attached while this handle lives. Dropping it (or calling
/// `unsubscribe`) detaches the listener; `forget` keeps it for the bus lifetime.
#[must_use = "dropping a Subscription detaches the listener"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    attached: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Detach the listener, returns false if the bus is already gone
    pub fn unsubscribe(mut self) -> bool {
        self.detach()
    }

    /// Keep the listener attached for as long as the bus exists
    pub fn forget(mut self) {
        self.attached = false;
    }

    fn detach(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.attached = false;

        match self.bus.upgrade() {
            Some(bus) => {
                let removed = bus.listeners.write().remove(&self.id).is_some();
                debug!(subscription_id = self.id, "listener unsubscribed");
                removed
            }
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
