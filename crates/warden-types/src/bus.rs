//! Publish/subscribe fan-out for normalized events.
//!
//! Synchronous handlers registered with [`EventBus::subscribe`] run in
//! publish order on the publishing task, so events from one source reach
//! every handler in arrival order. Async consumers (SSE streams, the rule
//! engine) take a [`tokio::sync::broadcast`] receiver instead.

use crate::event::{EventKind, NormalizedEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;

/// Capacity of the broadcast channel for async receivers.
const BROADCAST_CAPACITY: usize = 1024;

type Handler = Arc<dyn Fn(&NormalizedEvent) + Send + Sync>;

/// Which kinds a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    Any,
    Kinds(Vec<EventKind>),
}

impl KindFilter {
    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            Self::Any => true,
            Self::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

impl From<EventKind> for KindFilter {
    fn from(kind: EventKind) -> Self {
        Self::Kinds(vec![kind])
    }
}

impl From<Vec<EventKind>> for KindFilter {
    fn from(kinds: Vec<EventKind>) -> Self {
        Self::Kinds(kinds)
    }
}

struct Entry {
    id: u64,
    filter: KindFilter,
    handler: Handler,
}

struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<Entry>>,
    tx: broadcast::Sender<NormalizedEvent>,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Registers `handler` for events matching `filter`.
    ///
    /// The handler stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the returned handle does not unsubscribe.
    pub fn subscribe<F>(&self, filter: impl Into<KindFilter>, handler: F) -> Subscription
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            id,
            filter: filter.into(),
            handler: Arc::new(handler),
        };
        lock_handlers(&self.inner).push(entry);
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Returns a broadcast receiver that sees every published event.
    pub fn receiver(&self) -> broadcast::Receiver<NormalizedEvent> {
        self.inner.tx.subscribe()
    }

    /// Number of registered synchronous handlers.
    pub fn handler_count(&self) -> usize {
        lock_handlers(&self.inner).len()
    }

    /// Delivers `event` to every matching handler, then to broadcast receivers.
    pub fn publish(&self, event: NormalizedEvent) {
        // Snapshot so handlers may subscribe/unsubscribe without deadlocking.
        let targets: Vec<Handler> = lock_handlers(&self.inner)
            .iter()
            .filter(|entry| entry.filter.matches(event.kind))
            .map(|entry| entry.handler.clone())
            .collect();

        for handler in targets {
            handler(&event);
        }

        if self.inner.tx.send(event).is_err() {
            tracing::trace!("event bus has no broadcast receivers");
        }
    }
}

fn lock_handlers(inner: &BusInner) -> std::sync::MutexGuard<'_, Vec<Entry>> {
    match inner.handlers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("event bus handler lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Removes the handler from the bus. A no-op if the bus is gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            lock_handlers(&inner).retain(|entry| entry.id != self.id);
        }
    }
}
