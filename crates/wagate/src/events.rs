//! Ordered publish/subscribe of client events.
//!
//! Every subscriber sees events in publication order. Dropping a
//! [`Subscription`] unsubscribes it.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use wagate_protocol::{ClientEvent, EventKind};

struct Subscriber {
    id: u64,
    filter: Option<EventKind>,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fan-out of [`ClientEvent`]s to any number of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Subscribers whose receiving side is gone are pruned.
    pub fn publish(&self, event: ClientEvent) {
        let kind = event.kind();
        let mut subscribers = self.inner.lock();
        subscribers.retain(|s| {
            if s.filter.is_some_and(|f| f != kind) {
                return true;
            }
            s.tx.send(event.clone()).is_ok()
        });
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Subscribe to events of one kind only.
    pub fn subscribe_to(&self, kind: EventKind) -> Subscription {
        self.register(Some(kind))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    fn register(&self, filter: Option<EventKind>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().push(Subscriber { id, filter, tx });
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }
}

/// Receiving handle for an [`EventBus`]. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is gone and drained.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Next already-published event, if any.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().retain(|s| s.id != self.id);
        }
    }
}
