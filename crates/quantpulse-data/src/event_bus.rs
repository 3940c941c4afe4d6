//! Typed publish/subscribe event bus.
//!
//! Dispatch is keyed by [`EventKind`], an exact match on the event's
//! concrete type. Handlers for a kind run sequentially in subscription
//! order, each awaited in place, and a failing handler never stops its
//! siblings. One dispatch gate serializes whole publish calls, so two
//! concurrent publishers cannot interleave their handler chains.
//!
//! Handlers do not publish from inside a dispatch. They return follow-up
//! events, which the bus queues and dispatches after the current handler
//! chain completes.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, error};

use quantpulse_core::{EventKind, SystemEvent};

/// Events a handler wants dispatched after the current chain finishes
pub type HandlerResult = anyhow::Result<Vec<SystemEvent>>;

type BoxedHandler = Box<dyn Fn(SystemEvent) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone)]
struct HandlerSlot {
    id: u64,
    name: Arc<str>,
    handler: Arc<BoxedHandler>,
}

type SubscriberMap = HashMap<EventKind, Vec<HandlerSlot>>;

/// Kind-keyed event bus
pub struct EventBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    dispatch_gate: Mutex<()>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            dispatch_gate: Mutex::new(()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribe a handler to an event kind.
    ///
    /// `name` identifies the handler in logs. Returns a [`Subscription`]
    /// whose `unsubscribe` removes exactly this registration.
    pub fn subscribe<F, Fut>(
        &self,
        kind: EventKind,
        name: impl Into<String>,
        handler: F,
    ) -> Subscription
    where
        F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let slot = HandlerSlot {
            id,
            name: Arc::from(name.into()),
            handler: Arc::new(Box::new(move |event| Box::pin(handler(event)))),
        };
        if let Ok(mut map) = self.subscribers.write() {
            map.entry(kind).or_default().push(slot);
        }
        Subscription {
            subscribers: Arc::clone(&self.subscribers),
            kind,
            id,
        }
    }

    /// Publish an event to all subscribers of its kind.
    ///
    /// Follow-up events returned by handlers are dispatched in FIFO order
    /// once the triggering event's handler chain has completed.
    pub async fn publish(&self, event: SystemEvent) {
        let mut pending = VecDeque::new();
        pending.push_back(event);
        while let Some(event) = pending.pop_front() {
            pending.extend(self.dispatch(event).await);
        }
    }

    /// Get the number of subscribers for an event kind
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .map(|map| map.get(&kind).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Run one event through its handler chain, collecting follow-ups.
    async fn dispatch(&self, event: SystemEvent) -> Vec<SystemEvent> {
        let kind = event.kind();

        // Snapshot outside the gate: handlers registered or removed during
        // this dispatch take effect from the next publish on.
        let snapshot: Vec<HandlerSlot> = self
            .subscribers
            .read()
            .map(|map| map.get(&kind).cloned().unwrap_or_default())
            .unwrap_or_default();

        if snapshot.is_empty() {
            debug!(event = kind.as_str(), "no subscribers");
            return Vec::new();
        }

        let mut follow_ups = Vec::new();
        let _gate = self.dispatch_gate.lock().await;
        for slot in &snapshot {
            match (slot.handler)(event.clone()).await {
                Ok(events) => follow_ups.extend(events),
                Err(e) => {
                    error!(
                        handler = %slot.name,
                        event = kind.as_str(),
                        error = %e,
                        "event handler failed"
                    );
                }
            }
        }
        follow_ups
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered handler
pub struct Subscription {
    subscribers: Arc<RwLock<SubscriberMap>>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Remove the handler this subscription registered.
    ///
    /// Has no retroactive effect on a publish already in flight.
    pub fn unsubscribe(self) {
        if let Ok(mut map) = self.subscribers.write() {
            if let Some(slots) = map.get_mut(&self.kind) {
                slots.retain(|slot| slot.id != self.id);
            }
        }
    }
}
