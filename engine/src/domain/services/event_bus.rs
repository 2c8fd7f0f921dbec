//! Event bus
//!
//! Fans textual notifications out to any number of subscribers. Delivery is
//! best-effort: a subscriber that cannot take a message within the delivery
//! timeout is dropped from the set, which closes its receiver and ends the
//! transport loop reading from it.
//!
//! - [`EventBus::broadcast`] delivers one message and reports how many
//!   subscribers took it.
//! - [`EventBus::publish`] enqueues without blocking; a dispatcher task feeds
//!   the queue through `broadcast` in order. State machines use this path.

use crate::constants::events::{DELIVERY_TIMEOUT, SUBSCRIBER_CAPACITY};
use crate::domain::ports::StateListener;
use crate::domain::ProcessState;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct EventBus {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    delivery_timeout: Duration,
    capacity: usize,
    queue: mpsc::UnboundedSender<String>,
}

/// One subscriber's end of the bus
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the bus dropped this subscriber and the
    /// buffer is drained
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl EventBus {
    /// Create a bus with the default timeout and per-subscriber buffer.
    /// Must be called from inside a tokio runtime (the dispatcher is spawned).
    pub fn new() -> Arc<Self> {
        Self::with_options(DELIVERY_TIMEOUT, SUBSCRIBER_CAPACITY)
    }

    pub fn with_options(delivery_timeout: Duration, capacity: usize) -> Arc<Self> {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            delivery_timeout,
            capacity: capacity.max(1),
            queue,
        });
        tokio::spawn(Self::dispatch(Arc::downgrade(&bus), queue_rx));
        bus
    }

    async fn dispatch(bus: Weak<Self>, mut queue_rx: mpsc::UnboundedReceiver<String>) {
        while let Some(message) = queue_rx.recv().await {
            let Some(bus) = bus.upgrade() else {
                break;
            };
            bus.broadcast(message).await;
        }
        debug!("event bus dispatcher stopped");
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.insert(id, tx);
        debug!(subscriber = id, total = subscribers.len(), "subscriber added");
        Subscription { id, rx }
    }

    /// Returns false if the subscriber was already gone
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        if removed {
            debug!(subscriber = id, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Queue a message for ordered delivery without waiting on anyone
    pub fn publish(&self, message: impl Into<String>) {
        // The receiver lives as long as the dispatcher, which outlives every
        // handle that can reach this method.
        let _ = self.queue.send(message.into());
    }

    /// Deliver `message` to every current subscriber
    ///
    /// The subscriber set is only locked to take a snapshot and to drop stalled
    /// subscribers; deliveries run concurrently outside the lock, each bounded
    /// by the delivery timeout.
    pub async fn broadcast(&self, message: impl Into<String>) -> usize {
        let message = message.into();
        let targets: Vec<(u64, mpsc::Sender<String>)> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let mut deliveries = JoinSet::new();
        for (id, tx) in targets {
            let message = message.clone();
            let timeout = self.delivery_timeout;
            deliveries.spawn(async move { (id, tx.send_timeout(message, timeout).await) });
        }

        let mut delivered = 0;
        let mut stalled = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((id, Err(SendTimeoutError::Timeout(_)))) => {
                    warn!(
                        subscriber = id,
                        timeout_ms = self.delivery_timeout.as_millis() as u64,
                        "subscriber stalled, removing it"
                    );
                    stalled.push(id);
                }
                Ok((id, Err(SendTimeoutError::Closed(_)))) => {
                    debug!(subscriber = id, "subscriber closed, removing it");
                    stalled.push(id);
                }
                Err(e) => warn!(error = %e, "delivery task failed"),
            }
        }

        if !stalled.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            for id in stalled {
                subscribers.remove(&id);
            }
        }

        delivered
    }
}

/// Publishes `"<name> state: <old> -> <new>"` for every transition
pub struct BusStateListener {
    bus: Arc<EventBus>,
}

impl BusStateListener {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl StateListener for BusStateListener {
    fn on_transition(&self, program: &str, old: ProcessState, new: ProcessState) {
        self.bus.publish(format!("{program} state: {old} -> {new}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut s1 = bus.subscribe();
        let mut s2 = bus.subscribe();

        let delivered = bus.broadcast("web add or update").await;
        assert_eq!(delivered, 2);
        assert_eq!(s1.recv().await.as_deref(), Some("web add or update"));
        assert_eq!(s2.recv().await.as_deref(), Some("web add or update"));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.broadcast("nobody listens").await, 0);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_removed_others_still_receive() {
        let bus = EventBus::with_options(Duration::from_millis(100), 1);

        // Never drained: the first message fills its buffer, the second stalls.
        let mut stalled = bus.subscribe();

        let mut readers = Vec::new();
        for _ in 0..3 {
            let mut sub = bus.subscribe();
            readers.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(msg) = sub.recv().await {
                    got.push(msg);
                    if got.len() == 2 {
                        break;
                    }
                }
                got
            }));
        }
        assert_eq!(bus.subscriber_count(), 4);

        assert_eq!(bus.broadcast("first").await, 4);
        let started = std::time::Instant::now();
        assert_eq!(bus.broadcast("second").await, 3);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(bus.subscriber_count(), 3);

        for reader in readers {
            let got = timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
            assert_eq!(got, vec!["first".to_string(), "second".to_string()]);
        }

        // Buffered message still readable, then the channel reports closed.
        assert_eq!(stalled.recv().await.as_deref(), Some("first"));
        assert_eq!(stalled.recv().await, None);
    }

    #[tokio::test]
    async fn test_default_bus_drops_subscriber_once_its_buffer_is_full() {
        let bus = EventBus::new();
        let mut stalled = bus.subscribe();
        let mut reader = bus.subscribe();

        for i in 0..SUBSCRIBER_CAPACITY {
            assert_eq!(bus.broadcast(format!("event {i}")).await, 2);
            assert_eq!(reader.recv().await, Some(format!("event {i}")));
        }
        assert_eq!(bus.subscriber_count(), 2);

        // The stalling broadcast is the one that evicts.
        let started = std::time::Instant::now();
        assert_eq!(bus.broadcast("overflow").await, 1);
        assert!(started.elapsed() >= DELIVERY_TIMEOUT);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(reader.recv().await.as_deref(), Some("overflow"));

        let mut buffered = 0;
        while stalled.recv().await.is_some() {
            buffered += 1;
        }
        assert_eq!(buffered, SUBSCRIBER_CAPACITY);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        drop(sub);
        assert_eq!(bus.broadcast("hello").await, 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        assert_eq!(bus.broadcast("gone").await, 0);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        for i in 0..20 {
            bus.publish(format!("event {i}"));
        }
        for i in 0..20 {
            let msg = timeout(Duration::from_secs(1), sub.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg, format!("event {i}"));
        }
    }

    #[tokio::test]
    async fn test_state_listener_message_format() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let listener = BusStateListener::new(bus.clone());
        listener.on_transition("web", ProcessState::Stopped, ProcessState::Starting);

        let msg = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, "web state: stopped -> starting");
    }
}
