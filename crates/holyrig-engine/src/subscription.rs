//! Subscription manager: fans status changes out to clients.
//!
//! Subscriptions are (sink, rig, field-set) tuples. Each rig task emits
//! [`StatusEvent`]s with only the fields that changed; the manager
//! intersects those with every matching subscription and queues one
//! notification per affected subscriber.
//!
//! Delivery is per-subscriber and ordered: each subscriber has its own
//! bounded queue and a drain task that feeds its [`StatusSink`]. A slow
//! subscriber loses the *oldest* pending updates once its queue is full and
//! is marked degraded; nobody else is affected, and the rig tasks never
//! block on delivery.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use holyrig_core::{LinkEvent, Result, StatusEvent, Value};

/// One notification queued for one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Status fields changed on the subscribed rig.
    Status {
        rig_id: String,
        subscription_id: String,
        /// Only the fields the subscription asked for.
        updates: BTreeMap<String, Value>,
    },
    /// The subscribed rig's link came up or went down.
    Link {
        rig_id: String,
        subscription_id: String,
        connected: bool,
    },
}

/// Where a subscriber's notifications go.
///
/// The RPC server implements this with a UDP socket and the client's
/// address; tests implement it with a channel.
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Deliver one notification. Errors are logged, not retried.
    async fn deliver(&self, outbound: Outbound) -> Result<()>;
}

struct SubscriberQueue {
    items: VecDeque<Outbound>,
    degraded: bool,
    closed: bool,
}

struct Subscriber {
    id: String,
    rig_id: String,
    fields: BTreeSet<String>,
    sink: Arc<dyn StatusSink>,
    queue: Mutex<SubscriberQueue>,
    wakeup: Notify,
}

impl Subscriber {
    /// Queue one notification, dropping the oldest on overflow.
    fn push(&self, item: Outbound, limit: usize) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.closed {
                return;
            }
            if queue.items.len() >= limit {
                queue.items.pop_front();
                if !queue.degraded {
                    queue.degraded = true;
                    warn!(
                        subscription = %self.id,
                        rig = %self.rig_id,
                        "subscriber queue overflow, dropping oldest updates"
                    );
                }
            }
            queue.items.push_back(item);
        }
        self.wakeup.notify_one();
    }

    /// Drain loop: pop and deliver until closed.
    async fn drain(self: Arc<Self>) {
        loop {
            let item = {
                let mut queue = self.queue.lock().unwrap();
                match queue.items.pop_front() {
                    Some(item) => Some(item),
                    None if queue.closed => break,
                    None => None,
                }
            };
            match item {
                Some(item) => {
                    if let Err(err) = self.sink.deliver(item).await {
                        warn!(subscription = %self.id, error = %err, "notification delivery failed");
                    }
                }
                None => self.wakeup.notified().await,
            }
        }
        debug!(subscription = %self.id, "subscriber drain stopped");
    }
}

struct Inner {
    queue_limit: usize,
    next_id: AtomicU64,
    subscribers: Mutex<BTreeMap<String, Arc<Subscriber>>>,
    /// Last link flag forwarded per rig, to suppress repeats.
    link_state: Mutex<BTreeMap<String, bool>>,
}

/// The subscription registry and fan-out engine. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Create a manager whose per-subscriber queues hold at most
    /// `queue_limit` pending notifications.
    pub fn new(queue_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue_limit,
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(BTreeMap::new()),
                link_state: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a subscription and spawn its drain task.
    ///
    /// Returns the subscription id handed back to the client (`sub_<n>`).
    pub fn subscribe(
        &self,
        rig_id: impl Into<String>,
        fields: BTreeSet<String>,
        sink: Arc<dyn StatusSink>,
    ) -> String {
        let n = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("sub_{n}");
        let subscriber = Arc::new(Subscriber {
            id: id.clone(),
            rig_id: rig_id.into(),
            fields,
            sink,
            queue: Mutex::new(SubscriberQueue {
                items: VecDeque::new(),
                degraded: false,
                closed: false,
            }),
            wakeup: Notify::new(),
        });
        tokio::spawn(Arc::clone(&subscriber).drain());
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .insert(id.clone(), subscriber);
        debug!(subscription = %id, "subscription created");
        id
    }

    /// Remove a subscription. Returns `false` for unknown ids.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let Some(subscriber) = self.inner.subscribers.lock().unwrap().remove(id) else {
            return false;
        };
        subscriber.queue.lock().unwrap().closed = true;
        subscriber.wakeup.notify_one();
        true
    }

    /// Whether a subscriber has lost updates to backpressure.
    pub fn is_degraded(&self, id: &str) -> bool {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .get(id)
            .map(|s| s.queue.lock().unwrap().degraded)
            .unwrap_or(false)
    }

    /// Fan one status event out to every intersecting subscription.
    pub fn publish(&self, event: &StatusEvent) {
        let subscribers = self.inner.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            if subscriber.rig_id != event.rig_id {
                continue;
            }
            let updates: BTreeMap<String, Value> = event
                .values
                .iter()
                .filter(|(field, _)| subscriber.fields.contains(*field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect();
            if updates.is_empty() {
                continue;
            }
            subscriber.push(
                Outbound::Status {
                    rig_id: event.rig_id.clone(),
                    subscription_id: subscriber.id.clone(),
                    updates,
                },
                self.inner.queue_limit,
            );
        }
    }

    /// Forward a link transition to the rig's subscribers, suppressing
    /// repeats of the same up/down flag.
    pub fn publish_link(&self, event: &LinkEvent) {
        let connected = event.state.is_connected();
        {
            let mut link_state = self.inner.link_state.lock().unwrap();
            if link_state.insert(event.rig_id.clone(), connected) == Some(connected) {
                return;
            }
        }
        let subscribers = self.inner.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            if subscriber.rig_id != event.rig_id {
                continue;
            }
            subscriber.push(
                Outbound::Link {
                    rig_id: event.rig_id.clone(),
                    subscription_id: subscriber.id.clone(),
                    connected,
                },
                self.inner.queue_limit,
            );
        }
    }

    /// Consume rig event streams until both close.
    pub async fn run(
        self,
        mut status_rx: mpsc::Receiver<StatusEvent>,
        mut link_rx: mpsc::Receiver<LinkEvent>,
    ) {
        loop {
            tokio::select! {
                event = status_rx.recv() => match event {
                    Some(event) => self.publish(&event),
                    None => break,
                },
                event = link_rx.recv() => match event {
                    Some(event) => self.publish_link(&event),
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holyrig_core::RigState;

    struct ChannelSink {
        tx: mpsc::Sender<Outbound>,
    }

    #[async_trait]
    impl StatusSink for ChannelSink {
        async fn deliver(&self, outbound: Outbound) -> Result<()> {
            self.tx
                .send(outbound)
                .await
                .map_err(|_| holyrig_core::Error::ConnectionLost)
        }
    }

    fn sink(capacity: usize) -> (Arc<ChannelSink>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ChannelSink { tx }), rx)
    }

    fn freq_event(rig: &str, freq: u32) -> StatusEvent {
        StatusEvent {
            rig_id: rig.to_string(),
            values: BTreeMap::from([("freq".to_string(), Value::Int(freq))]),
        }
    }

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn delivers_only_intersecting_fields() {
        let manager = SubscriptionManager::new(32);
        let (test_sink, mut rx) = sink(8);
        let id = manager.subscribe("main", fields(&["freq", "mode"]), test_sink);

        manager.publish(&StatusEvent {
            rig_id: "main".to_string(),
            values: BTreeMap::from([
                ("freq".to_string(), Value::Int(14_250_000)),
                ("mode".to_string(), Value::Member("USB".to_string())),
                ("transmit".to_string(), Value::Bool(false)),
            ]),
        });

        let Outbound::Status {
            rig_id,
            subscription_id,
            updates,
        } = rx.recv().await.unwrap()
        else {
            panic!("expected a status notification");
        };
        assert_eq!(rig_id, "main");
        assert_eq!(subscription_id, id);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates["freq"], Value::Int(14_250_000));
        assert_eq!(updates["mode"], Value::Member("USB".to_string()));
    }

    #[tokio::test]
    async fn no_notification_without_intersection() {
        let manager = SubscriptionManager::new(32);
        let (test_sink, mut rx) = sink(8);
        manager.subscribe("main", fields(&["mode"]), test_sink);

        manager.publish(&freq_event("main", 14_250_000));
        manager.publish(&freq_event("other", 7_000_000));

        // Nothing intersects; queue stays empty.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn each_change_delivered_exactly_once_in_order() {
        let manager = SubscriptionManager::new(32);
        let (test_sink, mut rx) = sink(8);
        manager.subscribe("main", fields(&["freq"]), test_sink);

        for freq in [1, 2, 3] {
            manager.publish(&freq_event("main", freq));
        }

        for expected in [1, 2, 3] {
            let Outbound::Status { updates, .. } = rx.recv().await.unwrap() else {
                panic!("expected a status notification");
            };
            assert_eq!(updates["freq"], Value::Int(expected));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn independent_subscribers_get_their_own_copy() {
        let manager = SubscriptionManager::new(32);
        let (sink_a, mut rx_a) = sink(8);
        let (sink_b, mut rx_b) = sink(8);
        manager.subscribe("main", fields(&["freq"]), sink_a);
        manager.subscribe("main", fields(&["freq"]), sink_b);

        manager.publish(&freq_event("main", 42));

        assert!(matches!(rx_a.recv().await.unwrap(), Outbound::Status { .. }));
        assert!(matches!(rx_b.recv().await.unwrap(), Outbound::Status { .. }));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_marks_degraded() {
        let manager = SubscriptionManager::new(2);
        // Capacity-1 channel: one delivery buffers, the next blocks the
        // drain task, so further publishes pile up in the manager queue.
        let (test_sink, mut rx) = sink(1);
        let id = manager.subscribe("main", fields(&["freq"]), test_sink);

        manager.publish(&freq_event("main", 1));
        // Give the drain task a chance to pick up the first item.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        for freq in [2, 3, 4, 5] {
            manager.publish(&freq_event("main", freq));
        }
        assert!(manager.is_degraded(&id));

        let mut received = Vec::new();
        for _ in 0..3 {
            let Outbound::Status { updates, .. } = rx.recv().await.unwrap() else {
                panic!("expected a status notification");
            };
            if let Value::Int(freq) = updates["freq"] {
                received.push(freq);
            }
        }

        // The already-delivered first update survives; of the four queued
        // behind the blocked sink, the oldest two were dropped to keep the
        // queue at its limit.
        assert_eq!(received, vec![1, 4, 5]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let manager = SubscriptionManager::new(32);
        let (test_sink, mut rx) = sink(8);
        let id = manager.subscribe("main", fields(&["freq"]), test_sink);

        assert!(manager.unsubscribe(&id));
        assert!(!manager.unsubscribe(&id));

        manager.publish(&freq_event("main", 42));
        // The drain task has shut down; nothing arrives.
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn link_transitions_forwarded_without_repeats() {
        let manager = SubscriptionManager::new(32);
        let (test_sink, mut rx) = sink(8);
        manager.subscribe("main", fields(&["freq"]), test_sink);

        for state in [
            RigState::Initializing,
            RigState::Online,
            RigState::Online,
            RigState::NotResponding,
            RigState::NotConnected,
        ] {
            manager.publish_link(&LinkEvent {
                rig_id: "main".to_string(),
                state,
            });
        }

        // Initializing establishes "down", Online flips to "up",
        // NotResponding flips back; the repeats are suppressed.
        let mut flags = Vec::new();
        for _ in 0..3 {
            let Outbound::Link { connected, .. } = rx.recv().await.unwrap() else {
                panic!("expected a link notification");
            };
            flags.push(connected);
        }
        assert_eq!(flags, vec![false, true, false]);
        assert!(rx.try_recv().is_err());
    }
}
