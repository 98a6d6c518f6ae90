// Message Bus - topic-addressed pub/sub with glob pattern subscriptions
// At-most-once delivery over bounded per-subscriber queues

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A published unit: topic plus opaque JSON payload.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

struct Subscriber {
    pattern: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

/// Topic-addressed pub/sub. Patterns are `:`-separated segments where `*`
/// matches exactly one segment (`kline:*:*` matches `kline:XAUUSD:M1`).
///
/// Delivery is at-most-once: each subscriber owns a bounded queue and a full
/// queue drops the message for that subscriber only. Order is preserved per
/// topic per publisher. There is no persistence; late subscribers rely on the
/// hub's snapshot mechanism for completeness.
pub struct MessageBus {
    subscribers: RwLock<Vec<Subscriber>>,
    capacity: usize,
    stats: RwLock<BusStatsInner>,
}

#[derive(Debug, Clone, Default)]
struct BusStatsInner {
    published: u64,
    delivered: u64,
    dropped: u64,
}

/// Snapshot of bus statistics.
#[derive(Debug, Clone)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscriber_count: usize,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(1_024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            stats: RwLock::new(BusStatsInner::default()),
        }
    }

    /// Subscribe to all topics matching `pattern`. The returned receiver gets
    /// its own bounded queue; dropping it unsubscribes.
    pub fn subscribe(&self, pattern: &str) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.write().push(Subscriber {
            pattern: pattern.split(':').map(str::to_string).collect(),
            tx,
        });
        debug!(pattern = pattern, "Bus subscription added");
        rx
    }

    /// Publish to every matching subscriber. Never blocks: a full subscriber
    /// queue drops the message for that subscriber, counted and logged.
    pub fn publish(&self, topic: &str, payload: String) {
        self.stats.write().published += 1;

        let mut closed = false;
        {
            let subscribers = self.subscribers.read();
            for sub in subscribers.iter() {
                if !pattern_matches(&sub.pattern, topic) {
                    continue;
                }
                match sub.tx.try_send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                }) {
                    Ok(()) => self.stats.write().delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.stats.write().dropped += 1;
                        warn!(topic = topic, "Subscriber queue full, dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed = true,
                }
            }
        }

        if closed {
            self.subscribers.write().retain(|sub| !sub.tx.is_closed());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> BusStats {
        let stats = self.stats.read();
        BusStats {
            published: stats.published,
            delivered: stats.delivered,
            dropped: stats.dropped,
            subscriber_count: self.subscribers.read().len(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern_matches(pattern: &[String], topic: &str) -> bool {
    let segments: Vec<&str> = topic.split(':').collect();
    if pattern.len() != segments.len() {
        return false;
    }
    pattern
        .iter()
        .zip(segments)
        .all(|(p, s)| p == "*" || p == s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(raw: &str) -> Vec<String> {
        raw.split(':').map(str::to_string).collect()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches(&pattern("kline:*:*"), "kline:XAUUSD:M1"));
        assert!(pattern_matches(&pattern("kline:XAUUSD:M1"), "kline:XAUUSD:M1"));
        assert!(!pattern_matches(&pattern("kline:XAUUSD:M1"), "kline:XAUUSD:M5"));
        assert!(!pattern_matches(&pattern("kline:*:*"), "indicator:XAUUSD:M1:green_arrow"));
        assert!(pattern_matches(
            &pattern("indicator:*:*:green_arrow"),
            "indicator:EURUSD:H1:green_arrow"
        ));
        // segment counts must line up
        assert!(!pattern_matches(&pattern("kline:*"), "kline:XAUUSD:M1"));
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("kline:*:*");

        bus.publish("kline:XAUUSD:M1", "{\"a\":1}".to_string());
        bus.publish("indicator:XAUUSD:M1:green_arrow", "{}".to_string());

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.topic, "kline:XAUUSD:M1");
        assert_eq!(msg.payload, "{\"a\":1}");
        // the indicator topic must not have been delivered
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_in_order_delivery_per_topic() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe("kline:XAUUSD:M1");

        for i in 0..10 {
            bus.publish("kline:XAUUSD:M1", format!("{}", i));
        }
        for i in 0..10 {
            assert_eq!(rx.try_recv().unwrap().payload, format!("{}", i));
        }
    }

    #[tokio::test]
    async fn test_drop_on_full_is_counted() {
        let bus = MessageBus::with_capacity(2);
        let mut rx = bus.subscribe("kline:*:*");

        bus.publish("kline:XAUUSD:M1", "1".to_string());
        bus.publish("kline:XAUUSD:M1", "2".to_string());
        bus.publish("kline:XAUUSD:M1", "3".to_string()); // dropped

        let stats = bus.stats();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 1);

        assert_eq!(rx.try_recv().unwrap().payload, "1");
        assert_eq!(rx.try_recv().unwrap().payload, "2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_pruned() {
        let bus = MessageBus::new();
        let rx = bus.subscribe("kline:*:*");
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish("kline:XAUUSD:M1", "{}".to_string());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
