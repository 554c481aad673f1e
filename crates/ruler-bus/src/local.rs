//! In-process transport
//!
//! Routes publishes straight to subscribers of the same topic. Connection
//! state can be toggled to exercise buffering and reconnect behaviour.

use async_trait::async_trait;
use dashmap::DashMap;
use ruler_core::Topic;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::transport::{BusError, BusResult, Lifecycle, RawMessage, Transport};

/// Default channel capacity for topic subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An in-memory topic bus
pub struct LocalBus {
    /// Map of topics to their broadcast senders
    topics: DashMap<Topic, broadcast::Sender<RawMessage>>,
    /// Lifecycle notifications
    lifecycle: broadcast::Sender<Lifecycle>,
    /// Whether publishes are delivered
    connected: AtomicBool,
    /// Number of times the bus went from disconnected to connected
    connects: AtomicU64,
    /// Channel capacity
    capacity: usize,
}

impl LocalBus {
    /// Create a connected bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a connected bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (lifecycle, _) = broadcast::channel(16);
        Self {
            topics: DashMap::new(),
            lifecycle,
            connected: AtomicBool::new(true),
            connects: AtomicU64::new(1),
            capacity,
        }
    }

    /// Create a bus that starts disconnected
    pub fn disconnected() -> Self {
        let bus = Self::new();
        bus.connected.store(false, Ordering::SeqCst);
        bus.connects.store(0, Ordering::SeqCst);
        bus
    }

    /// Simulate the connection going up or down
    ///
    /// Emits `Connected` on the first connect, `Reconnected` afterwards, and
    /// `Closed` on disconnect.
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was == connected {
            return;
        }

        let event = if connected {
            if self.connects.fetch_add(1, Ordering::SeqCst) == 0 {
                Lifecycle::Connected
            } else {
                Lifecycle::Reconnected
            }
        } else {
            Lifecycle::Closed
        };

        debug!(%event, "Local bus lifecycle");
        let _ = self.lifecycle.send(event);
    }

    /// Get the number of topics with subscribers
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn subscribe(&self, topic: &Topic) -> BusResult<broadcast::Receiver<RawMessage>> {
        trace!(%topic, "Subscribing to topic");

        Ok(self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe())
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> BusResult<()> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        trace!(%topic, bytes = payload.len(), "Publishing");
        if let Some(sender) = self.topics.get(topic) {
            // Ignore send errors - they just mean no active receivers
            let _ = sender.send(RawMessage::new(topic.clone(), payload));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let bus = LocalBus::new();
        let topic = Topic::from("stat/eg-flur/POWER");
        let mut rx = bus.subscribe(&topic).await.unwrap();

        bus.publish(&topic, b"ON".to_vec()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, topic);
        assert_eq!(received.payload, b"ON".to_vec());
    }

    #[tokio::test]
    async fn test_no_cross_topic_pollution() {
        let bus = LocalBus::new();
        let mut rx_a = bus.subscribe(&Topic::from("a")).await.unwrap();
        let mut rx_b = bus.subscribe(&Topic::from("b")).await.unwrap();

        bus.publish(&Topic::from("a"), b"1".to_vec()).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap().payload, b"1".to_vec());
        assert!(rx_b.try_recv().is_err());
        assert_eq!(bus.topic_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_fails() {
        let bus = LocalBus::disconnected();
        let result = bus.publish(&Topic::from("a"), b"1".to_vec()).await;
        assert!(matches!(result, Err(BusError::NotConnected)));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let bus = LocalBus::disconnected();
        let mut events = bus.lifecycle();

        bus.set_connected(true);
        bus.set_connected(true);
        bus.set_connected(false);
        bus.set_connected(true);

        assert_eq!(events.recv().await.unwrap(), Lifecycle::Connected);
        assert_eq!(events.recv().await.unwrap(), Lifecycle::Closed);
        assert_eq!(events.recv().await.unwrap(), Lifecycle::Reconnected);
        assert!(events.try_recv().is_err());
    }
}
