//! Event sources: decoded, multicast topic streams

use ruler_core::{Message, Payload, Topic};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use crate::transport::{BusResult, Transport};

/// Default capacity of the decoded message channel
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A hot stream of decoded messages for exactly one topic
///
/// Payloads are decoded once, when they leave the transport, and shared by
/// every [`Subscription`]. A late subscriber only sees messages that arrive
/// after it subscribed.
pub struct EventSource {
    topic: Topic,
    sender: broadcast::Sender<Message>,
}

impl EventSource {
    /// Subscribe to `topic` on the transport and start decoding
    pub async fn of_topic<T>(transport: &T, topic: impl Into<Topic>) -> BusResult<Self>
    where
        T: Transport + ?Sized,
    {
        let topic = topic.into();
        let mut raw = transport.subscribe(&topic).await?;
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);

        let tx = sender.clone();
        let source_topic = topic.clone();
        tokio::spawn(async move {
            loop {
                match raw.recv().await {
                    Ok(raw) => {
                        let payload = Payload::decode(&raw.payload);
                        debug!(topic = %raw.topic, %payload, "Received message");
                        // No subscribers is fine, the stream is hot
                        let _ = tx.send(Message::new(raw.topic, payload));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = %source_topic, "Event source lagged by {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(topic = %source_topic, "Transport subscription closed");
                        break;
                    }
                }
            }
        });

        Ok(Self { topic, sender })
    }

    /// The topic this source delivers
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Start receiving messages from now on
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            topic: self.topic.clone(),
            rx: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One consumer's view of an [`EventSource`]
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<Message>,
}

impl Subscription {
    /// The topic this subscription delivers
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Receive the next message
    ///
    /// Returns None once the source has shut down. Messages dropped because
    /// this consumer fell behind are skipped with a warning.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = %self.topic, "Subscription lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Merge several subscriptions into one stream tagged with the input index
///
/// Ordering within one input is preserved; ordering across inputs follows
/// arrival.
pub fn merge(subscriptions: Vec<Subscription>) -> mpsc::Receiver<(usize, Message)> {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_CAPACITY);

    for (index, mut subscription) in subscriptions.into_iter().enumerate() {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                if tx.send((index, message)).await.is_err() {
                    trace!(topic = %subscription.topic, "Merged stream dropped");
                    break;
                }
            }
        });
    }

    rx
}
