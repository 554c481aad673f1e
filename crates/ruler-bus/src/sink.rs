//! Command sinks: fire-and-forget publishers for one topic

use ruler_core::{Payload, Topic};
use std::collections::VecDeque;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::transport::{Lifecycle, SharedTransport};

/// Number of commands kept while the transport is disconnected
pub const REPLAY_CAPACITY: usize = 100;

/// A publisher for exactly one topic
///
/// [`CommandSink::send`] never blocks and never fails. Commands raised while
/// the transport is down are held in a bounded buffer (oldest dropped first)
/// and flushed in order once the transport reports a connect. Cloning the
/// sink shares the same buffer and publishing task.
#[derive(Clone)]
pub struct CommandSink {
    topic: Topic,
    tx: mpsc::UnboundedSender<Payload>,
}

impl CommandSink {
    /// Create a sink publishing to `topic`
    pub fn to_topic(transport: SharedTransport, topic: impl Into<Topic>) -> Self {
        Self::with_capacity(transport, topic, REPLAY_CAPACITY)
    }

    /// Create a sink with a specific replay buffer size
    pub fn with_capacity(
        transport: SharedTransport,
        topic: impl Into<Topic>,
        capacity: usize,
    ) -> Self {
        let topic = topic.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let publisher = Publisher {
            topic: topic.clone(),
            lifecycle: transport.lifecycle(),
            transport,
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        };
        tokio::spawn(publisher.run(rx));

        Self { topic, tx }
    }

    /// The topic this sink publishes to
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Queue a value for publishing
    pub fn send(&self, value: impl Into<Payload>) {
        let payload = value.into();
        if self.tx.send(payload).is_err() {
            warn!(topic = %self.topic, "Command sink publisher has stopped");
        }
    }
}

/// Background task owning the replay buffer
struct Publisher {
    topic: Topic,
    transport: SharedTransport,
    lifecycle: broadcast::Receiver<Lifecycle>,
    pending: VecDeque<Payload>,
    capacity: usize,
}

impl Publisher {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Payload>) {
        let mut lifecycle_open = true;

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(payload) => self.handle(payload).await,
                        None => {
                            debug!(topic = %self.topic, "All command sink handles dropped");
                            break;
                        }
                    }
                }
                event = self.lifecycle.recv(), if lifecycle_open => {
                    match event {
                        Ok(Lifecycle::Connected) | Ok(Lifecycle::Reconnected) => self.flush().await,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // A missed connect is picked up by the next send
                            if self.transport.is_connected() {
                                self.flush().await;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => lifecycle_open = false,
                    }
                }
            }
        }
    }

    async fn handle(&mut self, payload: Payload) {
        if self.transport.is_connected() {
            // Keep order: anything still buffered goes out first
            self.flush().await;
            if self.pending.is_empty() {
                self.publish_or_buffer(payload).await;
                return;
            }
        }
        self.buffer(payload);
    }

    async fn publish_or_buffer(&mut self, payload: Payload) {
        debug!(topic = %self.topic, %payload, "Publishing command");
        if let Err(e) = self.transport.publish(&self.topic, payload.encode()).await {
            warn!(topic = %self.topic, error = %e, "Publish failed, buffering command");
            self.pending.push_front(payload);
            self.trim();
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        info!(topic = %self.topic, count = self.pending.len(), "Flushing buffered commands");
        while let Some(payload) = self.pending.pop_front() {
            if let Err(e) = self.transport.publish(&self.topic, payload.encode()).await {
                warn!(topic = %self.topic, error = %e, "Flush interrupted");
                self.pending.push_front(payload);
                return;
            }
        }
    }

    fn buffer(&mut self, payload: Payload) {
        debug!(topic = %self.topic, %payload, "Transport not ready, buffering command");
        self.pending.push_back(payload);
        self.trim();
    }

    fn trim(&mut self) {
        while self.pending.len() > self.capacity {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(topic = %self.topic, %dropped, "Replay buffer full, dropping oldest command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalBus, Transport};
    use std::sync::Arc;
    use std::time::Duration;

    async fn drain(rx: &mut broadcast::Receiver<crate::RawMessage>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Ok(msg)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            out.push(String::from_utf8(msg.payload).unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_when_connected() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe(&Topic::from("cmnd/eg-flur/POWER")).await.unwrap();
        let sink = CommandSink::to_topic(bus.clone(), "cmnd/eg-flur/POWER");

        sink.send("ON");
        sink.send(240);

        assert_eq!(drain(&mut rx).await, vec!["ON", "240"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffers_until_connected() {
        let bus = Arc::new(LocalBus::disconnected());
        let mut rx = bus.subscribe(&Topic::from("cmnd/x/POWER")).await.unwrap();
        let sink = CommandSink::to_topic(bus.clone(), "cmnd/x/POWER");

        sink.send("ON");
        sink.send("OFF");
        assert!(drain(&mut rx).await.is_empty());

        bus.set_connected(true);
        assert_eq!(drain(&mut rx).await, vec!["ON", "OFF"]);

        sink.send("TOGGLE");
        assert_eq!(drain(&mut rx).await, vec!["TOGGLE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_drops_oldest_when_full() {
        let bus = Arc::new(LocalBus::disconnected());
        let mut rx = bus.subscribe(&Topic::from("t")).await.unwrap();
        let sink = CommandSink::with_capacity(bus.clone(), "t", 2);

        sink.send("1");
        sink.send("2");
        sink.send("3");
        tokio::task::yield_now().await;

        bus.set_connected(true);
        assert_eq!(drain(&mut rx).await, vec!["2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuffers_across_reconnect() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe(&Topic::from("t")).await.unwrap();
        let sink = CommandSink::to_topic(bus.clone(), "t");

        sink.send("before");
        assert_eq!(drain(&mut rx).await, vec!["before"]);

        bus.set_connected(false);
        sink.send("during");
        assert!(drain(&mut rx).await.is_empty());

        bus.set_connected(true);
        assert_eq!(drain(&mut rx).await, vec!["during"]);
    }

    #[test]
    fn test_replay_capacity_at_least_one_hundred() {
        assert!(REPLAY_CAPACITY >= 100);
    }
}
