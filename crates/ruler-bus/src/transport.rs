//! The publish/subscribe contract consumed by the engine

use async_trait::async_trait;
use ruler_core::Topic;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: Topic, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: Topic, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Undecoded bytes as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: Topic,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<Topic>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Connection lifecycle notifications
///
/// The engine logs these; reconnect policy belongs to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Connected,
    Reconnected,
    Error(String),
    Closed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Connected => write!(f, "connected"),
            Lifecycle::Reconnected => write!(f, "reconnected"),
            Lifecycle::Error(e) => write!(f, "error: {}", e),
            Lifecycle::Closed => write!(f, "closed"),
        }
    }
}

/// A topic-addressed publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Subscribe to one topic
    ///
    /// Delivery is at-most-once: messages published while disconnected are
    /// not replayed after a reconnect.
    async fn subscribe(&self, topic: &Topic) -> BusResult<broadcast::Receiver<RawMessage>>;

    /// Publish bytes to one topic
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> BusResult<()>;

    /// Whether publishes are currently possible
    fn is_connected(&self) -> bool;

    /// Subscribe to connection lifecycle notifications
    fn lifecycle(&self) -> broadcast::Receiver<Lifecycle>;
}

/// Thread-safe transport handle shared by all sources and sinks
pub type SharedTransport = Arc<dyn Transport>;
