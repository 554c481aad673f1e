//! Rule dispatcher
//!
//! Owns the shared transport and clock, hands out one [`EventSource`] and one
//! [`CommandSink`] per topic no matter how many rules use it, and spawns
//! every configured rule as its own task.

use ruler_bus::{CommandSink, EventSource, Lifecycle, SharedTransport, Subscription};
use ruler_core::{SharedClock, Topic};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RuleResult;
use crate::rule::RuleConfig;

pub struct Dispatcher {
    transport: SharedTransport,
    clock: SharedClock,
    sources: HashMap<Topic, EventSource>,
    sinks: HashMap<Topic, CommandSink>,
}

impl Dispatcher {
    pub fn new(transport: SharedTransport, clock: SharedClock) -> Self {
        Self {
            transport,
            clock,
            sources: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    /// A new subscription to `topic`, sharing the topic's event source
    pub async fn subscribe(&mut self, topic: &Topic) -> RuleResult<Subscription> {
        if let Some(source) = self.sources.get(topic) {
            return Ok(source.subscribe());
        }

        debug!(topic = %topic, "Creating event source");
        let source = EventSource::of_topic(self.transport.as_ref(), topic.clone()).await?;
        let subscription = source.subscribe();
        self.sources.insert(topic.clone(), source);
        Ok(subscription)
    }

    /// The command sink for `topic`
    pub fn sink(&mut self, topic: &Topic) -> CommandSink {
        let transport = &self.transport;
        self.sinks
            .entry(topic.clone())
            .or_insert_with(|| CommandSink::to_topic(transport.clone(), topic.clone()))
            .clone()
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Start every rule
    ///
    /// Fails on the first rule that cannot be wired; rules started before it
    /// keep running.
    pub async fn start(&mut self, rules: Vec<RuleConfig>) -> RuleResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(rules.len());

        for rule in rules {
            info!(rule = %rule.name(), kind = rule.kind(), "Starting rule");
            handles.push(rule.start(self).await?);
        }

        info!(
            rules = handles.len(),
            sources = self.sources.len(),
            sinks = self.sinks.len(),
            "Rules started"
        );
        Ok(handles)
    }

    /// Log transport lifecycle events until the transport goes away
    pub fn watch_lifecycle(&self) -> JoinHandle<()> {
        let mut events = self.transport.lifecycle();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(Lifecycle::Connected) => info!("Bus connected"),
                    Ok(Lifecycle::Reconnected) => info!("Bus reconnected"),
                    Ok(Lifecycle::Error(reason)) => error!(%reason, "Bus error"),
                    Ok(Lifecycle::Closed) => warn!("Bus connection closed"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Lifecycle watcher lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruler_bus::LocalBus;
    use ruler_core::SystemClock;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(LocalBus::new()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_sources_are_shared_per_topic() {
        let mut dispatcher = dispatcher();
        let topic = Topic::from("stat/eg-flur/POWER");

        let _a = dispatcher.subscribe(&topic).await.unwrap();
        let _b = dispatcher.subscribe(&topic).await.unwrap();
        let _c = dispatcher.subscribe(&Topic::from("stat/og-flur/POWER")).await.unwrap();

        assert_eq!(dispatcher.source_count(), 2);
    }

    #[tokio::test]
    async fn test_sinks_are_shared_per_topic() {
        let mut dispatcher = dispatcher();
        let topic = Topic::from("cmnd/eg-flur/POWER");

        let a = dispatcher.sink(&topic);
        let b = dispatcher.sink(&topic);
        assert_eq!(a.topic(), b.topic());
        assert_eq!(dispatcher.sink_count(), 1);
    }
}
