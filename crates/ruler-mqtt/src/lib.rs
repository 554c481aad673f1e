//! MQTT transport for mqtt-ruler
//!
//! Implements the [`Transport`] contract over one shared broker connection.
//! Reconnects are left to the rumqttc event loop; after every ConnAck all
//! known topics are subscribed again, and messages published in between are
//! not replayed.

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use ruler_bus::{BusError, BusResult, Lifecycle, RawMessage, Transport};
use ruler_core::Topic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default channel capacity for topic subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    /// Client id prefix; a ULID is appended per connection
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Pause after a failed poll before the event loop retries
    pub reconnect_delay: Duration,
    /// Capacity of the request channel into the event loop
    pub request_capacity: usize,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: "mqtt-ruler".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(2000),
            request_capacity: 64,
        }
    }

    /// Build the rumqttc options, generating a unique client id
    fn options(&self) -> MqttOptions {
        let client_id = format!("{}-{}", self.client_id, ulid::Ulid::new());
        let mut opts = MqttOptions::new(client_id, &self.host, self.port);
        opts.set_keep_alive(self.keep_alive);

        if let (Some(u), Some(p)) = (self.username.clone(), self.password.clone()) {
            opts.set_credentials(u, p);
        }

        opts
    }
}

/// Shared state between the transport handle and its event loop task
struct Shared {
    /// Map of subscribed topics to their broadcast senders
    routes: DashMap<Topic, broadcast::Sender<RawMessage>>,
    connected: AtomicBool,
    lifecycle: broadcast::Sender<Lifecycle>,
}

/// The topic bus over an MQTT broker
pub struct MqttTransport {
    client: AsyncClient,
    shared: Arc<Shared>,
    event_task: JoinHandle<()>,
}

impl MqttTransport {
    /// Start connecting to the broker
    ///
    /// Returns immediately; the connection is established in the background
    /// and reported through [`Transport::lifecycle`].
    pub fn connect(settings: MqttSettings) -> Self {
        let opts = settings.options();
        info!(
            host = %settings.host,
            port = settings.port,
            client_id = %opts.client_id(),
            "Connecting to MQTT broker"
        );

        let (client, event_loop) = AsyncClient::new(opts, settings.request_capacity);
        let (lifecycle, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            routes: DashMap::new(),
            connected: AtomicBool::new(false),
            lifecycle,
        });

        let event_task = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            shared.clone(),
            settings.reconnect_delay,
        ));

        Self {
            client,
            shared,
            event_task,
        }
    }

    /// Disconnect from the broker and stop the event loop
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "Disconnect request failed");
        }
        self.event_task.abort();
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, topic: &Topic) -> BusResult<broadcast::Receiver<RawMessage>> {
        let mut created = false;
        let rx = self
            .shared
            .routes
            .entry(topic.clone())
            .or_insert_with(|| {
                created = true;
                let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
                tx
            })
            .subscribe();

        // While disconnected the next ConnAck subscribes every route
        if created && self.is_connected() {
            self.client
                .subscribe(topic.as_str(), QoS::AtMostOnce)
                .await
                .map_err(|e| BusError::Subscribe {
                    topic: topic.clone(),
                    reason: e.to_string(),
                })?;
            info!(%topic, "Subscription requested");
        }

        Ok(rx)
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> BusResult<()> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        self.client
            .publish(topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.clone(),
                reason: e.to_string(),
            })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    shared: Arc<Shared>,
    reconnect_delay: Duration,
) {
    let mut connects: u64 = 0;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connects += 1;
                shared.connected.store(true, Ordering::SeqCst);
                let event = if connects == 1 {
                    Lifecycle::Connected
                } else {
                    Lifecycle::Reconnected
                };
                debug!(code = ?ack.code, "ConnAck received");

                resubscribe(&client, &shared.routes);

                let _ = shared.lifecycle.send(event);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!(topic = %publish.topic, bytes = publish.payload.len(), "Incoming publish");
                if let Some(sender) = shared.routes.get(publish.topic.as_str()) {
                    let _ = sender.send(RawMessage::new(
                        publish.topic.as_str(),
                        publish.payload.to_vec(),
                    ));
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(pkid = ack.pkid, "Subscription success");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                if shared.connected.swap(false, Ordering::SeqCst) {
                    let _ = shared.lifecycle.send(Lifecycle::Closed);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error");
                let was_connected = shared.connected.swap(false, Ordering::SeqCst);
                let _ = shared.lifecycle.send(Lifecycle::Error(e.to_string()));
                if was_connected {
                    let _ = shared.lifecycle.send(Lifecycle::Closed);
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

/// One filter per known route, for a single SUBSCRIBE request
fn route_filters(routes: &DashMap<Topic, broadcast::Sender<RawMessage>>) -> Vec<SubscribeFilter> {
    routes
        .iter()
        .map(|route| SubscribeFilter::new(route.key().to_string(), QoS::AtMostOnce))
        .collect()
}

/// Subscribe every route again after a ConnAck
///
/// The request is sent from its own task so it can wait for room in the
/// request channel while the event loop keeps draining it.
fn resubscribe(client: &AsyncClient, routes: &DashMap<Topic, broadcast::Sender<RawMessage>>) {
    let filters = route_filters(routes);
    if filters.is_empty() {
        return;
    }

    let count = filters.len();
    let client = client.clone();
    tokio::spawn(async move {
        match client.subscribe_many(filters).await {
            Ok(()) => debug!(count, "Resubscribe requested"),
            Err(e) => warn!(count, error = %e, "Resubscribe failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_are_unique() {
        let settings = MqttSettings::new("localhost", 1883);
        let a = settings.options();
        let b = settings.options();

        assert!(a.client_id().starts_with("mqtt-ruler-"));
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_credentials_require_both_parts() {
        let mut settings = MqttSettings::new("localhost", 1883);
        settings.username = Some("mqtt".to_string());
        assert!(settings.options().credentials().is_none());

        settings.password = Some("secret".to_string());
        assert_eq!(
            settings.options().credentials(),
            Some(("mqtt".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_route_filters_cover_every_route() {
        let routes = DashMap::new();
        for i in 0..200 {
            let (tx, _) = broadcast::channel(1);
            routes.insert(Topic::from(format!("stat/device-{i}/POWER")), tx);
        }

        let filters = route_filters(&routes);
        assert_eq!(filters.len(), 200);
        assert!(filters.iter().all(|f| f.qos == QoS::AtMostOnce));
        assert!(filters.iter().any(|f| f.path == "stat/device-199/POWER"));
    }

    #[tokio::test]
    async fn test_unreachable_broker_reports_error() {
        let mut settings = MqttSettings::new("127.0.0.1", 1);
        settings.reconnect_delay = Duration::from_millis(10);
        let transport = MqttTransport::connect(settings);
        let mut lifecycle = transport.lifecycle();

        // Subscribing before a connection is deferred, not an error
        assert!(transport.subscribe(&Topic::from("stat/a/POWER")).await.is_ok());

        let result = transport
            .publish(&Topic::from("cmnd/a/POWER"), b"ON".to_vec())
            .await;
        assert!(matches!(result, Err(BusError::NotConnected)));

        let event = tokio::time::timeout(Duration::from_secs(10), lifecycle.recv())
            .await
            .expect("lifecycle event")
            .unwrap();
        assert!(matches!(event, Lifecycle::Error(_)));
        assert!(!transport.is_connected());
    }
}
