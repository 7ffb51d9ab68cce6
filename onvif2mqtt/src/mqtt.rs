//! MQTT transport.
//!
//! Everything the bridge publishes goes through [`MqttTransport`], which
//! takes topic suffixes and prefixes them with the configured base topic.
//! [`RumqttTransport`] is the broker-backed implementation;
//! [`RecordingTransport`] keeps messages in memory for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;

/// Suffix of the bridge-wide availability topic.
pub const BRIDGE_STATUS_TOPIC: &str = "status";

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 256;
const INBOUND_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The broker rejected or could not queue a request.
#[derive(Debug, thiserror::Error)]
#[error("MQTT request failed: {0}")]
pub struct TransportError(#[from] rumqttc::ClientError);

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic with the base topic prefix removed
    pub topic_suffix: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe surface shared by every camera task.
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Publish `payload` to `<base_topic>/<topic_suffix>`.
    async fn publish(
        &self,
        topic_suffix: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Subscribe to `<base_topic>/<topic_suffix>`.
    async fn subscribe(&self, topic_suffix: &str) -> Result<(), TransportError>;
}

fn full_topic(base_topic: &str, suffix: &str) -> String {
    format!("{}/{}", base_topic.trim_end_matches('/'), suffix)
}

fn strip_base<'a>(base_topic: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(base_topic.trim_end_matches('/'))
        .and_then(|rest| rest.strip_prefix('/'))
}

/// Queue an inbound publish for the command handler without waiting.
///
/// Returns `false` when the message was dropped: outside the base topic,
/// queue full or receiver gone.
fn forward_inbound(
    inbound_tx: &mpsc::Sender<InboundMessage>,
    base_topic: &str,
    topic: &str,
    payload: &[u8],
) -> bool {
    let Some(suffix) = strip_base(base_topic, topic) else {
        debug!(%topic, "Ignoring message outside base topic");
        return false;
    };
    let message = InboundMessage {
        topic_suffix: suffix.to_string(),
        payload: payload.to_vec(),
    };
    match inbound_tx.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            warn!(topic = %message.topic_suffix, "Command queue full; dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Inbound receiver dropped");
            false
        }
    }
}

/// [`MqttTransport`] backed by a `rumqttc` client.
///
/// The event loop runs in its own task. It re-subscribes every known topic
/// after each (re)connect and forwards inbound publishes to the channel
/// returned by [`RumqttTransport::connect`].
pub struct RumqttTransport {
    client: AsyncClient,
    base_topic: String,
    subscriptions: Arc<Mutex<Vec<String>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttTransport {
    pub fn connect(settings: &MqttSettings) -> (Self, mpsc::Receiver<InboundMessage>) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.server, settings.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_last_will(LastWill::new(
            full_topic(&settings.base_topic, BRIDGE_STATUS_TOPIC),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(username) = settings.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let subscriptions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        info!(
            server = %settings.server,
            port = settings.port,
            client_id = %settings.client_id,
            "Connecting to MQTT broker"
        );

        let task = {
            let client = client.clone();
            let base_topic = settings.base_topic.clone();
            let subscriptions = subscriptions.clone();
            tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT connected");
                            let status = full_topic(&base_topic, BRIDGE_STATUS_TOPIC);
                            if let Err(e) =
                                client.try_publish(status, QoS::AtLeastOnce, true, "online")
                            {
                                warn!("Failed to publish bridge status: {e}");
                            }
                            for topic in subscriptions.lock().await.iter() {
                                if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                                    error!("Failed to subscribe to {topic}: {e}");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(msg))) => {
                            forward_inbound(&inbound_tx, &base_topic, &msg.topic, &msg.payload);
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                            info!("MQTT disconnected");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT event loop error: {e}");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            })
        };

        let transport = Self {
            client,
            base_topic: settings.base_topic.clone(),
            subscriptions,
            event_loop: Mutex::new(Some(task)),
        };
        (transport, inbound_rx)
    }

    /// Mark the bridge offline, disconnect and wait for the event loop to end.
    pub async fn shutdown(&self) {
        let status = full_topic(&self.base_topic, BRIDGE_STATUS_TOPIC);
        if let Err(e) = self
            .client
            .publish(status, QoS::AtLeastOnce, true, "offline")
            .await
        {
            warn!("Failed to publish bridge status: {e}");
        }
        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to disconnect from MQTT broker: {e}");
        }
        if let Some(task) = self.event_loop.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("MQTT event loop did not stop in time");
            }
        }
    }
}

#[async_trait]
impl MqttTransport for RumqttTransport {
    async fn publish(
        &self,
        topic_suffix: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        let topic = full_topic(&self.base_topic, topic_suffix);
        debug!(%topic, bytes = payload.len(), retain, "Publishing");
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic_suffix: &str) -> Result<(), TransportError> {
        let topic = full_topic(&self.base_topic, topic_suffix);
        self.subscriptions.lock().await.push(topic.clone());
        self.client.subscribe(&topic, QoS::AtLeastOnce).await?;
        info!(%topic, "Subscribed");
        Ok(())
    }
}

/// A message captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub topic_suffix: String,
    pub payload: Vec<u8>,
    pub retain: bool,
    pub at: tokio::time::Instant,
}

impl RecordedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// In-memory [`MqttTransport`] recording everything sent through it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    messages: Mutex<Vec<RecordedMessage>>,
    subscriptions: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().await.clone()
    }

    /// `(topic_suffix, payload)` pairs of text messages, in publish order.
    pub async fn texts(&self) -> Vec<(String, String)> {
        self.messages
            .lock()
            .await
            .iter()
            .map(|m| (m.topic_suffix.clone(), m.payload_str().to_string()))
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }
}

#[async_trait]
impl MqttTransport for RecordingTransport {
    async fn publish(
        &self,
        topic_suffix: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.messages.lock().await.push(RecordedMessage {
            topic_suffix: topic_suffix.to_string(),
            payload,
            retain,
            at: tokio::time::Instant::now(),
        });
        Ok(())
    }

    async fn subscribe(&self, topic_suffix: &str) -> Result<(), TransportError> {
        self.subscriptions
            .lock()
            .await
            .push(topic_suffix.to_string());
        Ok(())
    }
}
