//! Maps canonical events to `ON`/`OFF` publishes on `<camera>/<type>`.

use std::sync::Arc;

use onvif_events::{CameraEndpoint, CanonicalEvent};
use tracing::{debug, warn};

use crate::mqtt::{MqttTransport, TransportError};

pub const ON: &str = "ON";
pub const OFF: &str = "OFF";

#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn MqttTransport>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn MqttTransport>) -> Self {
        Self { transport }
    }

    /// Publish the state change for one event.
    ///
    /// With a positive pulse duration configured for the event type this
    /// publishes `ON` and schedules `OFF` after the duration, whatever the
    /// reported state. Otherwise an explicit `false` publishes `OFF` and
    /// anything else publishes `ON`.
    ///
    /// Scheduled `OFF`s are never cancelled. A second event inside the
    /// window schedules its own `OFF` and the first one still fires.
    pub async fn apply(
        &self,
        camera: &CameraEndpoint,
        event: CanonicalEvent,
    ) -> Result<(), TransportError> {
        let topic = format!("{}/{}", camera.name, event.event_type);

        if let Some(duration) = camera.pulse_duration(event.event_type) {
            debug!(%topic, ?duration, "Pulse");
            self.transport.publish(&topic, ON.into(), false).await?;

            let transport = self.transport.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Err(e) = transport.publish(&topic, OFF.into(), false).await {
                    warn!(%topic, "Failed to publish scheduled OFF: {e}");
                }
            });
            return Ok(());
        }

        let payload = match event.state {
            Some(false) => OFF,
            _ => ON,
        };
        debug!(%topic, payload, "State");
        self.transport.publish(&topic, payload.into(), false).await
    }
}
