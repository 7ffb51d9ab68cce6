//! Per-camera event handling.

use std::sync::Arc;

use async_trait::async_trait;
use onvif_events::{CameraEndpoint, CanonicalEvent, EventHandler, HandlerError};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::mqtt::{MqttTransport, TransportError};
use crate::publisher::EventPublisher;
use crate::snapshot::{SnapshotError, Snapshotter};

/// Topic suffix (after the camera name) that triggers a snapshot.
pub const SNAPSHOT_COMMAND: &str = "command/snapshot";

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One configured camera: publishes its events and snapshots.
pub struct Camera {
    config: CameraConfig,
    endpoint: CameraEndpoint,
    publisher: EventPublisher,
    transport: Arc<dyn MqttTransport>,
    snapshotter: Snapshotter,
}

impl Camera {
    pub fn new(
        config: CameraConfig,
        transport: Arc<dyn MqttTransport>,
        snapshotter: Snapshotter,
    ) -> Self {
        Self {
            endpoint: config.endpoint(),
            publisher: EventPublisher::new(transport.clone()),
            config,
            transport,
            snapshotter,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &CameraEndpoint {
        &self.endpoint
    }

    pub fn command_topic(&self) -> String {
        format!("{}/{}", self.config.name, SNAPSHOT_COMMAND)
    }

    /// Publish a retained availability message on `<name>/status`.
    pub async fn publish_status(&self, online: bool) -> Result<(), TransportError> {
        let payload = if online { "online" } else { "offline" };
        self.transport
            .publish(&format!("{}/status", self.config.name), payload.into(), true)
            .await
    }

    /// Capture a snapshot and publish the raw bytes on `<name>/image`.
    pub async fn snapshot_and_publish(&self) -> Result<(), CameraError> {
        let snapshot = self.config.snapshot.as_ref().ok_or(SnapshotError::NoAddress)?;
        let image = self.snapshotter.capture(snapshot).await?;
        debug!(camera = %self.config.name, bytes = image.len(), "Publishing snapshot");
        self.transport
            .publish(&format!("{}/image", self.config.name), image, false)
            .await?;
        Ok(())
    }

    /// Take a snapshot, logging instead of returning failures.
    pub async fn snapshot_logged(&self) {
        if let Err(e) = self.snapshot_and_publish().await {
            warn!(camera = %self.config.name, "Snapshot failed: {e}");
        }
    }

    fn snapshot_on_event(&self) -> bool {
        self.config.snapshot.as_ref().is_some_and(|s| s.on_event)
    }
}

#[async_trait]
impl EventHandler for Camera {
    async fn handle_event(&self, event: CanonicalEvent) -> Result<(), HandlerError> {
        info!(
            camera = %self.config.name,
            event = %event.event_type,
            state = ?event.state,
            "Event"
        );
        self.publisher
            .apply(&self.endpoint, event)
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;

        if self.snapshot_on_event() {
            self.snapshot_logged().await;
        }
        Ok(())
    }
}
