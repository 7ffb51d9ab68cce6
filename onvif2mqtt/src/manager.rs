//! Startup and shutdown of every configured camera.

use std::sync::Arc;
use std::time::Duration;

use callback_server::{CallbackError, CallbackServer};
use onvif_events::{
    EventMode, EventSource, PullPointSource, PushDispatcher, PushSource, SourceHandle,
};
use soap_client::SoapClient;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::camera::{Camera, SNAPSHOT_COMMAND};
use crate::config::AppConfig;
use crate::mqtt::{InboundMessage, MqttTransport};
use crate::snapshot::Snapshotter;

const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Failed to start notification server: {0}")]
    NotifyServer(#[from] CallbackError),
}

/// Owns the running cameras and everything started on their behalf.
pub struct CameraManager {
    cameras: Vec<Arc<Camera>>,
    sources: Mutex<Vec<SourceHandle>>,
    periodic: Mutex<Vec<JoinHandle<()>>>,
    server: Mutex<Option<CallbackServer>>,
}

impl CameraManager {
    /// Start all cameras with PullPoint polling at the default cadence.
    pub async fn start(
        config: &AppConfig,
        transport: Arc<dyn MqttTransport>,
        snapshotter: Snapshotter,
    ) -> Result<Self, ManagerError> {
        let pull_source = Arc::new(PullPointSource::new(SoapClient::new()));
        Self::start_with_pull_source(config, transport, snapshotter, pull_source).await
    }

    /// Start all cameras, using `pull_source` for pull-mode cameras.
    ///
    /// Only a notification server that fails to bind is fatal. A camera
    /// whose event source fails to start is logged and keeps its snapshot
    /// command and periodic snapshots.
    pub async fn start_with_pull_source(
        config: &AppConfig,
        transport: Arc<dyn MqttTransport>,
        snapshotter: Snapshotter,
        pull_source: Arc<dyn EventSource>,
    ) -> Result<Self, ManagerError> {
        let (server, push_source) = match &config.notify {
            Some(notify) => {
                let dispatcher = Arc::new(PushDispatcher::new());
                let server = CallbackServer::start(notify.server_config(), dispatcher.clone()).await?;
                info!(
                    port = server.port(),
                    base_path = %notify.base_path,
                    "Notification server listening"
                );
                let source = PushSource::new(SoapClient::new(), dispatcher, notify.target());
                (Some(server), Some(source))
            }
            None => (None, None),
        };

        let mut cameras = Vec::with_capacity(config.cameras.len());
        let mut sources = Vec::new();
        let mut periodic = Vec::new();

        for camera_config in &config.cameras {
            let camera = Arc::new(Camera::new(
                camera_config.clone(),
                transport.clone(),
                snapshotter.clone(),
            ));
            let name = camera.name().to_string();

            if let Err(e) = transport.subscribe(&camera.command_topic()).await {
                warn!(camera = %name, "Failed to subscribe to snapshot command: {e}");
            }

            let source: Option<&dyn EventSource> = match camera.endpoint().event_mode {
                EventMode::Pull => Some(pull_source.as_ref()),
                EventMode::Push => push_source.as_ref().map(|s| s as &dyn EventSource),
            };
            match source {
                Some(source) => match source.start(camera.endpoint(), camera.clone()).await {
                    Ok(handle) => {
                        info!(camera = %name, mode = ?camera.endpoint().event_mode, "Events started");
                        sources.push(handle);
                    }
                    Err(e) => warn!(camera = %name, "Failed to start events: {e}"),
                },
                None => warn!(
                    camera = %name,
                    "Push mode needs a [notify] section; camera will not receive events"
                ),
            }

            let interval = camera_config.snapshot.as_ref().map_or(0, |s| s.interval);
            if interval > 0 {
                periodic.push(spawn_periodic_snapshots(
                    camera.clone(),
                    Duration::from_secs(interval),
                ));
            }

            if let Err(e) = camera.publish_status(true).await {
                warn!(camera = %name, "Failed to publish status: {e}");
            }
            cameras.push(camera);
        }

        info!(cameras = cameras.len(), "Cameras started");
        Ok(Self {
            cameras,
            sources: Mutex::new(sources),
            periodic: Mutex::new(periodic),
            server: Mutex::new(server),
        })
    }

    pub fn cameras(&self) -> &[Arc<Camera>] {
        &self.cameras
    }

    pub fn camera(&self, name: &str) -> Option<&Arc<Camera>> {
        self.cameras.iter().find(|c| c.name() == name)
    }

    /// Port of the notification server, when one is running.
    pub async fn notify_port(&self) -> Option<u16> {
        self.server.lock().await.as_ref().map(CallbackServer::port)
    }

    /// Handle an inbound MQTT message. Returns whether it was a known command.
    pub async fn handle_command(&self, message: &InboundMessage) -> bool {
        let Some(name) = message
            .topic_suffix
            .strip_suffix(SNAPSHOT_COMMAND)
            .and_then(|rest| rest.strip_suffix('/'))
        else {
            debug!(topic = %message.topic_suffix, "Ignoring message");
            return false;
        };

        match self.camera(name) {
            Some(camera) => {
                info!(camera = %name, "Snapshot requested");
                camera.snapshot_logged().await;
                true
            }
            None => {
                warn!(camera = %name, "Snapshot requested for unknown camera");
                false
            }
        }
    }

    /// Stop every source and task, then mark cameras offline.
    pub async fn shutdown(&self) {
        let sources: Vec<SourceHandle> = self.sources.lock().await.drain(..).collect();
        for handle in &sources {
            handle.stop();
        }
        for handle in sources {
            if tokio::time::timeout(SOURCE_STOP_TIMEOUT, handle.join())
                .await
                .is_err()
            {
                warn!("Event source did not stop in time");
            }
        }

        for task in self.periodic.lock().await.drain(..) {
            task.abort();
        }

        for camera in &self.cameras {
            if let Err(e) = camera.publish_status(false).await {
                warn!(camera = %camera.name(), "Failed to publish status: {e}");
            }
        }

        if let Some(server) = self.server.lock().await.take() {
            server.shutdown().await;
        }
        info!("Cameras stopped");
    }
}

/// Snapshot `camera` every `period`, starting one period from now.
fn spawn_periodic_snapshots(camera: Arc<Camera>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            debug!(camera = %camera.name(), "Periodic snapshot");
            camera.snapshot_logged().await;
        }
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{AppConfig, SnapshotConfig};
    use crate::mqtt::RecordingTransport;

    fn stream_camera(transport: Arc<RecordingTransport>) -> Arc<Camera> {
        let mut config = AppConfig::parse("[cameras.yard]\n").unwrap().cameras.remove(0);
        config.snapshot = Some(SnapshotConfig {
            address: Some("rtsp://10.0.0.1/stream".to_string()),
            ..SnapshotConfig::default()
        });
        Arc::new(Camera::new(
            config,
            transport,
            Snapshotter::new().with_ffmpeg("echo"),
        ))
    }

    #[tokio::test]
    async fn test_periodic_snapshots_wait_one_period() {
        let transport = Arc::new(RecordingTransport::new());
        let task = spawn_periodic_snapshots(
            stream_camera(transport.clone()),
            Duration::from_millis(200),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.messages().await.is_empty());

        tokio::time::timeout(Duration::from_secs(10), async {
            while transport.messages().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timeout waiting for periodic snapshots");
        task.abort();

        let messages = transport.messages().await;
        assert!(messages.iter().all(|m| m.topic_suffix == "yard/image" && !m.retain));
    }
}
