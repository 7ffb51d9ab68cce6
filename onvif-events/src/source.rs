//! The event source abstraction shared by pull and push delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::{EventError, HandlerError};
use crate::types::{CameraEndpoint, CanonicalEvent};

/// Receives canonical events for one camera.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: CanonicalEvent) -> Result<(), HandlerError>;
}

/// A delivery mechanism that feeds a camera's events to a handler.
///
/// Pull and push subscriptions both implement this, so camera startup does
/// not care which one a camera is configured for.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Start delivering events for `camera` to `handler`.
    ///
    /// Returns once the source is running; any background work continues
    /// until the returned handle is stopped.
    async fn start(
        &self,
        camera: &CameraEndpoint,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SourceHandle, EventError>;
}

/// Handle to a running event source.
///
/// Stopping is cooperative: the flag is checked between iterations and any
/// request already in flight is allowed to finish.
#[derive(Debug)]
pub struct SourceHandle {
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SourceHandle {
    /// Wrap a stop flag and the task that watches it, if the source runs one.
    pub fn new(stopped: Arc<AtomicBool>, task: Option<JoinHandle<()>>) -> Self {
        Self { stopped, task }
    }

    /// Ask the source to stop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Wait for the background task, if any, to finish.
    ///
    /// Call [`stop`](Self::stop) first or this waits forever.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Event source task ended abnormally");
            }
        }
    }
}

/// Hand a batch of events to a handler in order.
///
/// A failing event is logged and the rest of the batch still dispatches.
pub(crate) async fn dispatch_batch(
    camera: &str,
    handler: &dyn EventHandler,
    events: Vec<CanonicalEvent>,
) {
    for event in events {
        tracing::debug!(
            camera,
            event_type = %event.event_type,
            state = ?event.state,
            "Dispatching event"
        );
        if let Err(e) = handler.handle_event(event).await {
            tracing::warn!(camera, event_type = %event.event_type, error = %e, "Event handler failed");
        }
    }
}
