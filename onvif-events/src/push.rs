//! Push-mode subscriptions and notification dispatch.
//!
//! In push mode the camera POSTs `Notify` messages to the bridge. The
//! [`PushDispatcher`] is the callback server's handler: it classifies each
//! body and routes the events to the camera named by the request path.
//! [`PushSource`] registers cameras with the dispatcher and, when asked to,
//! creates the camera-side subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use callback_server::{NotificationHandler, NotificationPayload, DEFAULT_BASE_PATH};
use soap_client::{envelope, Credentials, SoapClient};
use tokio::sync::RwLock;

use crate::classifier::parse_notification;
use crate::discovery::discover_events_endpoint;
use crate::error::Result;
use crate::source::{dispatch_batch, EventHandler, EventSource, SourceHandle};
use crate::types::{CameraEndpoint, CanonicalEvent};

/// Initial termination time requested for push subscriptions.
pub const SUBSCRIPTION_TERMINATION: &str = "PT24H";

/// Where cameras should send notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyTarget {
    /// Externally reachable base URL of the bridge, e.g. `http://bridge.lan:8080`
    pub base_url: Option<String>,
    /// Path prefix the notification server accepts
    pub base_path: String,
}

impl Default for NotifyTarget {
    fn default() -> Self {
        Self {
            base_url: None,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }
}

/// The callback URL a camera should be subscribed with.
///
/// `None` without a public base URL. The path is the camera's configured
/// notify path or `<base_path>/<percent-encoded name>`.
///
/// ```
/// use onvif_events::{notify_url, CameraEndpoint, NotifyTarget};
///
/// let target = NotifyTarget {
///     base_url: Some("http://bridge:8080".to_string()),
///     base_path: "/onvif/notify".to_string(),
/// };
/// let camera = CameraEndpoint::new("front door");
/// assert_eq!(
///     notify_url(&target, &camera).as_deref(),
///     Some("http://bridge:8080/onvif/notify/front%20door")
/// );
/// ```
pub fn notify_url(target: &NotifyTarget, camera: &CameraEndpoint) -> Option<String> {
    let base_url = target.base_url.as_deref()?.trim_end_matches('/');
    let path = match camera.push.notify_path.as_deref() {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => format!(
            "{}/{}",
            target.base_path.trim_end_matches('/'),
            urlencoding::encode(&camera.name)
        ),
    };
    Some(format!("{base_url}{path}"))
}

/// Ask the camera to POST notifications to `notify_url` for 24 hours.
///
/// Any HTTP response counts as success, including a SOAP fault; only a
/// transport failure returns `false`.
pub async fn create_push_subscription(
    client: &SoapClient,
    events_xaddr: &str,
    credentials: Option<&Credentials>,
    notify_url: &str,
) -> bool {
    let body = envelope::create_subscription(notify_url, SUBSCRIPTION_TERMINATION);
    match client.post(events_xaddr, body, credentials).await {
        Ok(response) => {
            let preview: String = response.chars().take(200).collect();
            tracing::debug!(events_xaddr, response = %preview, "CreateSubscription response");
            true
        }
        Err(e) => {
            tracing::warn!(events_xaddr, error = %e, "CreateSubscription failed");
            false
        }
    }
}

struct Registration {
    handler: Arc<dyn EventHandler>,
    stopped: Arc<AtomicBool>,
}

/// Routes push notifications to registered cameras by name.
#[derive(Default)]
pub struct PushDispatcher {
    cameras: RwLock<HashMap<String, Registration>>,
}

impl PushDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera's handler. A later registration for the same name
    /// replaces the earlier one.
    pub async fn register(
        &self,
        camera: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        stopped: Arc<AtomicBool>,
    ) {
        self.cameras
            .write()
            .await
            .insert(camera.into(), Registration { handler, stopped });
    }

    pub async fn is_registered(&self, camera: &str) -> bool {
        self.cameras.read().await.contains_key(camera)
    }

    /// Dispatch events to a camera's handler.
    ///
    /// Returns `false` when no active camera with that name is registered.
    pub async fn dispatch(&self, camera: &str, events: Vec<CanonicalEvent>) -> bool {
        let handler = {
            let cameras = self.cameras.read().await;
            match cameras.get(camera) {
                Some(registration) if !registration.stopped.load(Ordering::SeqCst) => {
                    registration.handler.clone()
                }
                _ => return false,
            }
        };

        dispatch_batch(camera, handler.as_ref(), events).await;
        true
    }
}

#[async_trait]
impl NotificationHandler for PushDispatcher {
    async fn handle_notification(
        &self,
        payload: NotificationPayload,
    ) -> std::result::Result<(), String> {
        let events = parse_notification(&payload.body);
        tracing::debug!(path = %payload.path, events = events.len(), "Notification received");

        let Some(camera) = payload.camera_name.as_deref() else {
            tracing::warn!(path = %payload.path, "Notification path names no camera");
            return Ok(());
        };

        if !self.dispatch(camera, events).await {
            tracing::warn!(camera, path = %payload.path, "No camera for notification path");
        }
        Ok(())
    }
}

/// Event source for cameras that push notifications to the bridge.
///
/// Starting registers the camera with the shared [`PushDispatcher`]. When the
/// camera has `auto_subscribe` set and the bridge has a public base URL, the
/// camera is also asked to create the subscription; failures there are
/// logged and the registration stays in place.
#[derive(Clone)]
pub struct PushSource {
    client: SoapClient,
    dispatcher: Arc<PushDispatcher>,
    target: NotifyTarget,
}

impl PushSource {
    pub fn new(client: SoapClient, dispatcher: Arc<PushDispatcher>, target: NotifyTarget) -> Self {
        Self {
            client,
            dispatcher,
            target,
        }
    }

    pub fn dispatcher(&self) -> &Arc<PushDispatcher> {
        &self.dispatcher
    }

    async fn auto_subscribe(&self, camera: &CameraEndpoint) {
        let Some(url) = notify_url(&self.target, camera) else {
            return;
        };

        let Some(events_xaddr) = discover_events_endpoint(&self.client, camera).await else {
            tracing::warn!(camera = %camera.name, "Could not determine events address for push subscription");
            return;
        };

        if create_push_subscription(&self.client, &events_xaddr, camera.credentials.as_ref(), &url).await
        {
            tracing::info!(camera = %camera.name, notify_url = %url, "Push subscription created");
        } else {
            tracing::warn!(camera = %camera.name, "Push subscription attempt failed");
        }
    }
}

#[async_trait]
impl EventSource for PushSource {
    async fn start(
        &self,
        camera: &CameraEndpoint,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SourceHandle> {
        let stopped = Arc::new(AtomicBool::new(false));
        self.dispatcher
            .register(camera.name.clone(), handler, stopped.clone())
            .await;
        tracing::info!(camera = %camera.name, "Registered for push notifications");

        if camera.push.auto_subscribe {
            self.auto_subscribe(camera).await;
        }

        Ok(SourceHandle::new(stopped, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::RecordingHandler;
    use crate::types::{EventType, PushOptions};

    fn target(base_url: Option<&str>) -> NotifyTarget {
        NotifyTarget {
            base_url: base_url.map(str::to_string),
            base_path: "/onvif/notify".to_string(),
        }
    }

    const MOTION_NOTIFY: &str = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body><wsnt:Notify xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2">
    <wsnt:NotificationMessage><wsnt:Message><tt:Message xmlns:tt="http://www.onvif.org/ver10/schema">
      <tt:Data><tt:SimpleItem Name="IsMotion" Value="true"/></tt:Data>
    </tt:Message></wsnt:Message></wsnt:NotificationMessage>
  </wsnt:Notify></s:Body>
</s:Envelope>"#;

    #[test]
    fn test_notify_url() {
        let camera = CameraEndpoint::new("front-door");
        assert_eq!(
            notify_url(&target(Some("http://bridge:8080/")), &camera).as_deref(),
            Some("http://bridge:8080/onvif/notify/front-door")
        );
        assert_eq!(notify_url(&target(None), &camera), None);
    }

    #[test]
    fn test_notify_url_with_path_override() {
        let camera = CameraEndpoint::new("front-door").with_push(PushOptions {
            auto_subscribe: true,
            notify_path: Some("/hooks/door".to_string()),
        });
        assert_eq!(
            notify_url(&target(Some("https://bridge.example")), &camera).as_deref(),
            Some("https://bridge.example/hooks/door")
        );
    }

    #[tokio::test]
    async fn test_create_push_subscription_accepts_any_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/onvif/Events")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::Regex("CreateSubscription".to_string()),
                mockito::Matcher::Regex("PT24H".to_string()),
                mockito::Matcher::Regex("http://bridge/onvif/notify/cam".to_string()),
            ]))
            .with_status(500)
            .with_body("<s:Fault/>")
            .create_async()
            .await;

        let xaddr = format!("{}/onvif/Events", server.url());
        assert!(
            create_push_subscription(&SoapClient::new(), &xaddr, None, "http://bridge/onvif/notify/cam")
                .await
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_push_subscription_transport_failure() {
        assert!(
            !create_push_subscription(
                &SoapClient::new(),
                "http://127.0.0.1:9/onvif/Events",
                None,
                "http://bridge/onvif/notify/cam"
            )
            .await
        );
    }

    #[tokio::test]
    async fn test_dispatcher_routes_by_camera_name() {
        let dispatcher = PushDispatcher::new();
        let handler = Arc::new(RecordingHandler::default());
        dispatcher
            .register("front door", handler.clone(), Arc::new(AtomicBool::new(false)))
            .await;

        let payload = NotificationPayload {
            path: "/onvif/notify/front%20door".to_string(),
            camera_name: Some("front door".to_string()),
            body: MOTION_NOTIFY.to_string(),
        };
        dispatcher.handle_notification(payload).await.unwrap();

        assert_eq!(
            *handler.events.lock().await,
            vec![CanonicalEvent::new(EventType::Motion, Some(true))]
        );
    }

    #[tokio::test]
    async fn test_dispatcher_ignores_unknown_and_stopped_cameras() {
        let dispatcher = PushDispatcher::new();
        let handler = Arc::new(RecordingHandler::default());
        let stopped = Arc::new(AtomicBool::new(false));
        dispatcher.register("cam", handler.clone(), stopped.clone()).await;

        let events = vec![CanonicalEvent::new(EventType::Line, None)];
        assert!(!dispatcher.dispatch("other", events.clone()).await);

        stopped.store(true, Ordering::SeqCst);
        assert!(!dispatcher.dispatch("cam", events).await);
        assert!(handler.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_accepts_invalid_body() {
        let dispatcher = PushDispatcher::new();
        let handler = Arc::new(RecordingHandler::default());
        dispatcher
            .register("cam", handler.clone(), Arc::new(AtomicBool::new(false)))
            .await;

        let payload = NotificationPayload {
            path: "/onvif/notify/cam".to_string(),
            camera_name: Some("cam".to_string()),
            body: "garbage".to_string(),
        };
        assert!(dispatcher.handle_notification(payload).await.is_ok());
        assert!(handler.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_push_source_registers_without_subscribing() {
        let dispatcher = Arc::new(PushDispatcher::new());
        let source = PushSource::new(SoapClient::new(), dispatcher.clone(), target(None));
        let camera = CameraEndpoint::new("cam").with_push(PushOptions {
            auto_subscribe: true,
            notify_path: None,
        });

        let handle = source
            .start(&camera, Arc::new(RecordingHandler::default()))
            .await
            .unwrap();

        assert!(dispatcher.is_registered("cam").await);
        handle.stop();
        assert!(!dispatcher.dispatch("cam", Vec::new()).await);
    }

    #[tokio::test]
    async fn test_push_source_auto_subscribes() {
        let mut server = mockito::Server::new_async().await;
        let capabilities = format!(
            r#"<Envelope><Body><GetCapabilitiesResponse><Capabilities><Events>
  <XAddr>{}/onvif/Events</XAddr>
</Events></Capabilities></GetCapabilitiesResponse></Body></Envelope>"#,
            server.url()
        );
        let discovery = server
            .mock("POST", "/onvif/device_service")
            .with_body(capabilities)
            .create_async()
            .await;
        let subscribe = server
            .mock("POST", "/onvif/Events")
            .match_body(mockito::Matcher::Regex(
                "http://bridge:8080/onvif/notify/cam".to_string(),
            ))
            .with_body("<ok/>")
            .create_async()
            .await;

        let dispatcher = Arc::new(PushDispatcher::new());
        let source = PushSource::new(
            SoapClient::new(),
            dispatcher.clone(),
            target(Some("http://bridge:8080")),
        );
        let camera = CameraEndpoint::new("cam")
            .with_snapshot_address(format!("{}/snapshot.jpg", server.url()))
            .with_push(PushOptions {
                auto_subscribe: true,
                notify_path: None,
            });

        source
            .start(&camera, Arc::new(RecordingHandler::default()))
            .await
            .unwrap();

        discovery.assert_async().await;
        subscribe.assert_async().await;
        assert!(dispatcher.is_registered("cam").await);
    }
}
