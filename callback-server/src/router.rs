//! Request routing for ONVIF push notifications.
//!
//! This module provides the `NotifyRouter` which decides whether an incoming
//! HTTP request is a notification, works out which camera it is addressed to,
//! and hands the raw body to a [`NotificationHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use warp::http::Method;

/// Generic notification payload for camera event notifications.
///
/// This represents an unparsed notification that has been received via HTTP
/// POST. It carries only the request path, the camera name derived from it,
/// and the raw XML body, with no event-specific interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Request path, e.g. `/onvif/notify/front-door`
    pub path: String,
    /// Percent-decoded final path segment, if the path has one
    pub camera_name: Option<String>,
    /// The raw notification body
    pub body: String,
}

/// Consumer of notifications accepted by the server.
///
/// The server awaits the handler before responding, so a handler that returns
/// has finished dispatching. Returning an error turns the response into a 500.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle_notification(&self, payload: NotificationPayload) -> Result<(), String>;
}

/// Routes notification requests under a base path to a handler.
#[derive(Clone)]
pub struct NotifyRouter {
    base_path: String,
    handler: Arc<dyn NotificationHandler>,
}

impl NotifyRouter {
    /// Create a router accepting POSTs whose path starts with `base_path`.
    pub fn new(base_path: impl Into<String>, handler: Arc<dyn NotificationHandler>) -> Self {
        Self {
            base_path: base_path.into(),
            handler,
        }
    }

    /// The configured base path.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Whether a request with this method and path is a notification.
    pub fn accepts(&self, method: &Method, path: &str) -> bool {
        *method == Method::POST && path.starts_with(&self.base_path)
    }

    /// Extract the camera name from a notification path.
    ///
    /// The camera name is the last non-empty path segment, percent-decoded.
    /// A segment that does not decode to UTF-8 is returned as-is.
    ///
    /// # Example
    ///
    /// ```
    /// use callback_server::NotifyRouter;
    ///
    /// assert_eq!(
    ///     NotifyRouter::camera_name("/onvif/notify/front%20door"),
    ///     Some("front door".to_string())
    /// );
    /// ```
    pub fn camera_name(path: &str) -> Option<String> {
        let last = path.split('/').filter(|segment| !segment.is_empty()).last()?;
        match urlencoding::decode(last) {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(_) => Some(last.to_string()),
        }
    }

    /// Hand an accepted notification to the handler.
    pub async fn route_notification(&self, path: &str, body: String) -> Result<(), String> {
        let payload = NotificationPayload {
            path: path.to_string(),
            camera_name: Self::camera_name(path),
            body,
        };
        self.handler.handle_notification(payload).await
    }
}
