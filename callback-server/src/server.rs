//! HTTP server for receiving ONVIF push notifications.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use warp::http::{Method, StatusCode};
use warp::Filter;

use crate::router::{NotificationHandler, NotifyRouter};

/// Default listening port for the notification server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default path prefix under which cameras POST notifications.
pub const DEFAULT_BASE_PATH: &str = "/onvif/notify";

/// Largest notification body accepted; anything bigger is answered with `413`.
pub const MAX_NOTIFICATION_BYTES: usize = 1024 * 1024;

/// Errors raised while starting the callback server.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The listening socket could not be bound
    #[error("Failed to bind notification server on port {port}: {reason}")]
    Bind { port: u16, reason: String },
}

/// Listening configuration for the notification server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyServerConfig {
    /// Port to bind on all interfaces; 0 picks an ephemeral port
    pub port: u16,
    /// Path prefix notifications must start with
    pub base_path: String,
}

impl Default for NotifyServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            base_path: DEFAULT_BASE_PATH.to_string(),
        }
    }
}

/// HTTP callback server for receiving camera event notifications.
///
/// The `CallbackServer` binds to a local port and accepts `POST` requests under
/// the configured base path. Each accepted request body is handed to the
/// [`NotificationHandler`] and the server answers `200 OK` once the handler
/// returns. Any other method or path gets a `404`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use callback_server::{
///     CallbackServer, NotificationHandler, NotificationPayload, NotifyServerConfig,
/// };
///
/// struct Printer;
///
/// #[async_trait::async_trait]
/// impl NotificationHandler for Printer {
///     async fn handle_notification(&self, payload: NotificationPayload) -> Result<(), String> {
///         println!("{:?}: {} bytes", payload.camera_name, payload.body.len());
///         Ok(())
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let server = CallbackServer::start(NotifyServerConfig::default(), Arc::new(Printer))
///         .await
///         .expect("Failed to start notification server");
///     println!("Listening on {}", server.local_addr());
/// }
/// ```
pub struct CallbackServer {
    /// The address the server is bound to
    local_addr: SocketAddr,
    /// Router shared with the request filter
    router: Arc<NotifyRouter>,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind the notification server and start serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`CallbackError::Bind`] if the port cannot be bound.
    pub async fn start(
        config: NotifyServerConfig,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<Self, CallbackError> {
        let router = Arc::new(NotifyRouter::new(config.base_path.clone(), handler));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let routes = Self::routes(router.clone());
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);

        let (local_addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(bind_addr, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|e| CallbackError::Bind {
                port: config.port,
                reason: e.to_string(),
            })?;

        tracing::info!(
            addr = %local_addr,
            base_path = %config.base_path,
            "Notification server listening"
        );

        let server_handle = tokio::spawn(server);

        Ok(Self {
            local_addr,
            router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// The address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port the server is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The router used to classify requests.
    pub fn router(&self) -> &Arc<NotifyRouter> {
        &self.router
    }

    /// Shutdown the server gracefully, waiting for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }

    /// Build the catch-all filter; method and path checks happen in
    /// [`handle_request`] so every miss gets the same 404 body.
    fn routes(
        router: Arc<NotifyRouter>,
    ) -> impl Filter<Extract = (warp::reply::WithStatus<&'static str>,), Error = warp::Rejection>
           + Clone {
        let body = warp::header::optional::<u64>("content-length")
            .and(warp::body::stream())
            .and_then(read_body);

        warp::method()
            .and(warp::path::full())
            .and(body)
            .and_then(
                move |method: Method,
                      path: warp::path::FullPath,
                      body: Result<Bytes, StatusCode>| {
                    let router = router.clone();
                    async move {
                        Ok::<_, Infallible>(handle_request(&router, method, path.as_str(), body).await)
                    }
                },
            )
    }
}

/// Collect a request body of at most [`MAX_NOTIFICATION_BYTES`].
///
/// A declared `Content-Length` over the limit is refused before anything is
/// read; chunked bodies are cut off once they pass it.
async fn read_body<S, B>(
    declared: Option<u64>,
    body: S,
) -> Result<Result<Bytes, StatusCode>, Infallible>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if declared.is_some_and(|length| length > MAX_NOTIFICATION_BYTES as u64) {
        return Ok(Err(StatusCode::PAYLOAD_TOO_LARGE));
    }

    let mut body = std::pin::pin!(body);
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read notification body");
                return Ok(Err(StatusCode::BAD_REQUEST));
            }
        };
        if collected.len() + chunk.remaining() > MAX_NOTIFICATION_BYTES {
            return Ok(Err(StatusCode::PAYLOAD_TOO_LARGE));
        }
        collected.put(chunk);
    }
    Ok(Ok(collected.freeze()))
}

/// Answer a single request.
async fn handle_request(
    router: &NotifyRouter,
    method: Method,
    path: &str,
    body: Result<Bytes, StatusCode>,
) -> warp::reply::WithStatus<&'static str> {
    tracing::debug!(%method, path, "Notification request");

    if !router.accepts(&method, path) {
        return warp::reply::with_status("Not Found", StatusCode::NOT_FOUND);
    }

    let body = match body {
        Ok(body) => body,
        Err(status) => {
            tracing::warn!(path, %status, "Rejected notification body");
            return warp::reply::with_status(status.canonical_reason().unwrap_or("Error"), status);
        }
    };

    let body = String::from_utf8_lossy(&body).into_owned();

    match router.route_notification(path, body).await {
        Ok(()) => warp::reply::with_status("OK", StatusCode::OK),
        Err(e) => {
            tracing::warn!(path, error = %e, "Notification handling failed");
            warp::reply::with_status("Error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(sizes: &[usize]) -> impl Stream<Item = Result<Bytes, warp::Error>> {
        let chunks: Vec<_> = sizes.iter().map(|n| Ok(Bytes::from(vec![b'x'; *n]))).collect();
        stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_read_body_collects_chunks() {
        let body = read_body(None, chunks(&[3, 4])).await.unwrap();
        assert_eq!(body, Ok(Bytes::from_static(b"xxxxxxx")));

        let body = read_body(Some(0), chunks(&[])).await.unwrap();
        assert_eq!(body, Ok(Bytes::new()));
    }

    #[tokio::test]
    async fn test_read_body_at_limit_is_accepted() {
        let half = MAX_NOTIFICATION_BYTES / 2;
        let body = read_body(None, chunks(&[half, MAX_NOTIFICATION_BYTES - half]))
            .await
            .unwrap();
        assert_eq!(body.map(|b| b.len()), Ok(MAX_NOTIFICATION_BYTES));
    }

    #[tokio::test]
    async fn test_read_body_over_limit_without_length() {
        let half = MAX_NOTIFICATION_BYTES / 2;
        let body = read_body(None, chunks(&[half, half, 1])).await.unwrap();
        assert_eq!(body, Err(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[tokio::test]
    async fn test_read_body_declared_length_over_limit() {
        let declared = Some(MAX_NOTIFICATION_BYTES as u64 + 1);
        let body = read_body(declared, chunks(&[1])).await.unwrap();
        assert_eq!(body, Err(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[test]
    fn test_default_config() {
        let config = NotifyServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.base_path, "/onvif/notify");
    }

    #[test]
    fn test_bind_error_display() {
        let error = CallbackError::Bind {
            port: 80,
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to bind notification server on port 80: permission denied"
        );
    }
}
