//! PullPoint subscriptions and the polling runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use soap_client::{envelope, Credentials, SoapClient, SoapError, XmlNode};

use crate::classifier::classify;
use crate::discovery::discover_events_endpoint;
use crate::error::{EventError, Result};
use crate::source::{dispatch_batch, EventHandler, EventSource, SourceHandle};
use crate::types::{CameraEndpoint, CanonicalEvent};

/// Fixed wait between two pulls, whatever the previous pull returned.
pub const PULL_INTERVAL: Duration = Duration::from_millis(1500);

/// `PullMessages` timeout hint.
pub const PULL_TIMEOUT: &str = "PT2S";

/// `PullMessages` message limit.
pub const PULL_MESSAGE_LIMIT: u32 = 10;

/// An active PullPoint subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSubscription {
    /// The events service the subscription was created on
    pub events_xaddr: String,
    /// Address `PullMessages` requests are sent to
    pub subscription_address: String,
}

/// Create a PullPoint subscription on the camera's events service.
///
/// # Errors
///
/// [`EventError::Soap`] on transport or XML failures and
/// [`EventError::SubscriptionFailed`] when the response carries no
/// subscription reference address.
pub async fn create_pull_point_subscription(
    client: &SoapClient,
    camera: &CameraEndpoint,
    events_xaddr: &str,
) -> Result<PullSubscription> {
    let response = client
        .call(
            events_xaddr,
            envelope::create_pull_point_subscription(),
            camera.credentials.as_ref(),
        )
        .await?;

    let address = response
        .path(&[
            "Envelope",
            "Body",
            "CreatePullPointSubscriptionResponse",
            "SubscriptionReference",
            "Address",
        ])
        .and_then(XmlNode::as_text)
        .filter(|address| !address.is_empty())
        .ok_or_else(|| EventError::SubscriptionFailed {
            camera: camera.name.clone(),
        })?;

    Ok(PullSubscription {
        events_xaddr: events_xaddr.to_string(),
        subscription_address: address.to_string(),
    })
}

/// Issue one `PullMessages` request and classify the returned batch.
pub async fn pull_messages_once(
    client: &SoapClient,
    subscription: &PullSubscription,
    credentials: Option<&Credentials>,
) -> std::result::Result<Vec<CanonicalEvent>, SoapError> {
    let response = client
        .call(
            &subscription.subscription_address,
            envelope::pull_messages(PULL_TIMEOUT, PULL_MESSAGE_LIMIT),
            credentials,
        )
        .await?;
    Ok(classify(&response))
}

/// Event source that polls a PullPoint subscription.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use onvif_events::{
///     CameraEndpoint, CanonicalEvent, EventHandler, EventSource, HandlerError, PullPointSource,
/// };
///
/// struct Print;
///
/// #[async_trait::async_trait]
/// impl EventHandler for Print {
///     async fn handle_event(&self, event: CanonicalEvent) -> Result<(), HandlerError> {
///         println!("{} -> {:?}", event.event_type, event.state);
///         Ok(())
///     }
/// }
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let camera = CameraEndpoint::new("front-door").with_host("192.168.1.20", None);
/// let handle = PullPointSource::default().start(&camera, Arc::new(Print)).await?;
/// // ...
/// handle.stop();
/// handle.join().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PullPointSource {
    client: SoapClient,
    poll_interval: Duration,
}

impl PullPointSource {
    pub fn new(client: SoapClient) -> Self {
        Self {
            client,
            poll_interval: PULL_INTERVAL,
        }
    }

    /// Override the wait between pulls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for PullPointSource {
    fn default() -> Self {
        Self::new(SoapClient::new())
    }
}

#[async_trait]
impl EventSource for PullPointSource {
    async fn start(
        &self,
        camera: &CameraEndpoint,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SourceHandle> {
        let events_xaddr = discover_events_endpoint(&self.client, camera)
            .await
            .ok_or_else(|| EventError::DiscoveryFailed {
                camera: camera.name.clone(),
            })?;

        let subscription = create_pull_point_subscription(&self.client, camera, &events_xaddr).await?;

        tracing::info!(
            camera = %camera.name,
            address = %subscription.subscription_address,
            "PullPoint subscription created"
        );

        let stopped = Arc::new(AtomicBool::new(false));
        let poller = Poller {
            client: self.client.clone(),
            camera: camera.name.clone(),
            credentials: camera.credentials.clone(),
            subscription,
            handler,
            stopped: stopped.clone(),
            interval: self.poll_interval,
        };
        let task = tokio::spawn(poller.run());

        Ok(SourceHandle::new(stopped, Some(task)))
    }
}

/// State owned by one polling task.
struct Poller {
    client: SoapClient,
    camera: String,
    credentials: Option<Credentials>,
    subscription: PullSubscription,
    handler: Arc<dyn EventHandler>,
    stopped: Arc<AtomicBool>,
    interval: Duration,
}

impl Poller {
    async fn run(self) {
        while !self.stopped.load(Ordering::SeqCst) {
            match pull_messages_once(&self.client, &self.subscription, self.credentials.as_ref()).await {
                Ok(events) => dispatch_batch(&self.camera, self.handler.as_ref(), events).await,
                Err(e) => {
                    tracing::warn!(camera = %self.camera, error = %e, "Pull failed, retrying");
                }
            }
            tokio::time::sleep(self.interval).await;
        }

        tracing::info!(camera = %self.camera, "Pull loop stopped");
    }
}
