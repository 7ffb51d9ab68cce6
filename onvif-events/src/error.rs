//! Error types for the onvif-events crate.

use soap_client::SoapError;

/// Errors that stop an event source from starting.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Capability discovery did not yield an events service address
    #[error("No events service address found for camera {camera}")]
    DiscoveryFailed {
        /// The camera name
        camera: String,
    },

    /// The camera did not return a PullPoint subscription reference
    #[error("Failed to create PullPoint subscription for camera {camera}")]
    SubscriptionFailed {
        /// The camera name
        camera: String,
    },

    /// A SOAP exchange failed
    #[error("SOAP error: {0}")]
    Soap(#[from] SoapError),
}

/// Error reported by an event handler for a single event.
///
/// Handler errors are logged by the event sources and never abort a batch.
#[derive(Debug, thiserror::Error)]
#[error("Event handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Convenience type alias for Results using EventError.
pub type Result<T> = std::result::Result<T, EventError>;
