//! # onvif-events
//!
//! Camera event ingestion for onvif2mqtt: capability discovery, PullPoint and
//! push subscriptions, and the classifier that folds vendor-specific event
//! payloads into a small canonical vocabulary (motion, line, people,
//! vehicle, animal).
//!
//! Both delivery mechanisms implement [`EventSource`], so a camera runtime
//! only supplies an [`EventHandler`] and picks a source:
//!
//! - [`PullPointSource`] discovers the events service, creates a PullPoint
//!   subscription and polls it from a background task.
//! - [`PushSource`] registers the camera with a shared [`PushDispatcher`],
//!   which the `callback-server` crate feeds with inbound notifications.

pub mod classifier;
pub mod discovery;
mod error;
pub mod pull;
pub mod push;
mod source;
mod types;

pub use classifier::{classify, classify_text, parse_notification};
pub use discovery::discover_events_endpoint;
pub use error::*;
pub use pull::{PullPointSource, PullSubscription};
pub use push::{create_push_subscription, notify_url, NotifyTarget, PushDispatcher, PushSource};
pub use source::{EventHandler, EventSource, SourceHandle};
pub use types::*;
