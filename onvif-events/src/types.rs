//! Core types for the onvif-events crate.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use soap_client::Credentials;

/// The canonical event vocabulary every vendor encoding is normalized into.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Generic motion detection
    Motion,
    /// Line crossing / tripwire
    Line,
    /// Person detection
    People,
    /// Vehicle detection
    Vehicle,
    /// Pet or animal detection
    Animal,
}

impl EventType {
    /// All event types, in the order rules are evaluated.
    pub const ALL: [EventType; 5] = [
        EventType::Line,
        EventType::People,
        EventType::Vehicle,
        EventType::Animal,
        EventType::Motion,
    ];

    /// The lowercase name used in MQTT topics and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Motion => "motion",
            EventType::Line => "line",
            EventType::People => "people",
            EventType::Vehicle => "vehicle",
            EventType::Animal => "animal",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown event type: {s}"))
    }
}

/// A normalized event.
///
/// `state` is `None` when the camera reported no explicit boolean, which is
/// treated as a momentary pulse.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CanonicalEvent {
    pub event_type: EventType,
    pub state: Option<bool>,
}

impl CanonicalEvent {
    pub fn new(event_type: EventType, state: Option<bool>) -> Self {
        Self { event_type, state }
    }
}

/// How a camera delivers events to the bridge.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventMode {
    /// The bridge polls a PullPoint subscription
    #[default]
    Pull,
    /// The camera POSTs notifications to the bridge
    Push,
}

/// Push-mode options for a camera.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PushOptions {
    /// Ask the camera to create a subscription towards the bridge on startup
    pub auto_subscribe: bool,
    /// Notification path override, e.g. `/onvif/notify/front-door`
    pub notify_path: Option<String>,
}

/// Per-camera identity and event settings used by the event core.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraEndpoint {
    /// Unique name, used for topic prefixes and push routing
    pub name: String,
    /// Optional SOAP Basic credentials
    pub credentials: Option<Credentials>,
    /// Explicit device host; takes precedence over the snapshot address
    pub host: Option<String>,
    /// Explicit device port, used with `host`
    pub port: Option<u16>,
    /// Snapshot/media address the device host is derived from
    pub snapshot_address: Option<String>,
    /// Event delivery mode
    pub event_mode: EventMode,
    /// Pulse durations in seconds per event type
    pub event_durations: HashMap<EventType, f64>,
    /// Push-mode options
    pub push: PushOptions,
}

impl CameraEndpoint {
    /// Create an endpoint with only a name; everything else defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credentials: None,
            host: None,
            port: None,
            snapshot_address: None,
            event_mode: EventMode::default(),
            event_durations: HashMap::new(),
            push: PushOptions::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_host(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.host = Some(host.into());
        self.port = port;
        self
    }

    pub fn with_snapshot_address(mut self, address: impl Into<String>) -> Self {
        self.snapshot_address = Some(address.into());
        self
    }

    pub fn with_event_mode(mut self, mode: EventMode) -> Self {
        self.event_mode = mode;
        self
    }

    pub fn with_duration(mut self, event_type: EventType, seconds: f64) -> Self {
        self.event_durations.insert(event_type, seconds);
        self
    }

    pub fn with_push(mut self, push: PushOptions) -> Self {
        self.push = push;
        self
    }

    /// The configured pulse duration for an event type.
    ///
    /// Zero, negative, non-finite and unrepresentably large values count as
    /// "not configured".
    pub fn pulse_duration(&self, event_type: EventType) -> Option<Duration> {
        self.event_durations
            .get(&event_type)
            .copied()
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}
