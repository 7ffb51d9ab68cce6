//! # onvif2mqtt
//!
//! Bridges ONVIF camera events and snapshots to an MQTT broker.
//!
//! Every camera publishes under `<base_topic>/<camera>/`:
//!
//! | Topic suffix       | Payload           | Retained |
//! |--------------------|-------------------|----------|
//! | `<type>`           | `ON` / `OFF`      | no       |
//! | `image`            | raw image bytes   | no       |
//! | `status`           | `online`/`offline`| yes      |
//! | `command/snapshot` | (subscribed) any  |          |
//!
//! where `<type>` is one of `motion`, `line`, `people`, `vehicle`, `animal`.
//! The bridge itself keeps `<base_topic>/status` current and registers it as
//! its MQTT last will.
//!
//! Event ingestion lives in the `onvif-events` crate; this crate adds
//! configuration, the MQTT transport, the event-to-topic mapping, snapshots
//! and the camera lifecycle.

pub mod camera;
pub mod config;
pub mod logging;
pub mod manager;
pub mod mqtt;
pub mod publisher;
pub mod snapshot;

pub use camera::Camera;
pub use config::{AppConfig, CameraConfig, ConfigError};
pub use manager::CameraManager;
pub use mqtt::{MqttTransport, RecordingTransport, RumqttTransport};
pub use publisher::EventPublisher;
pub use snapshot::{SnapshotKind, Snapshotter};
