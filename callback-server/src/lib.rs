//! HTTP notification receiver for ONVIF push-mode events.
//!
//! This crate provides a lightweight HTTP server that cameras POST event
//! notifications to. It is deliberately generic: it knows nothing about
//! ONVIF event vocabularies, only how to recognise a notification request and
//! which camera it is addressed to.
//!
//! # Overview
//!
//! - [`CallbackServer`]: binds a port and serves requests until shut down.
//! - [`NotifyRouter`]: accepts `POST <base_path>/...` requests and derives the
//!   camera name from the final path segment.
//! - [`NotificationHandler`]: implemented by the consuming crate to turn a
//!   [`NotificationPayload`] into events.
//!
//! Responses are `200 OK` once the handler returns `Ok`, `404` for any other
//! method or path, and `500` when the handler reports an error.
//!
//! # Private Workspace Crate
//!
//! This crate is intended for internal use within the workspace and is not
//! published to crates.io.

pub mod router;
mod server;

pub use router::{NotificationHandler, NotificationPayload, NotifyRouter};
pub use server::{
    CallbackError, CallbackServer, NotifyServerConfig, DEFAULT_BASE_PATH, DEFAULT_PORT,
    MAX_NOTIFICATION_BYTES,
};
