//! Capability discovery: locating a camera's events service.
//!
//! The device service lives at a fixed path on the camera's HTTP host. Its
//! `GetCapabilities` response names the events service address (XAddr),
//! though vendors nest it in different places.

use std::sync::LazyLock;

use regex::Regex;
use soap_client::tree::local_name;
use soap_client::{envelope, SoapClient, XmlNode};
use url::Url;

use crate::types::CameraEndpoint;

/// Path of the ONVIF device service on a camera.
pub const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^"'\s>]+"#).expect("valid regex"));

/// Derive the device-service URL for a camera.
///
/// An explicit `host` (and optional `port`) wins. Otherwise the scheme, host
/// and port of the snapshot address are used; media schemes such as `rtsp://`
/// fall back to plain HTTP on the default port.
///
/// Returns `None` when neither source yields a host.
pub fn device_service_url(camera: &CameraEndpoint) -> Option<String> {
    if let Some(host) = camera.host.as_deref().filter(|h| !h.is_empty()) {
        let base = match camera.port {
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        };
        return Some(format!("{base}{DEVICE_SERVICE_PATH}"));
    }

    let address = camera.snapshot_address.as_deref()?;
    let parsed = Url::parse(address).ok()?;
    let host = parsed.host_str()?;

    let base = match parsed.scheme() {
        scheme @ ("http" | "https") => match parsed.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        },
        _ => format!("http://{host}"),
    };

    Some(format!("{base}{DEVICE_SERVICE_PATH}"))
}

/// Find an `Events` entry with an `XAddr` anywhere in the tree.
fn find_nested_events_xaddr(node: &XmlNode) -> Option<&str> {
    match node {
        XmlNode::Map(entries) => entries.iter().find_map(|(key, value)| {
            let direct = (local_name(key) == "Events" && !key.starts_with('@'))
                .then(|| value.child("XAddr").and_then(XmlNode::as_text))
                .flatten()
                .filter(|xaddr| !xaddr.is_empty());
            direct.or_else(|| find_nested_events_xaddr(value))
        }),
        XmlNode::List(items) => items.iter().find_map(find_nested_events_xaddr),
        _ => None,
    }
}

/// First URL-shaped text in document order, ignoring namespace declarations.
fn find_any_url(node: &XmlNode) -> Option<&str> {
    match node {
        XmlNode::Text(text) => URL_PATTERN.find(text).map(|m| m.as_str()),
        XmlNode::Bool(_) => None,
        XmlNode::List(items) => items.iter().find_map(find_any_url),
        XmlNode::Map(entries) => entries
            .iter()
            .filter(|(key, _)| !key.starts_with("@xmlns"))
            .find_map(|(_, value)| find_any_url(value)),
    }
}

/// Extract the events service address from a `GetCapabilities` response.
///
/// Tries the standard location first, then any `Events/XAddr` pair, then the
/// first URL anywhere in the document.
pub fn find_events_xaddr(response: &XmlNode) -> Option<String> {
    let structural = response
        .path(&[
            "Envelope",
            "Body",
            "GetCapabilitiesResponse",
            "Capabilities",
            "Events",
            "XAddr",
        ])
        .and_then(XmlNode::as_text)
        .filter(|xaddr| !xaddr.is_empty());

    structural
        .or_else(|| find_nested_events_xaddr(response))
        .or_else(|| find_any_url(response))
        .map(str::to_string)
}

/// Query a camera's capabilities and return its events service address.
///
/// Every failure (no derivable host, transport error, unparseable response,
/// no address in the response) is logged and yields `None`.
pub async fn discover_events_endpoint(
    client: &SoapClient,
    camera: &CameraEndpoint,
) -> Option<String> {
    let Some(url) = device_service_url(camera) else {
        tracing::warn!(
            camera = %camera.name,
            "No host or snapshot address to derive the device service from"
        );
        return None;
    };

    tracing::debug!(camera = %camera.name, %url, "Requesting capabilities");

    let response = match client
        .call(&url, envelope::get_capabilities(), camera.credentials.as_ref())
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(camera = %camera.name, %url, error = %e, "GetCapabilities failed");
            return None;
        }
    };

    let xaddr = find_events_xaddr(&response);
    match &xaddr {
        Some(xaddr) => tracing::info!(camera = %camera.name, %xaddr, "Events service discovered"),
        None => tracing::warn!(camera = %camera.name, "GetCapabilities response has no events address"),
    }
    xaddr
}
