//! Private SOAP client for ONVIF camera communication
//!
//! This crate provides a minimal async SOAP client for talking to ONVIF
//! device and event services, the request envelopes the bridge sends, and a
//! generic XML tree decoder for the loosely structured responses cameras
//! return.

mod error;
pub mod envelope;
pub mod tree;

pub use error::SoapError;
pub use tree::{parse_xml, XmlNode};

use std::time::Duration;

use envelope::SOAP_CONTENT_TYPE;

/// HTTP Basic credentials for a camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A minimal SOAP client for ONVIF device communication
#[derive(Debug, Clone)]
pub struct SoapClient {
    http: reqwest::Client,
}

impl SoapClient {
    /// Create a new SOAP client with default configuration
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    /// POST a SOAP envelope and return the raw response text.
    ///
    /// The HTTP status is not inspected: cameras report SOAP faults with 4xx/5xx
    /// statuses and a SOAP body, and callers decide what a body means.
    pub async fn post(
        &self,
        url: &str,
        body: String,
        credentials: Option<&Credentials>,
    ) -> Result<String, SoapError> {
        let mut request = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(body);

        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        tracing::debug!(
            url,
            status = status.as_u16(),
            bytes = text.len(),
            "SOAP response received"
        );

        Ok(text)
    }

    /// POST a SOAP envelope and decode the response into an [`XmlNode`] tree.
    pub async fn call(
        &self,
        url: &str,
        body: String,
        credentials: Option<&Credentials>,
    ) -> Result<XmlNode, SoapError> {
        let text = self.post(url, body, credentials).await?;
        parse_xml(&text)
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_soap_client_creation() {
        let _client = SoapClient::new();
        let _default_client = SoapClient::default();
    }

    #[tokio::test]
    async fn test_post_sends_soap_content_type_and_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        // "admin:secret" base64-encoded
        let mock = server
            .mock("POST", "/onvif/device_service")
            .match_header("content-type", SOAP_CONTENT_TYPE)
            .match_header("authorization", "Basic YWRtaW46c2VjcmV0")
            .match_body(Matcher::Regex("GetCapabilities".to_string()))
            .with_status(200)
            .with_body("<ok/>")
            .create_async()
            .await;

        let client = SoapClient::new();
        let creds = Credentials::new("admin", "secret");
        let url = format!("{}/onvif/device_service", server.url());
        let body = client
            .post(&url, envelope::get_capabilities(), Some(&creds))
            .await
            .unwrap();

        assert_eq!(body, "<ok/>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_without_credentials_sends_no_authorization() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/events")
            .match_header("authorization", Matcher::Missing)
            .with_body("<ok/>")
            .create_async()
            .await;

        let client = SoapClient::new();
        let url = format!("{}/events", server.url());
        client
            .post(&url, envelope::create_pull_point_subscription(), None)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_returns_body_for_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/events")
            .with_status(500)
            .with_body("<s:Envelope><s:Body><s:Fault/></s:Body></s:Envelope>")
            .create_async()
            .await;

        let client = SoapClient::new();
        let url = format!("{}/events", server.url());
        let tree = client
            .call(&url, envelope::pull_messages("PT2S", 10), None)
            .await
            .unwrap();

        assert!(tree.path(&["Envelope", "Body", "Fault"]).is_some());
    }

    #[tokio::test]
    async fn test_call_reports_parse_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/events")
            .with_body("definitely not xml")
            .create_async()
            .await;

        let client = SoapClient::new();
        let url = format!("{}/events", server.url());
        let result = client
            .call(&url, envelope::pull_messages("PT2S", 10), None)
            .await;

        assert!(matches!(result, Err(SoapError::Parse(_))));
    }

    #[tokio::test]
    async fn test_post_reports_network_errors() {
        let client = SoapClient::new();
        // Port 9 (discard) on localhost is not expected to accept connections.
        let result = client
            .post("http://127.0.0.1:9/onvif/device_service", String::new(), None)
            .await;

        assert!(matches!(result, Err(SoapError::Network(_))));
    }
}
