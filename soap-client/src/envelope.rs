//! SOAP 1.2 request bodies for the ONVIF device and event services.

/// Content type sent with every ONVIF request.
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

const ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";
const EVENTS_NS: &str = "http://www.onvif.org/ver10/events/wsdl";
const ADDRESSING_NS: &str = "http://www.w3.org/2005/08/addressing";

fn wrap(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="{ENVELOPE_NS}">
  <s:Body>
    {body}
  </s:Body>
</s:Envelope>"#
    )
}

/// Escape text for inclusion in element content.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// `GetCapabilities` for every capability category.
pub fn get_capabilities() -> String {
    wrap(&format!(
        r#"<tds:GetCapabilities xmlns:tds="{DEVICE_NS}">
      <tds:Category>All</tds:Category>
    </tds:GetCapabilities>"#
    ))
}

/// `CreatePullPointSubscription` with camera defaults.
pub fn create_pull_point_subscription() -> String {
    wrap(&format!(
        r#"<tev:CreatePullPointSubscription xmlns:tev="{EVENTS_NS}" />"#
    ))
}

/// `PullMessages` with an ISO 8601 timeout hint (e.g. `PT2S`) and message limit.
pub fn pull_messages(timeout: &str, message_limit: u32) -> String {
    wrap(&format!(
        r#"<tev:PullMessages xmlns:tev="{EVENTS_NS}">
      <tev:Timeout>{timeout}</tev:Timeout>
      <tev:MessageLimit>{message_limit}</tev:MessageLimit>
    </tev:PullMessages>"#,
        timeout = escape(timeout),
    ))
}

/// `CreateSubscription` asking the camera to POST notifications to `notify_url`
/// until `termination` (ISO 8601 duration, e.g. `PT24H`) elapses.
pub fn create_subscription(notify_url: &str, termination: &str) -> String {
    wrap(&format!(
        r#"<tev:CreateSubscription xmlns:tev="{EVENTS_NS}">
      <tev:InitialTerminationTime>{termination}</tev:InitialTerminationTime>
      <tev:NotifyTo xmlns:wsa="{ADDRESSING_NS}">
        <wsa:EndpointReference>
          <wsa:Address>{notify_url}</wsa:Address>
        </wsa:EndpointReference>
      </tev:NotifyTo>
    </tev:CreateSubscription>"#,
        termination = escape(termination),
        notify_url = escape(notify_url),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{parse_xml, XmlNode};
    use rstest::rstest;

    #[test]
    fn test_get_capabilities_requests_all_categories() {
        let tree = parse_xml(&get_capabilities()).unwrap();
        let category = tree
            .path(&["Envelope", "Body", "GetCapabilities", "Category"])
            .and_then(XmlNode::as_text);
        assert_eq!(category, Some("All"));
    }

    #[rstest]
    #[case("PT2S", 10, "10")]
    #[case("PT60S", 1, "1")]
    #[case("PT0S", 100, "100")]
    fn test_pull_messages_carries_timeout_and_limit(
        #[case] timeout: &str,
        #[case] limit: u32,
        #[case] expected_limit: &str,
    ) {
        let tree = parse_xml(&pull_messages(timeout, limit)).unwrap();
        let pull = tree.path(&["Envelope", "Body", "PullMessages"]).unwrap();
        assert_eq!(pull.child("Timeout").and_then(XmlNode::as_text), Some(timeout));
        assert_eq!(
            pull.child("MessageLimit").and_then(XmlNode::as_text),
            Some(expected_limit)
        );
    }

    #[test]
    fn test_create_subscription_escapes_notify_url() {
        let body = create_subscription("http://bridge:8080/onvif/notify/a?x=1&y=2", "PT24H");
        assert!(body.contains("x=1&amp;y=2"));

        let tree = parse_xml(&body).unwrap();
        let address = tree
            .path(&[
                "Envelope",
                "Body",
                "CreateSubscription",
                "NotifyTo",
                "EndpointReference",
                "Address",
            ])
            .and_then(XmlNode::as_text);
        assert_eq!(address, Some("http://bridge:8080/onvif/notify/a?x=1&y=2"));

        let termination = tree
            .path(&["Envelope", "Body", "CreateSubscription", "InitialTerminationTime"])
            .and_then(XmlNode::as_text);
        assert_eq!(termination, Some("PT24H"));
    }

    #[test]
    fn test_create_pull_point_subscription_is_well_formed() {
        let tree = parse_xml(&create_pull_point_subscription()).unwrap();
        assert!(tree
            .path(&["Envelope", "Body", "CreatePullPointSubscription"])
            .is_some());
    }
}
