//! Heuristic event classification.
//!
//! Cameras encode the same event in many ways: a `SimpleItem` with `Name` and
//! `Value` attributes, an `Is<Noun>` element holding a boolean, or just a topic
//! string such as `tns1:RuleEngine/LineDetector/Crossed`. The classifier walks
//! the decoded tree, recognizes all three encodings and folds them into at
//! most one [`CanonicalEvent`] per [`EventType`].
//!
//! Keyword matching is driven by the ordered [`RULES`] table, so traversal
//! and vocabulary can be tested separately.

use std::sync::LazyLock;

use regex::Regex;
use soap_client::tree::{local_name, TEXT_KEY};
use soap_client::{parse_xml, XmlNode};

use crate::types::{CanonicalEvent, EventType};

/// A keyword rule mapping raw names onto a canonical type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Lowercase substrings, any of which selects this rule
    pub keywords: &'static [&'static str],
    /// The canonical type produced when the rule matches
    pub event_type: EventType,
}

impl Rule {
    /// Whether an already lowercased name contains one of the keywords.
    pub fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|keyword| lowered.contains(keyword))
    }
}

/// Rules in evaluation order. The first match wins in [`canonicalize`].
pub const RULES: &[Rule] = &[
    Rule {
        keywords: &["linecross", "line"],
        event_type: EventType::Line,
    },
    Rule {
        keywords: &["person", "people"],
        event_type: EventType::People,
    },
    Rule {
        keywords: &["vehicle"],
        event_type: EventType::Vehicle,
    },
    Rule {
        keywords: &["pet", "animal"],
        event_type: EventType::Animal,
    },
    Rule {
        keywords: &["motion"],
        event_type: EventType::Motion,
    },
];

static TRUE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(true|1)\b").expect("valid regex"));
static FALSE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(false|0)\b").expect("valid regex"));

/// Map a raw event name onto the canonical vocabulary.
///
/// Matching is case-insensitive and by substring; names matching no rule
/// yield `None`.
///
/// ```
/// use onvif_events::classifier::canonicalize;
/// use onvif_events::EventType;
///
/// assert_eq!(canonicalize("IsPeople"), Some(EventType::People));
/// assert_eq!(canonicalize("LineCrossDetector"), Some(EventType::Line));
/// assert_eq!(canonicalize("Tamper"), None);
/// ```
pub fn canonicalize(name: &str) -> Option<EventType> {
    let lowered = name.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.matches(&lowered))
        .map(|rule| rule.event_type)
}

/// Coerce a textual boolean. Anything but `true`/`1`/`false`/`0` is `None`.
fn coerce_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// The noun of an `Is<Noun>` key, ignoring attribute markers and prefixes.
fn flag_noun(key: &str) -> Option<&str> {
    local_name(key)
        .strip_prefix("Is")
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_alphabetic()))
}

/// Ordered, per-type deduplicating accumulator.
#[derive(Default)]
struct Collector {
    events: Vec<CanonicalEvent>,
}

impl Collector {
    fn record(&mut self, event_type: EventType, state: Option<bool>) {
        match self.events.iter_mut().find(|e| e.event_type == event_type) {
            Some(existing) => {
                if existing.state.is_none() && state.is_some() {
                    existing.state = state;
                }
            }
            None => self.events.push(CanonicalEvent::new(event_type, state)),
        }
    }

    fn record_name(&mut self, name: &str, state: Option<bool>) {
        if let Some(event_type) = canonicalize(name) {
            self.record(event_type, state);
        }
    }

    /// Apply every matching rule to a free-text value.
    fn scan_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let lowered = text.to_lowercase();
        let state = if TRUE_LITERAL.is_match(&lowered) {
            Some(true)
        } else if FALSE_LITERAL.is_match(&lowered) {
            Some(false)
        } else {
            None
        };

        for rule in RULES {
            if rule.matches(&lowered) {
                self.record(rule.event_type, state);
            }
        }
    }

    fn visit(&mut self, node: &XmlNode) {
        match node {
            XmlNode::Text(text) => self.scan_text(text),
            XmlNode::Bool(_) => {}
            XmlNode::List(items) => {
                for item in items {
                    self.visit(item);
                }
            }
            XmlNode::Map(entries) => {
                self.visit_simple_item(node);
                for (key, value) in entries {
                    if key != TEXT_KEY {
                        if let Some(noun) = flag_noun(key) {
                            let state = match value {
                                XmlNode::Bool(flag) => Some(*flag),
                                XmlNode::Text(text) => coerce_bool(text),
                                _ => None,
                            };
                            self.record_name(noun, state);
                        }
                    }
                    self.visit(value);
                }
            }
        }
    }

    /// `<SimpleItem Name="IsMotion" Value="true"/>`
    fn visit_simple_item(&mut self, node: &XmlNode) {
        let name = node.attribute("Name").and_then(XmlNode::as_text);
        let value = node.attribute("Value").and_then(XmlNode::as_text);
        if let (Some(name), Some(value)) = (name, value) {
            if !name.is_empty() && !value.is_empty() {
                self.record_name(name, coerce_bool(value));
            }
        }
    }
}

/// Extract canonical events from a decoded tree, in first-discovery order.
pub fn classify(node: &XmlNode) -> Vec<CanonicalEvent> {
    let mut collector = Collector::default();
    collector.visit(node);
    collector.events
}

/// Extract canonical events from a free-text payload.
pub fn classify_text(text: &str) -> Vec<CanonicalEvent> {
    let mut collector = Collector::default();
    collector.scan_text(text);
    collector.events
}

/// Decode a notification body and classify it.
///
/// A body that is not XML yields no events.
pub fn parse_notification(xml: &str) -> Vec<CanonicalEvent> {
    match parse_xml(xml) {
        Ok(tree) => classify(&tree),
        Err(e) => {
            tracing::debug!(error = %e, "Notification body is not valid XML");
            Vec::new()
        }
    }
}
