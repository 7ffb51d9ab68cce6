//! Generic XML tree decoding for SOAP responses and event notifications.
//!
//! ONVIF vendors disagree on namespace prefixes and nesting, so responses are
//! decoded into an untyped [`XmlNode`] tree instead of serde structs. The
//! mapping follows a small set of rules:
//!
//! - attributes become `@<name>` entries holding [`XmlNode::Text`]
//! - a leaf element becomes its text; `true`/`false` become [`XmlNode::Bool`]
//! - an element with attributes or children becomes a [`XmlNode::Map`] and its
//!   own text, if any, is stored under `#text`
//! - repeated sibling names collapse into a single [`XmlNode::List`]
//!
//! Names keep their namespace prefix (`tt:SimpleItem`). Use
//! [`XmlNode::child`] to look entries up by local name.

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::SoapError;

/// Key under which an element's own text is stored when it also has
/// attributes or children.
pub const TEXT_KEY: &str = "#text";

/// A decoded XML document or fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    /// Text content or an attribute value
    Text(String),
    /// Element text that was exactly `true` or `false`
    Bool(bool),
    /// Repeated sibling elements, in document order
    List(Vec<XmlNode>),
    /// Attributes and child elements, in document order
    Map(Vec<(String, XmlNode)>),
}

impl XmlNode {
    /// Look up an element entry of a map by its local name, ignoring any
    /// namespace prefix.
    pub fn child(&self, local: &str) -> Option<&XmlNode> {
        match self {
            XmlNode::Map(entries) => entries
                .iter()
                .find(|(key, _)| !key.starts_with('@') && local_name(key) == local)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    /// Look up an attribute entry of a map by its local name.
    pub fn attribute(&self, local: &str) -> Option<&XmlNode> {
        match self {
            XmlNode::Map(entries) => entries
                .iter()
                .find(|(key, _)| key.starts_with('@') && local_name(key) == local)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    /// Follow a chain of local names from this node.
    pub fn path(&self, segments: &[&str]) -> Option<&XmlNode> {
        segments
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// The text carried by this node, if any.
    ///
    /// Maps yield their `#text` entry so `<Address attr="x">http://..</Address>`
    /// still reads as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            XmlNode::Text(text) => Some(text),
            XmlNode::Map(entries) => entries
                .iter()
                .find(|(key, _)| key == TEXT_KEY)
                .and_then(|(_, node)| node.as_text()),
            _ => None,
        }
    }
}

/// Strip the attribute marker and namespace prefix from a key.
///
/// `@xmlns:tt` becomes `tt`, `tev:XAddr` becomes `XAddr`.
pub fn local_name(key: &str) -> &str {
    let key = key.strip_prefix('@').unwrap_or(key);
    match key.rfind(':') {
        Some(pos) => &key[pos + 1..],
        None => key,
    }
}

/// An element whose end tag has not been seen yet.
struct OpenElement {
    name: String,
    attributes: Vec<(String, XmlNode)>,
    children: Vec<(String, XmlNode)>,
    text: String,
}

impl OpenElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, SoapError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| SoapError::Parse(e.to_string()))?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, XmlNode::Text(value)));
        }
        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
            text: String::new(),
        })
    }

    fn finish(self) -> (String, XmlNode) {
        if self.attributes.is_empty() && self.children.is_empty() {
            let node = match self.text.as_str() {
                "true" => XmlNode::Bool(true),
                "false" => XmlNode::Bool(false),
                _ => XmlNode::Text(self.text),
            };
            return (self.name, node);
        }

        let mut entries = self.attributes;
        entries.extend(self.children);
        if !self.text.is_empty() {
            entries.push((TEXT_KEY.to_string(), XmlNode::Text(self.text)));
        }
        (self.name, XmlNode::Map(entries))
    }
}

/// Insert a child entry, collapsing repeated names into a list.
fn insert_child(children: &mut Vec<(String, XmlNode)>, name: String, node: XmlNode) {
    if let Some((_, existing)) = children.iter_mut().find(|(key, _)| *key == name) {
        match existing {
            XmlNode::List(items) => items.push(node),
            other => {
                let first = std::mem::replace(other, XmlNode::List(Vec::new()));
                *other = XmlNode::List(vec![first, node]);
            }
        }
    } else {
        children.push((name, node));
    }
}

/// Parse an XML document into an [`XmlNode`] tree.
///
/// The returned node is a map holding the root element under its qualified
/// name, e.g. `{"s:Envelope": {...}}`.
///
/// # Errors
///
/// Returns [`SoapError::Parse`] when the document has no root element or when
/// tags are mismatched or left open.
pub fn parse_xml(xml: &str) -> Result<XmlNode, SoapError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<OpenElement> = Vec::new();
    let mut roots: Vec<(String, XmlNode)> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(OpenElement::from_start(&start)?),
            Event::Empty(start) => {
                let (name, node) = OpenElement::from_start(&start)?.finish();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, node),
                    None => insert_child(&mut roots, name, node),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SoapError::Parse("Unexpected closing tag".to_string()))?;
                let (name, node) = element.finish();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.children, name, node),
                    None => insert_child(&mut roots, name, node),
                }
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(SoapError::Parse(format!("Unclosed element <{}>", open.name)));
    }
    if roots.is_empty() {
        return Err(SoapError::Parse("Document has no root element".to_string()));
    }

    Ok(XmlNode::Map(roots))
}
