//! Root element extraction.
//!
//! Listeners decide relevance from the root tag and attributes alone, so
//! dispatch reads only up to the first element start.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::{Result, SessionError};

/// Qualified name and attributes of a message's root element.
///
/// Names use Clark notation: `{namespace}local` when the element is in a
/// namespace, plain `local` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootElement {
    /// Qualified tag name.
    pub tag: String,
    /// Attributes by qualified name. Namespace declarations are excluded.
    pub attributes: HashMap<String, String>,
}

impl RootElement {
    /// Tag name without namespace.
    pub fn local_name(&self) -> &str {
        self.tag
            .rsplit_once('}')
            .map_or(self.tag.as_str(), |(_, local)| local)
    }

    /// Namespace of the tag, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.tag
            .strip_prefix('{')
            .and_then(|rest| rest.split_once('}'))
            .map(|(ns, _)| ns)
    }

    /// Check the tag against a local name in the given namespace, or in no
    /// namespace at all.
    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.local_name() == local && self.namespace().map_or(true, |ns| ns == namespace)
    }

    /// Get an attribute value by qualified name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Parse the root element of an XML document.
///
/// Only the prolog and the root start tag are read; the rest of the
/// document is not checked.
pub fn parse_root(raw: &str) -> Result<RootElement> {
    let mut reader = NsReader::from_str(raw);

    loop {
        let (resolved, event) = reader.read_resolved_event()?;
        let namespace = namespace_of(resolved)?;
        match event {
            Event::Start(start) | Event::Empty(start) => {
                let tag = clark_name(namespace.as_deref(), start.local_name().as_ref());
                let attributes = attributes_of(&reader, &start)?;
                return Ok(RootElement { tag, attributes });
            }
            Event::Text(text) if text.iter().all(u8::is_ascii_whitespace) => {}
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => {
                return Err(SessionError::MessageParse("no root element".to_string()));
            }
            other => {
                return Err(SessionError::MessageParse(format!(
                    "unexpected content before root element: {:?}",
                    other
                )));
            }
        }
    }
}

/// Owned namespace URI of a resolved name.
pub(crate) fn namespace_of(resolved: ResolveResult<'_>) -> Result<Option<String>> {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) => Ok(Some(String::from_utf8_lossy(ns).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(SessionError::MessageParse(format!(
            "undeclared namespace prefix {:?}",
            String::from_utf8_lossy(&prefix)
        ))),
    }
}

/// Format a name as `{namespace}local` or `local`.
pub(crate) fn clark_name(namespace: Option<&str>, local: &[u8]) -> String {
    let local = String::from_utf8_lossy(local);
    match namespace {
        Some(ns) => format!("{{{}}}{}", ns, local),
        None => local.into_owned(),
    }
}

fn attributes_of<R>(reader: &NsReader<R>, start: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut attributes = HashMap::new();
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let namespace = namespace_of(resolved)?;
        let name = clark_name(namespace.as_deref(), local.as_ref());
        let value = attr.unescape_value()?.into_owned();
        attributes.insert(name, value);
    }
    Ok(attributes)
}
