//! `<hello>` message builder and parser.
//!
//! The client advertises its capabilities:
//!
//! ```text
//! <hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
//!   <capabilities>
//!     <capability>urn:ietf:params:netconf:base:1.1</capability>
//!   </capabilities>
//! </hello>
//! ```
//!
//! The server answers with its own capabilities and a `<session-id>`.
//!
//! # Example
//!
//! ```
//! use netconf_session::capabilities::Capabilities;
//! use netconf_session::handshake::{build_hello, parse_hello};
//!
//! let caps = Capabilities::new(["cap:a", "cap:b"]);
//! let hello = build_hello(&caps).unwrap();
//!
//! let reply = parse_hello(&hello).unwrap();
//! assert_eq!(reply.session_id, "0");
//! assert_eq!(reply.capabilities, caps);
//! ```

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{NsReader, Writer};

use crate::capabilities::{Capabilities, NETCONF_NS};
use crate::error::{Result, SessionError};
use crate::listener::{namespace_of, parse_root};

/// Session id reported when the peer's hello carries none.
pub const NO_SESSION_ID: &str = "0";

/// Content of a peer's hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloReply {
    /// Server-assigned session id, [`NO_SESSION_ID`] if absent.
    pub session_id: String,
    /// Capabilities the peer advertised, in document order.
    pub capabilities: Capabilities,
}

/// Build the client `<hello>` advertising `capabilities` in order.
pub fn build_hello(capabilities: &Capabilities) -> Result<String> {
    let mut writer = Writer::new(Vec::new());

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(
        BytesStart::new("hello").with_attributes([("xmlns", NETCONF_NS)]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("capabilities")))?;
    for uri in capabilities {
        writer.write_event(Event::Start(BytesStart::new("capability")))?;
        writer.write_event(Event::Text(BytesText::new(uri)))?;
        writer.write_event(Event::End(BytesEnd::new("capability")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("capabilities")))?;
    writer.write_event(Event::End(BytesEnd::new("hello")))?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Check whether a message is a `<hello>` in the base namespace (or none).
pub fn is_hello(raw: &str) -> bool {
    parse_root(raw).map_or(false, |root| root.is(NETCONF_NS, "hello"))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    SessionId,
    Capability,
}

/// Parse a peer's hello into its session id and capabilities.
///
/// Child elements are matched by local name in the base namespace or in
/// no namespace; anything else is ignored.
///
/// # Errors
///
/// Fails if the text is not a well-formed XML document.
pub fn parse_hello(raw: &str) -> Result<HelloReply> {
    let mut reader = NsReader::from_str(raw);

    let mut depth = 0usize;
    let mut root_seen = false;
    let mut in_capabilities = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    let mut session_id = None;
    let mut capabilities = Vec::new();

    loop {
        let (resolved, event) = reader.read_resolved_event()?;
        let namespace = namespace_of(resolved)?;
        let in_base = namespace.as_deref().map_or(true, |ns| ns == NETCONF_NS);

        match event {
            Event::Start(start) => {
                depth += 1;
                root_seen = true;
                match (depth, start.local_name().as_ref()) {
                    (2, b"session-id") if in_base => {
                        field = Some(Field::SessionId);
                        text.clear();
                    }
                    (2, b"capabilities") if in_base => in_capabilities = true,
                    (3, b"capability") if in_base && in_capabilities => {
                        field = Some(Field::Capability);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(_) => root_seen = true,
            Event::Text(chunk) => {
                if field.is_some() {
                    text.push_str(&chunk.unescape()?);
                }
            }
            Event::CData(chunk) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&chunk));
                }
            }
            Event::End(_) => {
                match (depth, field) {
                    (3, Some(Field::Capability)) => {
                        capabilities.push(text.trim().to_string());
                        field = None;
                    }
                    (2, Some(Field::SessionId)) => {
                        session_id = Some(text.trim().to_string());
                        field = None;
                    }
                    (2, _) => in_capabilities = false,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(SessionError::MessageParse("hello has no root element".to_string()));
    }
    if depth != 0 {
        return Err(SessionError::MessageParse(
            "hello ends before its root element closes".to_string(),
        ));
    }

    Ok(HelloReply {
        session_id: session_id.unwrap_or_else(|| NO_SESSION_ID.to_string()),
        capabilities: Capabilities::new(capabilities),
    })
}
