//! Capability sets exchanged in the hello handshake.
//!
//! A [`Capabilities`] value is an ordered list of URIs built once and never
//! mutated. Membership accepts the full URI or one of its short forms:
//!
//! ```
//! use netconf_session::capabilities::Capabilities;
//!
//! let caps = Capabilities::new([
//!     "urn:ietf:params:netconf:base:1.1",
//!     "urn:ietf:params:netconf:capability:xpath:1.0",
//! ]);
//! assert!(caps.contains("urn:ietf:params:netconf:base:1.1"));
//! assert!(caps.contains(":base:1.1"));
//! assert!(caps.contains(":xpath"));
//! assert!(!caps.contains(":candidate"));
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Base protocol 1.0 (RFC 4742 end-of-message framing).
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";

/// Base protocol 1.1 (RFC 6242 chunked framing).
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

/// XML namespace of the NETCONF base protocol.
pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

const NETCONF_URN: &str = "urn:ietf:params:netconf:";
const CAPABILITY_URN: &str = "urn:ietf:params:netconf:capability:";

/// Ordered, immutable set of capability URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Capabilities {
    uris: Vec<String>,
    /// Full URIs and derived short forms, for O(1) membership.
    lookup: HashSet<String>,
}

impl Capabilities {
    /// Build from a sequence of URIs. Duplicates are kept; order is preserved.
    pub fn new<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        let mut lookup = HashSet::with_capacity(uris.len() * 3);
        for uri in &uris {
            lookup.insert(uri.clone());
            lookup.extend(abbreviations(uri));
        }
        Self { uris, lookup }
    }

    /// Capabilities a client advertises by default: base 1.0 and 1.1.
    pub fn default_client() -> Self {
        Self::new([BASE_1_0, BASE_1_1])
    }

    /// Check membership by full URI or short form (`:base:1.1`, `:xpath`).
    pub fn contains(&self, uri: &str) -> bool {
        self.lookup.contains(uri)
    }

    /// True if any URI of `other` is also in `self`.
    pub fn intersects(&self, other: &Capabilities) -> bool {
        other.uris.iter().any(|uri| self.lookup.contains(uri))
    }

    /// Iterate URIs in construction order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    /// Number of URIs, duplicates included.
    pub fn len(&self) -> usize {
        self.uris.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

impl From<Vec<String>> for Capabilities {
    fn from(uris: Vec<String>) -> Self {
        Self::new(uris)
    }
}

impl From<Capabilities> for Vec<String> {
    fn from(caps: Capabilities) -> Self {
        caps.uris
    }
}

impl<S: Into<String>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a Capabilities {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&'a String) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.uris
            .iter()
            .map(String::as_str as fn(&'a String) -> &'a str)
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.uris.join(", "))
    }
}

/// Short forms of an IETF NETCONF URI: `:name:version` and `:name`.
fn abbreviations(uri: &str) -> Vec<String> {
    let uri = uri.split('?').next().unwrap_or(uri);
    let rest = if let Some(rest) = uri.strip_prefix(CAPABILITY_URN) {
        rest
    } else if let Some(rest) = uri.strip_prefix(NETCONF_URN) {
        rest
    } else {
        return Vec::new();
    };

    let mut short = vec![format!(":{}", rest)];
    if let Some((name, _version)) = rest.rsplit_once(':') {
        short.push(format!(":{}", name));
    }
    short
}

/// Base protocol version used for framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseVersion {
    /// `]]>]]>`-delimited messages.
    V1_0,
    /// Length-prefixed chunks.
    V1_1,
}

/// Pick the framing version for a client/server pair.
///
/// 1.1 only when both sides advertise it; otherwise 1.0 when either side
/// advertises 1.0; otherwise there is nothing to speak.
pub fn negotiate_base(client: &Capabilities, server: &Capabilities) -> Result<BaseVersion> {
    if client.contains(BASE_1_1) && server.contains(BASE_1_1) {
        Ok(BaseVersion::V1_1)
    } else if client.contains(BASE_1_0) || server.contains(BASE_1_0) {
        Ok(BaseVersion::V1_0)
    } else {
        Err(SessionError::NoCommonBaseVersion)
    }
}
