//! Framing module - message delimiting on the NETCONF byte stream.
//!
//! Two encodings exist:
//! - base:1.0 ([`EomDecoder`], [`encode_eom`]): body followed by `]]>]]>`
//! - base:1.1 ([`ChunkedDecoder`], [`encode_chunked`]): `\n#<len>\n` chunks
//!   closed by `\n##\n`
//!
//! Both decoders are incremental: bytes may arrive split at any boundary and
//! state carries over between calls. [`InboundDecoder`] wraps the two so the
//! reader can switch encodings right after the hello exchange.

mod chunked;
mod encode;
mod eom;

use bytes::Bytes;

pub use chunked::{ChunkedDecoder, END_OF_CHUNKS, MAX_CHUNK_HEADER_DIGITS, MAX_CHUNK_SIZE};
pub use encode::{encode, encode_chunked, encode_eom};
pub use eom::{EomDecoder, EOM_DELIMITER};

use crate::capabilities::BaseVersion;
use crate::error::Result;

/// Default maximum inbound message size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Decoder for whichever framing is currently active.
pub enum InboundDecoder {
    /// base:1.0 end-of-message framing.
    Eom(EomDecoder),
    /// base:1.1 chunked framing.
    Chunked(ChunkedDecoder),
}

impl InboundDecoder {
    /// Start with end-of-message framing, as every session does for hello.
    pub fn new(max_message_size: usize) -> Self {
        InboundDecoder::Eom(EomDecoder::with_max_message_size(max_message_size))
    }

    /// Get the framing version being decoded.
    pub fn version(&self) -> BaseVersion {
        match self {
            InboundDecoder::Eom(_) => BaseVersion::V1_0,
            InboundDecoder::Chunked(_) => BaseVersion::V1_1,
        }
    }

    /// Append data without extracting messages.
    pub fn extend(&mut self, data: &[u8]) {
        match self {
            InboundDecoder::Eom(d) => d.extend(data),
            InboundDecoder::Chunked(d) => d.extend(data),
        }
    }

    /// Extract the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Bytes>> {
        match self {
            InboundDecoder::Eom(d) => d.next_message(),
            InboundDecoder::Chunked(d) => d.next_message(),
        }
    }

    /// Switch framing, carrying unconsumed bytes over to the new decoder.
    ///
    /// Must be called between messages.
    pub fn switch_to(&mut self, version: BaseVersion) {
        if self.version() == version {
            return;
        }

        let (rest, max) = match self {
            InboundDecoder::Eom(d) => (d.take_remaining(), d.max_message_size()),
            InboundDecoder::Chunked(d) => (d.take_remaining(), d.max_message_size()),
        };
        tracing::debug!(?version, carried = rest.len(), "switching inbound framing");

        *self = match version {
            BaseVersion::V1_0 => InboundDecoder::Eom(EomDecoder::from_parts(rest, max)),
            BaseVersion::V1_1 => InboundDecoder::Chunked(ChunkedDecoder::from_parts(rest, max)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_eom() {
        let decoder = InboundDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(decoder.version(), BaseVersion::V1_0);
    }

    #[test]
    fn test_switch_after_hello_keeps_pending_bytes() {
        let mut decoder = InboundDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);

        // Server hello and the first chunked reply arrive in one read.
        decoder.extend(b"<hello/>]]>]]>\n#12\n<rpc-reply/");
        let hello = decoder.next_message().unwrap().unwrap();
        assert_eq!(&hello[..], b"<hello/>");

        decoder.switch_to(BaseVersion::V1_1);
        assert_eq!(decoder.version(), BaseVersion::V1_1);
        assert!(decoder.next_message().unwrap().is_none());

        decoder.extend(b">\n##\n");
        let reply = decoder.next_message().unwrap().unwrap();
        assert_eq!(&reply[..], b"<rpc-reply/>");
    }

    #[test]
    fn test_switch_to_same_version_is_noop() {
        let mut decoder = InboundDecoder::new(DEFAULT_MAX_MESSAGE_SIZE);
        decoder.extend(b"<a/>]]>");
        decoder.switch_to(BaseVersion::V1_0);
        decoder.extend(b"]]>");
        assert_eq!(&decoder.next_message().unwrap().unwrap()[..], b"<a/>");
    }
}
