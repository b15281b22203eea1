//! End-of-message decoder for base:1.0 framing (RFC 4742).
//!
//! Each message is followed by the literal `]]>]]>`. The decoder scans
//! incoming bytes once, remembering how much of the delimiter is matched
//! between calls, so a delimiter split across reads is still found.
//!
//! # Example
//!
//! ```
//! use netconf_session::framing::EomDecoder;
//!
//! let mut decoder = EomDecoder::new();
//!
//! assert!(decoder.feed(b"<hello/>]]>").unwrap().is_empty());
//! let messages = decoder.feed(b"]]>\n<rpc/>]]>]]>").unwrap();
//!
//! assert_eq!(messages.len(), 2);
//! assert_eq!(&messages[0][..], b"<hello/>");
//! assert_eq!(&messages[1][..], b"<rpc/>");
//! ```

use bytes::{Bytes, BytesMut};

use super::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Result, SessionError};

/// Message delimiter for base:1.0.
pub const EOM_DELIMITER: &[u8] = b"]]>]]>";

/// Longest proper prefix of the delimiter that is also a suffix of its
/// first `i + 1` bytes. Used to fall back on a mismatch without rescanning.
const FALLBACK: [usize; 6] = [0, 1, 0, 1, 2, 3];

/// Incremental decoder for `]]>]]>`-delimited messages.
pub struct EomDecoder {
    /// Bytes not yet returned as part of a message.
    buffer: BytesMut,
    /// Bytes of `buffer` already scanned.
    scan_pos: usize,
    /// Delimiter bytes matched at `scan_pos`.
    matched: usize,
    /// Maximum allowed bytes of an undelimited message.
    max_message_size: usize,
}

impl EomDecoder {
    /// Create a decoder with the default message size limit.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a decoder with a custom message size limit.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self::from_parts(BytesMut::with_capacity(64 * 1024), max_message_size)
    }

    /// Resume decoding over bytes left behind by another decoder.
    pub(crate) fn from_parts(buffer: BytesMut, max_message_size: usize) -> Self {
        Self {
            buffer,
            scan_pos: 0,
            matched: 0,
            max_message_size,
        }
    }

    /// Append data and extract every complete message.
    ///
    /// Messages are trimmed of surrounding whitespace and returned in
    /// arrival order. Unterminated bytes stay buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MessageTooLarge`] if the undelimited tail
    /// grows past the configured limit.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.extend(data);

        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Append data without extracting messages.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Bytes>> {
        while self.scan_pos < self.buffer.len() {
            let byte = self.buffer[self.scan_pos];
            self.scan_pos += 1;

            while self.matched > 0 && byte != EOM_DELIMITER[self.matched] {
                self.matched = FALLBACK[self.matched - 1];
            }
            if byte == EOM_DELIMITER[self.matched] {
                self.matched += 1;
            }

            if self.matched == EOM_DELIMITER.len() {
                let frame = self.buffer.split_to(self.scan_pos).freeze();
                let body = frame.slice(..frame.len() - EOM_DELIMITER.len());
                self.scan_pos = 0;
                self.matched = 0;
                return Ok(Some(trim_whitespace(body)));
            }
        }

        let pending = self.buffer.len() - self.matched;
        if pending > self.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: pending,
                max: self.max_message_size,
            });
        }
        Ok(None)
    }

    /// Take the buffered bytes, leaving the decoder empty.
    pub(crate) fn take_remaining(&mut self) -> BytesMut {
        self.scan_pos = 0;
        self.matched = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Get the configured message size limit.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan_pos = 0;
        self.matched = 0;
    }
}

impl Default for EomDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_whitespace(bytes: Bytes) -> Bytes {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    bytes.slice(start..end)
}
