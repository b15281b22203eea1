//! Chunked decoder for base:1.1 framing (RFC 6242).
//!
//! Wire format of one message:
//! ```text
//! \n#<len>\n<len bytes>  (repeated, one or more chunks)
//! \n##\n                 (end of message)
//! ```
//!
//! The decoder is a five-state automaton:
//! - `Idle`: expect the `\n` opening a chunk header
//! - `ChunkHeader`: expect `#`, then 1..=10 digits, then `\n`
//! - `ChunkBody`: copy exactly `len` bytes into the message
//! - `BetweenChunks`: expect `\n#`, then either a digit (next chunk) or `#`
//! - `Terminator`: expect the final `\n` and emit the message
//!
//! Any unexpected byte is a framing violation. There is no resync; the
//! caller must drop the connection.

use bytes::{Buf, Bytes, BytesMut};

use super::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Result, SessionError};

/// End-of-message marker for base:1.1.
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Maximum number of digits in a chunk-size field.
pub const MAX_CHUNK_HEADER_DIGITS: usize = 10;

/// Largest chunk size allowed by RFC 6242.
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    ChunkHeader { hash_seen: bool, digits: usize, size: u64 },
    ChunkBody { remaining: usize },
    BetweenChunks { newline_seen: bool, hash_seen: bool },
    Terminator,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::ChunkHeader { .. } => "chunk-header",
            State::ChunkBody { .. } => "chunk-body",
            State::BetweenChunks { .. } => "between-chunks",
            State::Terminator => "terminator",
        }
    }
}

/// Incremental decoder for chunk-framed messages.
pub struct ChunkedDecoder {
    /// Bytes received but not yet consumed by the automaton.
    buffer: BytesMut,
    /// Current automaton state.
    state: State,
    /// Chunk data of the message being assembled.
    message: BytesMut,
    /// Maximum allowed size of an assembled message.
    max_message_size: usize,
}

impl ChunkedDecoder {
    /// Create a decoder with the default message size limit.
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a decoder with a custom message size limit.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self::from_parts(BytesMut::with_capacity(64 * 1024), max_message_size)
    }

    pub(crate) fn from_parts(buffer: BytesMut, max_message_size: usize) -> Self {
        Self {
            buffer,
            state: State::Idle,
            message: BytesMut::new(),
            max_message_size,
        }
    }

    /// Append data and extract every complete message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::FramingViolation`] on any byte that breaks the
    /// grammar, and [`SessionError::MessageTooLarge`] if a message would
    /// exceed the configured limit. The decoder must be discarded after
    /// an error.
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
        while !self.buffer.is_empty() {
            // Bulk copy chunk data instead of stepping byte by byte.
            if let State::ChunkBody { remaining } = self.state {
                let take = remaining.min(self.buffer.len());
                self.message.extend_from_slice(&self.buffer[..take]);
                self.buffer.advance(take);
                self.state = if take == remaining {
                    State::BetweenChunks {
                        newline_seen: false,
                        hash_seen: false,
                    }
                } else {
                    State::ChunkBody {
                        remaining: remaining - take,
                    }
                };
                continue;
            }

            let byte = self.buffer[0];
            self.buffer.advance(1);
            if let Some(message) = self.step(byte)? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    fn step(&mut self, byte: u8) -> Result<Option<Bytes>> {
        self.state = match self.state {
            State::Idle => match byte {
                b'\n' => State::ChunkHeader {
                    hash_seen: false,
                    digits: 0,
                    size: 0,
                },
                _ => return Err(self.violation("newline", byte)),
            },

            State::ChunkHeader {
                hash_seen: false, ..
            } => match byte {
                b'#' => State::ChunkHeader {
                    hash_seen: true,
                    digits: 0,
                    size: 0,
                },
                _ => return Err(self.violation("'#'", byte)),
            },

            State::ChunkHeader {
                hash_seen: true,
                digits,
                size,
            } => match byte {
                b'0' if digits == 0 => return Err(self.violation("digit 1-9", byte)),
                b'0'..=b'9' => {
                    if digits == MAX_CHUNK_HEADER_DIGITS {
                        return Err(SessionError::FramingViolation(format!(
                            "chunk size exceeds {} digits",
                            MAX_CHUNK_HEADER_DIGITS
                        )));
                    }
                    State::ChunkHeader {
                        hash_seen: true,
                        digits: digits + 1,
                        size: size * 10 + u64::from(byte - b'0'),
                    }
                }
                b'\n' if digits > 0 => State::ChunkBody {
                    remaining: self.check_chunk_size(size)?,
                },
                _ => return Err(self.violation("digit", byte)),
            },

            State::ChunkBody { remaining } => {
                self.message.extend_from_slice(&[byte]);
                if remaining == 1 {
                    State::BetweenChunks {
                        newline_seen: false,
                        hash_seen: false,
                    }
                } else {
                    State::ChunkBody {
                        remaining: remaining - 1,
                    }
                }
            }

            State::BetweenChunks {
                newline_seen: false,
                ..
            } => match byte {
                b'\n' => State::BetweenChunks {
                    newline_seen: true,
                    hash_seen: false,
                },
                _ => return Err(self.violation("newline", byte)),
            },

            State::BetweenChunks {
                newline_seen: true,
                hash_seen: false,
            } => match byte {
                b'#' => State::BetweenChunks {
                    newline_seen: true,
                    hash_seen: true,
                },
                _ => return Err(self.violation("'#'", byte)),
            },

            State::BetweenChunks {
                newline_seen: true,
                hash_seen: true,
            } => match byte {
                b'#' => State::Terminator,
                b'1'..=b'9' => State::ChunkHeader {
                    hash_seen: true,
                    digits: 1,
                    size: u64::from(byte - b'0'),
                },
                _ => return Err(self.violation("'#' or digit 1-9", byte)),
            },

            State::Terminator => match byte {
                b'\n' => {
                    self.state = State::Idle;
                    let message = self.message.split().freeze();
                    tracing::trace!(len = message.len(), "chunked message complete");
                    return Ok(Some(message));
                }
                _ => return Err(self.violation("newline", byte)),
            },
        };
        Ok(None)
    }

    fn check_chunk_size(&self, size: u64) -> Result<usize> {
        if size > MAX_CHUNK_SIZE {
            return Err(SessionError::FramingViolation(format!(
                "chunk size {} exceeds {}",
                size, MAX_CHUNK_SIZE
            )));
        }
        let size = usize::try_from(size).map_err(|_| {
            SessionError::FramingViolation(format!("chunk size {} not addressable", size))
        })?;
        let total = self.message.len().saturating_add(size);
        if total > self.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            });
        }
        Ok(size)
    }

    fn violation(&self, expected: &str, got: u8) -> SessionError {
        SessionError::FramingViolation(format!(
            "invalid base:1.1 frame ({}: expected {}, got {:?})",
            self.state.name(),
            expected,
            char::from(got)
        ))
    }

    /// Take the unconsumed bytes, leaving the decoder idle and empty.
    pub(crate) fn take_remaining(&mut self) -> BytesMut {
        self.state = State::Idle;
        self.message.clear();
        std::mem::take(&mut self.buffer)
    }

    /// Get the configured message size limit.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Check if the decoder is between messages.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && self.message.is_empty()
    }

    /// Get the number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        self.state.name()
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}
