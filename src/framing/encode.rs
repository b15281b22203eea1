//! Outbound framing.

use bytes::{BufMut, Bytes, BytesMut};

use super::chunked::{END_OF_CHUNKS, MAX_CHUNK_SIZE};
use super::eom::EOM_DELIMITER;
use crate::capabilities::BaseVersion;
use crate::error::{Result, SessionError};

/// Frame a message for base:1.0: body followed by `]]>]]>`.
pub fn encode_eom(message: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(message.len() + EOM_DELIMITER.len());
    out.put_slice(message);
    out.put_slice(EOM_DELIMITER);
    out.freeze()
}

/// Frame a message for base:1.1, splitting it into chunks of at most
/// `max_chunk` bytes.
///
/// # Errors
///
/// An empty message has no valid chunked encoding.
pub fn encode_chunked(message: &[u8], max_chunk: usize) -> Result<Bytes> {
    if message.is_empty() {
        return Err(SessionError::FramingViolation(
            "cannot chunk-frame an empty message".to_string(),
        ));
    }

    let max_chunk = usize::try_from(MAX_CHUNK_SIZE).map_or(max_chunk, |limit| max_chunk.min(limit));
    let max_chunk = max_chunk.max(1);

    let chunk_count = (message.len() + max_chunk - 1) / max_chunk;
    let mut out = BytesMut::with_capacity(message.len() + chunk_count * 14 + END_OF_CHUNKS.len());
    for chunk in message.chunks(max_chunk) {
        out.put_slice(format!("\n#{}\n", chunk.len()).as_bytes());
        out.put_slice(chunk);
    }
    out.put_slice(END_OF_CHUNKS);
    Ok(out.freeze())
}

/// Frame a message for the given base version.
pub fn encode(message: &[u8], version: BaseVersion, max_chunk: usize) -> Result<Bytes> {
    match version {
        BaseVersion::V1_0 => Ok(encode_eom(message)),
        BaseVersion::V1_1 => encode_chunked(message, max_chunk),
    }
}
