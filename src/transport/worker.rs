//! Background worker driving one session's channel.
//!
//! A single task owns the channel, the inbound decoder and the receiving end
//! of the outgoing queue, so none of them needs a lock. Each loop iteration
//! waits for whichever comes first:
//! - a shutdown request from [`Session::close`](crate::Session::close)
//! - a queued outgoing message, framed and written immediately
//! - inbound bytes, decoded and dispatched message by message
//!
//! Framing is re-evaluated between messages: until the server hello has been
//! recorded everything is end-of-message framed; afterwards the negotiated
//! base version applies in both directions.
//!
//! Any error ends the loop. The channel is dropped, the session is marked
//! disconnected and the error is fanned out to listeners once.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::capabilities::{BaseVersion, BASE_1_1};
use crate::error::{Result, SessionError};
use crate::framing::{encode, InboundDecoder};
use crate::handshake::is_hello;
use crate::queue::OutboundReceiver;
use crate::session::Shared;

/// Run the worker until the channel closes or fails.
pub(crate) async fn run<R, W>(shared: Arc<Shared>, reader: R, writer: W, outbound: OutboundReceiver)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::debug!("starting main loop");
    let _closed = CloseOnExit(&shared);
    let result = io_loop(&shared, reader, writer, outbound).await;
    shared.mark_closed();

    match result {
        Ok(()) => {
            tracing::debug!("session closed locally");
            // A handshake still waiting on the hello listener must not hang.
            if shared.server_capabilities().is_none() {
                shared.listeners.dispatch_error(&SessionError::ConnectionClosed);
            }
        }
        Err(e) => {
            tracing::error!("broke out of main loop, error={}", e);
            shared.listeners.dispatch_error(&e);
        }
    }
}

/// Marks the session closed even if the worker unwinds.
struct CloseOnExit<'a>(&'a Shared);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.mark_closed();
    }
}

async fn io_loop<R, W>(
    shared: &Shared,
    mut reader: R,
    mut writer: W,
    mut outbound: OutboundReceiver,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let config = shared.config();
    let mut decoder = InboundDecoder::new(config.max_message_size);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.notified() => {
                // Peer may already be gone; nothing left to report.
                let _ = writer.shutdown().await;
                return Ok(());
            }

            Some(message) = outbound.recv() => {
                let framed = frame_outbound(shared, &message)?;
                tracing::debug!(len = message.len(), "sending message");
                writer.write_all(&framed).await?;
                writer.flush().await?;
            }

            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Err(SessionError::ConnectionClosed);
                }
                tracing::trace!(n, "read from channel");
                decoder.extend(&buf[..n]);
                drain_inbound(shared, &mut decoder)?;
            }
        }
    }
}

/// Dispatch every complete message buffered in `decoder`.
fn drain_inbound(shared: &Shared, decoder: &mut InboundDecoder) -> Result<()> {
    loop {
        if let Some(version) = shared.negotiated_version() {
            decoder.switch_to(version?);
        }
        match decoder.next_message()? {
            Some(message) => {
                tracing::debug!(len = message.len(), version = ?decoder.version(), "parsed new message");
                shared.listeners.dispatch_message(&message)?;
            }
            None => return Ok(()),
        }
    }
}

/// Frame one queued message for the wire.
fn frame_outbound(shared: &Shared, message: &str) -> Result<Bytes> {
    let version = if is_hello(message) {
        BaseVersion::V1_0
    } else {
        match shared.negotiated_version() {
            Some(version) => version?,
            None if shared.client_capabilities().contains(BASE_1_1) => {
                return Err(SessionError::FramingViolation(
                    "message queued before server capabilities are known".to_string(),
                ));
            }
            None => BaseVersion::V1_0,
        }
    };
    encode(message.as_bytes(), version, shared.config().outbound_chunk_size)
}
