//! Outgoing message queue.
//!
//! Any number of application tasks push unframed messages; the session's
//! background worker is the single consumer, framing each one for the
//! negotiated base version right before it is written.
//!
//! ```text
//! send() ─┐
//! send() ─┼─► OutboundQueue ─► OutboundReceiver (worker) ─► frame ─► channel
//! send() ─┘
//! ```
//!
//! The queue is unbounded and FIFO: messages reach the wire in push order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Result, SessionError};

/// Create a connected queue/receiver pair.
pub fn outbound_queue() -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        OutboundQueue {
            tx,
            pending: pending.clone(),
        },
        OutboundReceiver { rx, pending },
    )
}

/// Producer side of the outgoing queue.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<String>,
    /// Messages pushed but not yet taken by the worker.
    pending: Arc<AtomicUsize>,
}

impl OutboundQueue {
    /// Enqueue a message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionClosed`] if the receiver is gone.
    pub fn push(&self, message: String) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(message).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            SessionError::ConnectionClosed
        })
    }

    /// Get current pending message count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Consumer side of the outgoing queue, owned by the worker.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<String>,
    pending: Arc<AtomicUsize>,
}

impl OutboundReceiver {
    /// Wait for the next message. Cancel-safe.
    ///
    /// Returns `None` once every producer is dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<String> {
        let message = self.rx.recv().await;
        if message.is_some() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }
}
