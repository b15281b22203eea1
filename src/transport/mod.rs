//! Transport module - the byte channel under a session.
//!
//! A [`Transport`] only has to produce a connected reader/writer pair; the
//! crate's worker owns both halves afterwards and does all framing.
//!
//! Provides:
//! - [`Transport`] - connection contract
//! - [`IoTransport`] - adapter over an already-open stream pair (child
//!   process stdio, SSH channel streams, in-memory pipes)

mod io;
pub(crate) mod worker;

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use io::IoTransport;

/// Source of the physical channel a session runs on.
///
/// Implementations report failure to establish the channel as
/// [`SessionError::Connect`](crate::SessionError::Connect).
pub trait Transport: Send {
    /// Inbound half.
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// Outbound half.
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Establish the channel.
    fn connect(self) -> impl Future<Output = Result<(Self::Reader, Self::Writer)>> + Send;
}
