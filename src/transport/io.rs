//! Transport over an already-open stream pair.
//!
//! # Example
//!
//! ```ignore
//! use netconf_session::{IoTransport, Session};
//!
//! let mut child = tokio::process::Command::new("netconf-subsys")
//!     .stdin(std::process::Stdio::piped())
//!     .stdout(std::process::Stdio::piped())
//!     .spawn()?;
//! let transport = IoTransport::new(child.stdout.take().unwrap(), child.stdin.take().unwrap());
//!
//! let session = Session::builder().build();
//! session.connect(transport).await?;
//! ```

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use super::Transport;
use crate::error::Result;

/// Wraps a reader/writer pair the caller has already connected.
pub struct IoTransport<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> IoTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a transport from separate halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<S> IoTransport<tokio::io::ReadHalf<S>, tokio::io::WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a transport from a single bidirectional stream.
    pub fn from_stream(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { reader, writer }
    }
}

impl<R, W> Transport for IoTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Reader = R;
    type Writer = W;

    fn connect(self) -> impl Future<Output = Result<(R, W)>> + Send {
        async move { Ok((self.reader, self.writer)) }
    }
}
