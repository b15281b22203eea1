//! # netconf-session
//!
//! Session layer for NETCONF clients.
//!
//! This crate sits between a byte channel (SSH subsystem, child process
//! stdio, any `AsyncRead`/`AsyncWrite` pair) and an RPC layer. It runs the
//! hello capability exchange, frames outgoing messages, deframes incoming
//! ones and fans them out to registered listeners.
//!
//! ## Architecture
//!
//! - **Framing**: base:1.0 end-of-message (`]]>]]>`) and base:1.1 chunked
//!   decoders, both incremental across arbitrary read boundaries
//! - **Handshake**: `<hello>` exchange picks the framing for the rest of
//!   the session
//! - **Worker**: one background task owns the channel, reads, writes and
//!   dispatches
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use netconf_session::{IoTransport, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = tokio::net::TcpStream::connect("192.0.2.1:830").await?;
//!
//!     let session = Session::builder().build();
//!     session.add_listener(Arc::new(PrintReplies));
//!     session.connect(IoTransport::from_stream(stream)).await?;
//!
//!     println!("session {:?}", session.id());
//!     session.send(r#"<rpc message-id="101" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get-config><source><running/></source></get-config></rpc>"#)?;
//!
//!     session.wait_closed().await;
//!     Ok(())
//! }
//! ```

pub mod capabilities;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod listener;
pub mod queue;
pub mod transport;

mod session;

pub use capabilities::{negotiate_base, BaseVersion, Capabilities};
pub use error::{ListenerError, Result, SessionError};
pub use listener::{RootElement, SessionListener};
pub use session::{
    Session, SessionBuilder, SessionConfig, SessionState, DEFAULT_OUTBOUND_CHUNK_SIZE,
    DEFAULT_READ_BUFFER_SIZE,
};
pub use transport::{IoTransport, Transport};
