//! Error types for netconf-session.

use thiserror::Error;

/// Boxed error returned by listener implementations.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error on the underlying channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport could not establish the channel.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Inbound byte stream violates the active framing.
    #[error("Framing violation: {0}")]
    FramingViolation(String),

    /// Inbound message exceeds the configured maximum.
    #[error("Message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Bytes accumulated so far.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Hello exchange failed or peer capabilities are unusable.
    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    /// No hello arrived within the configured timeout.
    #[error("Timed out waiting for server hello")]
    HandshakeTimeout,

    /// `send` called while the channel is down.
    #[error("Not connected to NETCONF server")]
    NotConnected,

    /// `connect` called on a session that was already started.
    #[error("Session already started")]
    AlreadyStarted,

    /// Inbound message is not usable XML.
    #[error("Message parse error: {0}")]
    MessageParse(String),

    /// Low-level XML reader/writer error.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A listener returned an error from `on_message`.
    #[error("Listener fault: {0}")]
    ListenerFault(#[source] ListenerError),

    /// Neither base:1.0 nor a shared base:1.1 is advertised.
    #[error("No common NETCONF base version")]
    NoCommonBaseVersion,

    /// Peer closed the channel.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<quick_xml::events::attributes::AttrError> for SessionError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        SessionError::Xml(err.into())
    }
}

/// Result type alias using SessionError.
pub type Result<T> = std::result::Result<T, SessionError>;
