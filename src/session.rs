//! Session builder, handshake and application-facing API.
//!
//! The [`SessionBuilder`] collects client capabilities and tuning knobs.
//! [`Session::connect`] then drives the lifecycle:
//! 1. Establish the channel through a [`Transport`]
//! 2. Register a transient hello listener and queue the client hello
//! 3. Spawn the background worker
//! 4. Wait for the server hello, record its session id and capabilities
//! 5. Pick the base version for every later message
//!
//! # Example
//!
//! ```ignore
//! use netconf_session::{IoTransport, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (reader, writer) = open_channel().await?;
//!
//!     let session = Session::builder()
//!         .hello_timeout(std::time::Duration::from_secs(30))
//!         .build();
//!     session.add_listener(std::sync::Arc::new(MyReplies::default()));
//!     session.connect(IoTransport::new(reader, writer)).await?;
//!
//!     session.send(r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get/></rpc>"#)?;
//!     session.wait_closed().await;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Notify};
use tracing::{Instrument, Span};

use crate::capabilities::{negotiate_base, BaseVersion, Capabilities};
use crate::error::{Result, SessionError};
use crate::framing::DEFAULT_MAX_MESSAGE_SIZE;
use crate::handshake::{build_hello, HelloListener, HelloReply};
use crate::listener::{ListenerRegistry, SessionListener};
use crate::queue::{outbound_queue, OutboundQueue, OutboundReceiver};
use crate::transport::{worker, Transport};

/// Default size of a single channel read (64 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default maximum chunk length for outgoing base:1.1 messages (64 KB).
pub const DEFAULT_OUTBOUND_CHUNK_SIZE: usize = 64 * 1024;

/// Tuning knobs for a session.
///
/// Deserializable so it can sit inside an application's own config file;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bytes requested per channel read.
    /// Default: 64 KB
    pub read_buffer_size: usize,
    /// Largest inbound message accepted before the session fails.
    /// Default: 64 MB
    pub max_message_size: usize,
    /// Largest chunk written for base:1.1 messages.
    /// Default: 64 KB
    pub outbound_chunk_size: usize,
    /// How long `connect` waits for the server hello.
    /// Default: wait forever
    pub hello_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_chunk_size: DEFAULT_OUTBOUND_CHUNK_SIZE,
            hello_timeout: None,
        }
    }
}

/// Lifecycle of a session. Any state may move to `Closed` on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, `connect` not called yet.
    Created,
    /// Channel up, hello exchange in progress.
    Connecting,
    /// Handshake done; messages flow.
    Open,
    /// Channel closed locally, by the peer or by an error.
    Closed,
}

/// State shared between the application handle and the worker.
pub(crate) struct Shared {
    client_capabilities: Capabilities,
    server_capabilities: OnceLock<Capabilities>,
    session_id: OnceLock<String>,
    /// Owned by the transport side: set once the channel is up, cleared
    /// when the worker exits.
    connected: AtomicBool,
    state: watch::Sender<SessionState>,
    pub(crate) listeners: ListenerRegistry,
    queue: OutboundQueue,
    /// Handed to the worker on connect.
    outbound: Mutex<Option<OutboundReceiver>>,
    pub(crate) shutdown: Notify,
    config: SessionConfig,
    span: Span,
}

impl Shared {
    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn client_capabilities(&self) -> &Capabilities {
        &self.client_capabilities
    }

    pub(crate) fn server_capabilities(&self) -> Option<&Capabilities> {
        self.server_capabilities.get()
    }

    /// Base version once the server hello is known.
    pub(crate) fn negotiated_version(&self) -> Option<Result<BaseVersion>> {
        self.server_capabilities
            .get()
            .map(|server| negotiate_base(&self.client_capabilities, server))
    }

    pub(crate) fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.state.send_replace(SessionState::Closed);
    }

    fn record_hello(&self, reply: &HelloReply) {
        let _ = self.session_id.set(reply.session_id.clone());
        let _ = self.server_capabilities.set(reply.capabilities.clone());
        self.span.record("session_id", reply.session_id.as_str());
    }
}

/// Builder for configuring and creating a [`Session`].
pub struct SessionBuilder {
    capabilities: Capabilities,
    config: SessionConfig,
    parent_span: Option<Span>,
}

impl SessionBuilder {
    /// Create a builder advertising base 1.0 and 1.1.
    pub fn new() -> Self {
        Self {
            capabilities: Capabilities::default_client(),
            config: SessionConfig::default(),
            parent_span: None,
        }
    }

    /// Set the capabilities sent in the client hello.
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace every tuning knob at once.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the channel read size.
    ///
    /// Default: 64 KB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the inbound message size limit.
    ///
    /// Default: 64 MB
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the largest chunk written in base:1.1 framing.
    ///
    /// Default: 64 KB
    pub fn outbound_chunk_size(mut self, size: usize) -> Self {
        self.config.outbound_chunk_size = size;
        self
    }

    /// Fail `connect` with [`SessionError::HandshakeTimeout`] if no hello
    /// arrives in time.
    pub fn hello_timeout(mut self, timeout: Duration) -> Self {
        self.config.hello_timeout = Some(timeout);
        self
    }

    /// Nest the session span under `parent` instead of the current span.
    pub fn parent_span(mut self, parent: Span) -> Self {
        self.parent_span = Some(parent);
        self
    }

    /// Build the session. Nothing touches the network until `connect`.
    pub fn build(self) -> Session {
        let span = match self.parent_span {
            Some(parent) => tracing::info_span!(
                parent: &parent,
                "netconf_session",
                session_id = tracing::field::Empty
            ),
            None => tracing::info_span!("netconf_session", session_id = tracing::field::Empty),
        };
        let (queue, outbound) = outbound_queue();
        let (state, _) = watch::channel(SessionState::Created);

        Session {
            shared: Arc::new(Shared {
                client_capabilities: self.capabilities,
                server_capabilities: OnceLock::new(),
                session_id: OnceLock::new(),
                connected: AtomicBool::new(false),
                state,
                listeners: ListenerRegistry::new(),
                queue,
                outbound: Mutex::new(Some(outbound)),
                shutdown: Notify::new(),
                config: self.config,
                span,
            }),
        }
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one NETCONF session.
///
/// Cheap to clone; every clone refers to the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session with default settings advertising `capabilities`.
    pub fn new(capabilities: Capabilities) -> Self {
        SessionBuilder::new().capabilities(capabilities).build()
    }

    /// Connect the channel and run the hello exchange.
    ///
    /// Returns once the server hello has been processed. On failure the
    /// session is closed and cannot be reconnected.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyStarted`] if `connect` was called before
    /// - [`SessionError::ConnectionClosed`] if the session was closed
    /// - the transport's error if the channel cannot be established
    /// - [`SessionError::HandshakeFailure`] or
    ///   [`SessionError::HandshakeTimeout`] if the hello exchange fails
    pub async fn connect<T: Transport>(&self, transport: T) -> Result<()> {
        let span = self.shared.span.clone();
        self.connect_inner(transport).instrument(span).await
    }

    async fn connect_inner<T: Transport>(&self, transport: T) -> Result<()> {
        let mut previous = SessionState::Created;
        let started = self.shared.state.send_if_modified(|state| {
            previous = *state;
            if *state == SessionState::Created {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(match previous {
                SessionState::Closed => SessionError::ConnectionClosed,
                _ => SessionError::AlreadyStarted,
            });
        }

        let outbound = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SessionError::AlreadyStarted)?;

        let (reader, writer) = match transport.connect().await {
            Ok(halves) => halves,
            Err(e) => {
                tracing::error!("failed to connect: {}", e);
                self.shared.mark_closed();
                return Err(e);
            }
        };
        self.shared.connected.store(true, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.shared);
        let (listener, hello_rx) = HelloListener::new(move |reply| {
            if let Some(shared) = weak.upgrade() {
                shared.record_hello(reply);
            }
        });
        self.shared.listeners.add(listener.clone());

        let outcome = self.handshake(reader, writer, outbound, hello_rx).await;
        self.shared.listeners.remove(&listener);

        let (reply, version) = match outcome {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("handshake failed: {}", e);
                self.shared.shutdown.notify_one();
                self.shared.mark_closed();
                return Err(e);
            }
        };

        let opened = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Open;
                true
            } else {
                false
            }
        });
        if !opened {
            return Err(SessionError::ConnectionClosed);
        }

        tracing::info!(
            session_id = %reply.session_id,
            base = ?version,
            "initialized: server_capabilities={}",
            reply.capabilities
        );
        Ok(())
    }

    async fn handshake<R, W>(
        &self,
        reader: R,
        writer: W,
        outbound: OutboundReceiver,
        hello_rx: oneshot::Receiver<Result<HelloReply>>,
    ) -> Result<(HelloReply, BaseVersion)>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let hello = build_hello(&self.shared.client_capabilities)?;
        self.send(hello)?;

        tokio::spawn(
            worker::run(self.shared.clone(), reader, writer, outbound)
                .instrument(self.shared.span.clone()),
        );

        let received = match self.shared.config.hello_timeout {
            Some(limit) => tokio::time::timeout(limit, hello_rx)
                .await
                .map_err(|_| SessionError::HandshakeTimeout)?,
            None => hello_rx.await,
        };
        let reply = received.map_err(|_| {
            SessionError::HandshakeFailure("worker stopped before the hello exchange".to_string())
        })??;

        let version = negotiate_base(&self.shared.client_capabilities, &reply.capabilities)
            .map_err(|e| SessionError::HandshakeFailure(e.to_string()))?;
        Ok((reply, version))
    }

    /// Queue a message for the worker to frame and write.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] if the channel is down; nothing is
    /// queued in that case.
    pub fn send(&self, message: impl Into<String>) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let message = message.into();
        tracing::debug!(parent: &self.shared.span, len = message.len(), "queueing message");
        self.shared.queue.push(message)
    }

    /// Ask the worker to shut the channel down.
    ///
    /// Returns immediately; use [`Session::wait_closed`] to wait for it.
    pub fn close(&self) {
        tracing::debug!(parent: &self.shared.span, "close requested");
        self.shared.shutdown.notify_one();
        if self.state() == SessionState::Created {
            self.shared.mark_closed();
        }
    }

    /// Wait until the session reaches [`SessionState::Closed`].
    pub async fn wait_closed(&self) {
        let mut rx = self.shared.state.subscribe();
        // The sender lives in `shared`, which `self` keeps alive.
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    /// Register a listener for inbound messages and errors.
    pub fn add_listener<L: SessionListener>(&self, listener: Arc<L>) {
        self.shared.listeners.add(listener);
    }

    /// Unregister a listener.
    pub fn remove_listener<L: ?Sized>(&self, listener: &Arc<L>) {
        self.shared.listeners.remove(listener);
    }

    /// First registered listener of type `L`.
    pub fn find_listener<L: SessionListener>(&self) -> Option<Arc<L>> {
        self.shared.listeners.find::<L>()
    }

    /// First registered listener matching `predicate`.
    pub fn find_listener_by<P>(&self, predicate: P) -> Option<Arc<dyn SessionListener>>
    where
        P: Fn(&dyn SessionListener) -> bool,
    {
        self.shared.listeners.find_by(predicate)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    /// True while the channel is up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Capabilities advertised in the client hello.
    pub fn client_capabilities(&self) -> &Capabilities {
        &self.shared.client_capabilities
    }

    /// Capabilities from the server hello; `None` before the handshake.
    pub fn server_capabilities(&self) -> Option<&Capabilities> {
        self.shared.server_capabilities.get()
    }

    /// Server-assigned session id; `None` before the handshake.
    pub fn id(&self) -> Option<&str> {
        self.shared.session_id.get().map(String::as_str)
    }

    /// Framing used after the handshake; `None` before it or if the peers
    /// share no base version.
    pub fn base_version(&self) -> Option<BaseVersion> {
        self.shared.negotiated_version().and_then(Result::ok)
    }

    /// Messages queued but not yet taken by the worker.
    pub fn pending_messages(&self) -> usize {
        self.shared.queue.pending_count()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}
