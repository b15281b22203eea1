//! Integration tests for netconf-session.
//!
//! A fake server runs on the other end of an in-memory duplex pipe and
//! speaks raw framed bytes, so these tests cover handshake, framing switch,
//! dispatch and shutdown together.

use std::sync::Arc;
use std::time::Duration;

use netconf_session::capabilities::{BASE_1_0, BASE_1_1};
use netconf_session::framing::{encode_chunked, encode_eom, InboundDecoder};
use netconf_session::handshake::{is_hello, parse_hello};
use netconf_session::{
    BaseVersion, Capabilities, IoTransport, ListenerError, RootElement, Session, SessionBuilder,
    SessionError, SessionListener, SessionState,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

const LIMIT: Duration = Duration::from_secs(5);

fn server_hello(capabilities: &[&str], session_id: &str) -> String {
    let caps: String = capabilities
        .iter()
        .map(|c| format!("<capability>{}</capability>", c))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities>{}</capabilities><session-id>{}</session-id></hello>"#,
        caps, session_id
    )
}

/// Server side of the pipe.
struct FakeServer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
    decoder: InboundDecoder,
}

impl FakeServer {
    fn new(io: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader,
            writer,
            decoder: InboundDecoder::new(1024 * 1024),
        }
    }

    async fn read_message(&mut self) -> String {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(message) = self.decoder.next_message().unwrap() {
                return String::from_utf8(message.to_vec()).unwrap();
            }
            let n = tokio::time::timeout(LIMIT, self.reader.read(&mut buf))
                .await
                .expect("timed out reading from client")
                .unwrap();
            assert!(n > 0, "client closed the channel");
            self.decoder.extend(&buf[..n]);
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read the client hello and answer it.
    async fn handshake(&mut self, capabilities: &[&str], session_id: &str) -> String {
        let hello = self.read_message().await;
        self.write(&encode_eom(server_hello(capabilities, session_id).as_bytes()))
            .await;
        hello
    }
}

/// Connect `builder`'s session to a fake server advertising `capabilities`.
async fn open(builder: SessionBuilder, capabilities: &[&str]) -> (Session, FakeServer) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = builder.build();
    let mut server = FakeServer::new(server_io);

    let (result, _) = tokio::join!(
        session.connect(IoTransport::from_stream(client_io)),
        server.handshake(capabilities, "42"),
    );
    result.unwrap();

    if let Some(version) = session.base_version() {
        server.decoder.switch_to(version);
    }
    (session, server)
}

/// Forwards everything it sees to channels.
struct Recorder {
    messages: mpsc::UnboundedSender<String>,
    errors: mpsc::UnboundedSender<String>,
}

fn recorder() -> (
    Arc<Recorder>,
    mpsc::UnboundedReceiver<String>,
    mpsc::UnboundedReceiver<String>,
) {
    let (messages, messages_rx) = mpsc::unbounded_channel();
    let (errors, errors_rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { messages, errors }), messages_rx, errors_rx)
}

impl SessionListener for Recorder {
    fn on_message(&self, _root: &RootElement, raw: &str) -> Result<(), ListenerError> {
        let _ = self.messages.send(raw.to_string());
        Ok(())
    }

    fn on_error(&self, error: &SessionError) -> Result<(), ListenerError> {
        let _ = self.errors.send(error.to_string());
        Ok(())
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(LIMIT, rx.recv())
        .await
        .expect("timed out waiting for listener")
        .expect("listener channel closed")
}

#[tokio::test]
async fn test_handshake_negotiates_chunked() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::builder().build();
    let mut server = FakeServer::new(server_io);

    let (result, client_hello) = tokio::join!(
        session.connect(IoTransport::from_stream(client_io)),
        server.handshake(&[BASE_1_0, BASE_1_1, ":candidate"], "42"),
    );
    result.unwrap();

    assert!(is_hello(&client_hello));
    let advertised = parse_hello(&client_hello).unwrap().capabilities;
    assert!(advertised.contains(BASE_1_0));
    assert!(advertised.contains(BASE_1_1));

    assert_eq!(session.state(), SessionState::Open);
    assert!(session.is_connected());
    assert_eq!(session.id(), Some("42"));
    assert_eq!(session.base_version(), Some(BaseVersion::V1_1));
    assert!(session.server_capabilities().unwrap().contains(":base:1.1"));
    // The transient hello listener is gone.
    assert_eq!(session.listener_count(), 0);
}

#[tokio::test]
async fn test_chunked_exchange_after_handshake() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_0, BASE_1_1]).await;
    let (recorder, mut messages, _errors) = recorder();
    session.add_listener(recorder);

    let rpc = r#"<rpc message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><get/></rpc>"#;
    session.send(rpc).unwrap();
    assert_eq!(server.read_message().await, rpc);

    // Small chunks, written a few bytes at a time.
    let reply = r#"<rpc-reply message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><data/></rpc-reply>"#;
    let wire = encode_chunked(reply.as_bytes(), 8).unwrap();
    for piece in wire.chunks(3) {
        server.write(piece).await;
    }

    assert_eq!(next(&mut messages).await, reply);
}

#[tokio::test]
async fn test_falls_back_to_eom() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_0]).await;
    assert_eq!(session.base_version(), Some(BaseVersion::V1_0));

    let (recorder, mut messages, _errors) = recorder();
    session.add_listener(recorder);

    session.send("<rpc message-id=\"7\"><get-config/></rpc>").unwrap();
    assert_eq!(server.read_message().await, "<rpc message-id=\"7\"><get-config/></rpc>");

    server
        .write(b"<rpc-reply message-id=\"7\"><ok/></rpc-reply>]]>]]>")
        .await;
    assert_eq!(
        next(&mut messages).await,
        "<rpc-reply message-id=\"7\"><ok/></rpc-reply>"
    );
}

#[tokio::test]
async fn test_reply_in_same_read_as_hello() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::builder().build();
    let (recorder, mut messages, _errors) = recorder();
    session.add_listener(recorder);

    let mut server = FakeServer::new(server_io);
    let notification = "<notification xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\"/>";

    let serve = async {
        server.read_message().await;
        let mut wire = encode_eom(server_hello(&[BASE_1_1], "5").as_bytes()).to_vec();
        wire.extend_from_slice(&encode_chunked(notification.as_bytes(), 1024).unwrap());
        server.write(&wire).await;
    };
    let (result, _) = tokio::join!(session.connect(IoTransport::from_stream(client_io)), serve);
    result.unwrap();

    assert!(is_hello(&next(&mut messages).await));
    assert_eq!(next(&mut messages).await, notification);
}

#[tokio::test]
async fn test_malformed_message_dropped() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_1]).await;
    let (recorder, mut messages, mut errors) = recorder();
    session.add_listener(recorder);

    server
        .write(&encode_chunked(b"this is << not xml", 1024).unwrap())
        .await;
    server.write(&encode_chunked(b"<rpc-reply/>", 1024).unwrap()).await;

    assert_eq!(next(&mut messages).await, "<rpc-reply/>");
    assert!(errors.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_large_message_split_into_chunks() {
    let (session, mut server) = open(Session::builder().outbound_chunk_size(16), &[BASE_1_1]).await;

    let rpc = format!("<rpc message-id=\"9\"><edit-config>{}</edit-config></rpc>", "x".repeat(100));
    session.send(rpc.clone()).unwrap();

    assert_eq!(server.read_message().await, rpc);
}

#[tokio::test]
async fn test_messages_written_in_order() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_1]).await;

    for i in 0..20 {
        session.send(format!("<rpc message-id=\"{}\"/>", i)).unwrap();
    }
    for i in 0..20 {
        assert_eq!(server.read_message().await, format!("<rpc message-id=\"{}\"/>", i));
    }
}

#[tokio::test]
async fn test_peer_eof_dispatches_error() {
    let (session, server) = open(Session::builder(), &[BASE_1_1]).await;
    let (recorder, _messages, mut errors) = recorder();
    session.add_listener(recorder);

    drop(server);

    assert_eq!(next(&mut errors).await, "Connection closed");
    tokio::time::timeout(LIMIT, session.wait_closed()).await.unwrap();
    assert!(!session.is_connected());
    assert!(matches!(session.send("<rpc/>"), Err(SessionError::NotConnected)));
}

#[tokio::test]
async fn test_framing_violation_closes_session() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_1]).await;
    let (recorder, _messages, mut errors) = recorder();
    session.add_listener(recorder);

    server.write(b"<rpc-reply/>]]>]]>").await;

    assert!(next(&mut errors).await.starts_with("Framing violation"));
    tokio::time::timeout(LIMIT, session.wait_closed()).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_oversized_message_closes_session() {
    let (session, mut server) = open(Session::builder().max_message_size(32), &[BASE_1_0]).await;
    let (recorder, _messages, mut errors) = recorder();
    session.add_listener(recorder);

    server.write(&[b'a'; 64]).await;

    assert!(next(&mut errors).await.contains("exceeds maximum 32"));
    assert!(!session.is_connected());
}

struct Faulty;

impl SessionListener for Faulty {
    fn on_message(&self, _root: &RootElement, _raw: &str) -> Result<(), ListenerError> {
        Err("cannot handle reply".into())
    }

    fn on_error(&self, _error: &SessionError) -> Result<(), ListenerError> {
        Err("cannot handle error either".into())
    }
}

#[tokio::test]
async fn test_listener_fault_is_fatal() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_1]).await;
    let (recorder, _messages, mut errors) = recorder();
    session.add_listener(Arc::new(Faulty));
    session.add_listener(recorder);

    server.write(&encode_chunked(b"<rpc-reply/>", 1024).unwrap()).await;

    // The failing listener's on_error does not stop the others.
    assert_eq!(next(&mut errors).await, "Listener fault: cannot handle reply");
    tokio::time::timeout(LIMIT, session.wait_closed()).await.unwrap();
}

#[tokio::test]
async fn test_no_common_base_version() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::new(Capabilities::new([BASE_1_1]));
    let mut server = FakeServer::new(server_io);

    let (result, _) = tokio::join!(
        session.connect(IoTransport::from_stream(client_io)),
        server.handshake(&["urn:example:only-this"], "3"),
    );

    assert!(matches!(result, Err(SessionError::HandshakeFailure(_))));
    tokio::time::timeout(LIMIT, session.wait_closed()).await.unwrap();
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_invalid_server_hello() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::builder().build();
    let mut server = FakeServer::new(server_io);

    let serve = async {
        server.read_message().await;
        server.write(b"<hello><capabilities></hello>]]>]]>").await;
    };
    let (result, _) = tokio::join!(session.connect(IoTransport::from_stream(client_io)), serve);

    let err = result.unwrap_err();
    assert!(err.to_string().contains("invalid hello"));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_hello_timeout() {
    let (client_io, _server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::builder()
        .hello_timeout(Duration::from_millis(50))
        .build();

    let err = session
        .connect(IoTransport::from_stream(client_io))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::HandshakeTimeout));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.listener_count(), 0);
}

#[tokio::test]
async fn test_server_closes_during_handshake() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::builder().build();
    let mut server = FakeServer::new(server_io);

    let serve = async move {
        server.read_message().await;
        drop(server);
    };
    let (result, _) = tokio::join!(session.connect(IoTransport::from_stream(client_io)), serve);

    let err = result.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeFailure(_)));
    assert!(err.to_string().contains("Connection closed"));
}

#[tokio::test]
async fn test_connect_twice() {
    let (session, _server) = open(Session::builder(), &[BASE_1_1]).await;
    let (other, _peer) = tokio::io::duplex(1024);

    let err = session
        .connect(IoTransport::from_stream(other))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyStarted));
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_close_shuts_channel() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_1]).await;
    let (recorder, _messages, mut errors) = recorder();
    session.add_listener(recorder);

    session.close();
    tokio::time::timeout(LIMIT, session.wait_closed()).await.unwrap();
    assert!(!session.is_connected());

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(LIMIT, server.reader.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    // Local close is not an error.
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_find_and_remove_listener() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_1]).await;
    let (recorder, mut messages, _errors) = recorder();
    session.add_listener(recorder.clone());
    session.add_listener(recorder.clone());
    assert_eq!(session.listener_count(), 1);

    let found = session.find_listener::<Recorder>().unwrap();
    assert!(Arc::ptr_eq(&found, &recorder));
    assert!(session.find_listener::<Faulty>().is_none());

    server.write(&encode_chunked(b"<one/>", 1024).unwrap()).await;
    assert_eq!(next(&mut messages).await, "<one/>");

    session.remove_listener(&recorder);
    assert_eq!(session.listener_count(), 0);
    server.write(&encode_chunked(b"<two/>", 1024).unwrap()).await;

    // Round-trip something so the worker has processed <two/>.
    session.send("<rpc/>").unwrap();
    server.read_message().await;
    assert!(messages.try_recv().is_err());
}

struct PanicsOnReply;

impl SessionListener for PanicsOnReply {
    fn on_message(&self, root: &RootElement, _raw: &str) -> Result<(), ListenerError> {
        if root.local_name() == "rpc-reply" {
            panic!("reply handler bug");
        }
        Ok(())
    }

    fn on_error(&self, _error: &SessionError) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_listener_panic_closes_session() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_0]).await;
    let (recorder, _messages, mut errors) = recorder();
    session.add_listener(Arc::new(PanicsOnReply));
    session.add_listener(recorder);

    server.write(&encode_eom(b"<rpc-reply message-id=\"1\"><ok/></rpc-reply>")).await;

    let error = next(&mut errors).await;
    assert!(error.contains("listener panicked: reply handler bug"));
    tokio::time::timeout(LIMIT, session.wait_closed()).await.unwrap();

    assert_eq!(session.state(), SessionState::Closed);
    assert!(!session.is_connected());
    assert!(matches!(session.send("<rpc/>"), Err(SessionError::NotConnected)));
    // Reported once.
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_malformed_eom_message_in_same_read() {
    let (session, mut server) = open(Session::builder(), &[BASE_1_0]).await;
    assert_eq!(session.base_version(), Some(BaseVersion::V1_0));

    let (recorder, mut messages, mut errors) = recorder();
    session.add_listener(recorder);

    let mut wire = encode_eom(b"<rpc-reply message-id=\"1\"/>").to_vec();
    wire.extend_from_slice(&encode_eom(b"<<junk"));
    wire.extend_from_slice(&encode_eom(b"<rpc-reply message-id=\"2\"/>"));
    server.write(&wire).await;

    assert_eq!(next(&mut messages).await, "<rpc-reply message-id=\"1\"/>");
    assert_eq!(next(&mut messages).await, "<rpc-reply message-id=\"2\"/>");

    // Round-trip so the worker is past the whole buffer.
    session.send("<rpc message-id=\"3\"/>").unwrap();
    server.read_message().await;

    assert!(messages.try_recv().is_err());
    assert!(errors.try_recv().is_err());
    assert_eq!(session.state(), SessionState::Open);
}

struct PanicsOnHello;

impl SessionListener for PanicsOnHello {
    fn on_message(&self, root: &RootElement, _raw: &str) -> Result<(), ListenerError> {
        if root.local_name() == "hello" {
            panic!("hello handler bug");
        }
        Ok(())
    }

    fn on_error(&self, _error: &SessionError) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_listener_panic_during_handshake() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let session = Session::builder().build();
    session.add_listener(Arc::new(PanicsOnHello));
    let mut server = FakeServer::new(server_io);

    let (result, _) = tokio::time::timeout(
        LIMIT,
        async {
            tokio::join!(
                session.connect(IoTransport::from_stream(client_io)),
                server.handshake(&[BASE_1_1], "8"),
            )
        },
    )
    .await
    .expect("connect hung after listener panic");

    let err = result.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeFailure(_)));
    assert!(err.to_string().contains("listener panicked"));
    assert_eq!(session.state(), SessionState::Closed);
}
