//! One-shot listener that waits for the peer's hello.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use super::hello::{parse_hello, HelloReply};
use crate::capabilities::NETCONF_NS;
use crate::error::{ListenerError, Result, SessionError};
use crate::listener::{RootElement, SessionListener};

type OnHello = Box<dyn Fn(&HelloReply) + Send + Sync>;

/// Transient listener completing the handshake.
///
/// Fires at most once: the first `<hello>` (parsed or not) or the first
/// session error resolves the receiver returned by [`HelloListener::new`].
/// `on_hello` runs on the worker before the receiver resolves, so state it
/// records is visible to the worker's next framing decision.
pub struct HelloListener {
    tx: Mutex<Option<oneshot::Sender<Result<HelloReply>>>>,
    on_hello: OnHello,
}

impl HelloListener {
    /// Create the listener and the receiver for its outcome.
    pub fn new<F>(on_hello: F) -> (Arc<Self>, oneshot::Receiver<Result<HelloReply>>)
    where
        F: Fn(&HelloReply) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let listener = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            on_hello: Box::new(on_hello),
        });
        (listener, rx)
    }

    fn complete(&self, result: Result<HelloReply>) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => {
                if let Ok(reply) = &result {
                    (self.on_hello)(reply);
                }
                // Receiver gone means the initiator stopped waiting.
                let _ = tx.send(result);
            }
            None => tracing::debug!("handshake already completed; ignoring"),
        }
    }
}

impl SessionListener for HelloListener {
    fn on_message(&self, root: &RootElement, raw: &str) -> std::result::Result<(), ListenerError> {
        if root.is(NETCONF_NS, "hello") {
            let result = parse_hello(raw)
                .map_err(|e| SessionError::HandshakeFailure(format!("invalid hello: {}", e)));
            self.complete(result);
        }
        Ok(())
    }

    fn on_error(&self, error: &SessionError) -> std::result::Result<(), ListenerError> {
        self.complete(Err(SessionError::HandshakeFailure(error.to_string())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::parse_root;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn deliver(listener: &HelloListener, raw: &str) {
        let root = parse_root(raw).unwrap();
        listener.on_message(&root, raw).unwrap();
    }

    #[tokio::test]
    async fn test_completes_on_hello() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let (listener, rx) = HelloListener::new(move |reply| {
            assert_eq!(reply.session_id, "9");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        deliver(&listener, "<rpc-reply/>");
        deliver(
            &listener,
            "<hello><capabilities><capability>c</capability></capabilities><session-id>9</session-id></hello>",
        );
        deliver(&listener, "<hello><session-id>10</session-id></hello>");

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.session_id, "9");
        assert!(reply.capabilities.contains("c"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fails_on_unparseable_hello() {
        let (listener, rx) = HelloListener::new(|_| panic!("must not record"));

        // Root parses, body does not.
        deliver(&listener, "<hello><capabilities></hello>");

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::HandshakeFailure(_)));
    }

    #[tokio::test]
    async fn test_fails_on_session_error() {
        let (listener, rx) = HelloListener::new(|_| {});
        listener.on_error(&SessionError::ConnectionClosed).unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("Connection closed"));
    }
}
