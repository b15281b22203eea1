//! Listener registry and fan-out.
//!
//! The registry is the only state touched by both the application and the
//! background worker. Dispatch copies the listener list under the lock and
//! invokes callbacks after releasing it, so a slow listener never blocks
//! `add`/`remove`.
//!
//! Failure policy differs by path:
//! - message dispatch: a listener error or panic aborts dispatch and is returned to
//!   the worker, which treats it as fatal
//! - error dispatch: listener errors and panics are logged, and the
//!   remaining listeners are still notified

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{parse_root, SessionListener};
use crate::error::{Result, SessionError};

struct Entry {
    /// Address of the listener allocation; identity key.
    key: usize,
    listener: Arc<dyn SessionListener>,
    any: Arc<dyn Any + Send + Sync>,
}

fn identity<L: ?Sized>(listener: &Arc<L>) -> usize {
    Arc::as_ptr(listener).cast::<()>() as usize
}

/// Set of listeners keyed by identity.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener. Adding the same `Arc` twice is a no-op.
    pub fn add<L: SessionListener>(&self, listener: Arc<L>) {
        let key = identity(&listener);
        let mut entries = self.lock();
        if entries.iter().any(|e| e.key == key) {
            return;
        }
        tracing::debug!(listener = std::any::type_name::<L>(), "installing listener");
        entries.push(Entry {
            key,
            listener: listener.clone(),
            any: listener,
        });
    }

    /// Unregister a listener. Unknown listeners are ignored.
    pub fn remove<L: ?Sized>(&self, listener: &Arc<L>) {
        let key = identity(listener);
        tracing::debug!(listener = std::any::type_name::<L>(), "discarding listener");
        self.lock().retain(|e| e.key != key);
    }

    /// First registered listener of type `L`.
    pub fn find<L: SessionListener>(&self) -> Option<Arc<L>> {
        self.lock()
            .iter()
            .find_map(|e| e.any.clone().downcast::<L>().ok())
    }

    /// First registered listener matching a predicate.
    pub fn find_by<P>(&self, predicate: P) -> Option<Arc<dyn SessionListener>>
    where
        P: Fn(&dyn SessionListener) -> bool,
    {
        self.lock()
            .iter()
            .find(|e| predicate(e.listener.as_ref()))
            .map(|e| e.listener.clone())
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn SessionListener>> {
        self.lock().iter().map(|e| e.listener.clone()).collect()
    }

    /// Deliver a raw inbound message to every listener.
    ///
    /// Messages that are not UTF-8 or whose root element does not parse
    /// are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ListenerFault`] for the first listener that
    /// fails or panics; later listeners are not called.
    pub fn dispatch_message(&self, raw: &[u8]) -> Result<()> {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("error decoding dispatch message: {}", e);
                return Ok(());
            }
        };

        let root = match parse_root(text) {
            Ok(root) => root,
            Err(e) => {
                tracing::error!("error parsing dispatch message: {}", e);
                return Ok(());
            }
        };

        for listener in self.snapshot() {
            tracing::debug!(tag = %root.tag, "dispatching message");
            match catch_unwind(AssertUnwindSafe(|| listener.on_message(&root, text))) {
                Ok(result) => result.map_err(SessionError::ListenerFault)?,
                Err(payload) => {
                    return Err(SessionError::ListenerFault(
                        format!("listener panicked: {}", panic_message(payload.as_ref())).into(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Deliver a session error to every listener, isolating failures.
    pub fn dispatch_error(&self, error: &SessionError) {
        for listener in self.snapshot() {
            tracing::debug!(%error, "dispatching error");
            match catch_unwind(AssertUnwindSafe(|| listener.on_error(error))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("error dispatching to listener: {}", e),
                Err(_) => tracing::warn!("listener panicked during error dispatch"),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
