//! Listener module - delivery of inbound messages and session errors.
//!
//! Provides:
//! - [`SessionListener`] - callbacks consumers implement
//! - [`ListenerRegistry`] - identity-keyed set with snapshot dispatch
//! - [`parse_root`] - cheap root-element parse used to route messages
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use netconf_session::listener::{ListenerRegistry, RootElement, SessionListener};
//! use netconf_session::{ListenerError, SessionError};
//!
//! struct PrintReplies;
//!
//! impl SessionListener for PrintReplies {
//!     fn on_message(&self, root: &RootElement, raw: &str) -> Result<(), ListenerError> {
//!         if root.local_name() == "rpc-reply" {
//!             println!("{}", raw);
//!         }
//!         Ok(())
//!     }
//!
//!     fn on_error(&self, error: &SessionError) -> Result<(), ListenerError> {
//!         eprintln!("session failed: {}", error);
//!         Ok(())
//!     }
//! }
//!
//! let registry = ListenerRegistry::new();
//! registry.add(Arc::new(PrintReplies));
//! registry.dispatch_message(b"<rpc-reply message-id=\"1\"><ok/></rpc-reply>").unwrap();
//! ```

mod registry;
mod root;

pub use registry::ListenerRegistry;
pub use root::{parse_root, RootElement};

pub(crate) use root::{clark_name, namespace_of};

use crate::error::{ListenerError, SessionError};

/// Observer of a session's inbound messages and fatal errors.
///
/// Callbacks run on the session's background worker. Keep them short;
/// the worker neither reads nor writes while a callback runs.
pub trait SessionListener: Send + Sync + 'static {
    /// Called for every inbound message whose root element parses.
    ///
    /// `root` carries the qualified root tag and attributes so the listener
    /// can ignore irrelevant messages without a full parse; `raw` is the
    /// complete message text.
    ///
    /// Returning an error is fatal to the session.
    fn on_message(&self, root: &RootElement, raw: &str) -> Result<(), ListenerError>;

    /// Called once when the session fails. Errors returned here are logged.
    fn on_error(&self, error: &SessionError) -> Result<(), ListenerError>;
}
