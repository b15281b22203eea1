//! Handshake module - capability exchange through `<hello>`.
//!
//! # Workflow
//!
//! 1. Session registers a [`HelloListener`]
//! 2. Client `<hello>` is queued (always end-of-message framed)
//! 3. Worker starts reading; the server's `<hello>` completes the listener
//! 4. Session records session id and server capabilities, unregisters the
//!    listener and selects the base version for later messages

mod hello;
mod listener;

pub use hello::{build_hello, is_hello, parse_hello, HelloReply, NO_SESSION_ID};
pub use listener::HelloListener;
