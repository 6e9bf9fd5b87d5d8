//! Client and inter-node listeners.
//!
//! Listeners bind through `std::net` and then hand the socket to the
//! reactor, which tracks the accept loop and every accepted connection as
//! TCP resources.

mod errors;
mod handler;
mod listener;
mod session;
#[cfg(test)]
mod tests;

use std::fmt;

pub use self::errors::ListenerError;
pub use self::handler::{BackendHandler, ClientHandler, ConnectionFuture, ConnectionHandler};
pub use self::listener::start_listener;
pub use self::session::Session;

pub(crate) const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Which listener accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// Client-facing query listener.
    Client,
    /// Inter-node listener.
    Backend,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Backend => "backend",
        })
    }
}
