//! Transport port for the meteor-ddp client.
//!
//! The protocol engine never touches sockets directly. It talks to a
//! [`Transport`]: something that can open a duplex text channel, send text
//! frames over it and close it again. Everything the channel reports back
//! (opened, closed, a frame arrived, an error happened) is delivered as a
//! [`TransportEvent`] to the single [`TransportHandler`] bound to it.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};

use std::fmt;
use std::sync::Arc;

/// Opaque identifier for one physical connection opened by a transport.
///
/// A transport may open many connections over its lifetime (one per
/// reconnect); the id lets logs and the transport itself tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something that happened on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is open and frames can be sent.
    Connected,
    /// The channel closed, cleanly or not.
    Disconnected,
    /// A text frame arrived.
    Text(String),
    /// The channel reported an error. A `Disconnected` event follows
    /// separately if the error was fatal to the connection.
    Error(String),
}

/// Receives every [`TransportEvent`] of a transport.
///
/// Events may be delivered from any thread (typically the transport's
/// I/O task), but a transport delivers them one at a time and in order.
pub trait TransportHandler: Send + Sync + 'static {
    /// Called for each event, in the order they happened.
    fn on_event(&self, event: TransportEvent);
}

/// A duplex text-message channel that the engine can open and close.
///
/// ## Contract
///
/// - `open`, `close` and `send_text` never block on the network; the
///   outcome of `open`/`close` is reported later through the handler.
/// - `send_text` must not call the handler synchronously. The engine sends
///   frames while holding its state lock, so re-entering it from inside
///   `send_text` would deadlock.
/// - Exactly one handler is bound; binding again replaces it.
pub trait Transport: Send + Sync + 'static {
    /// Registers the handler that receives this transport's events.
    fn bind_handler(&self, handler: Arc<dyn TransportHandler>);

    /// Starts opening a connection. Success is reported as
    /// [`TransportEvent::Connected`].
    fn open(&self) -> Result<(), TransportError>;

    /// Starts closing the current connection.
    fn close(&self) -> Result<(), TransportError>;

    /// Queues a text frame for sending on the current connection.
    fn send_text(&self, frame: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_transport_event_equality() {
        assert_eq!(
            TransportEvent::Text("a".into()),
            TransportEvent::Text("a".into())
        );
        assert_ne!(TransportEvent::Connected, TransportEvent::Disconnected);
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::NotOpen.to_string(),
            "transport is not open"
        );
        assert_eq!(
            TransportError::ConnectionClosed("bye".into()).to_string(),
            "connection closed: bye"
        );
    }
}
