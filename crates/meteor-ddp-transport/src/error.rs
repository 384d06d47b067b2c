/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// An operation needed an open connection but none exists.
    #[error("transport is not open")]
    NotOpen,

    /// `open()` was called before a handler was bound.
    #[error("no transport handler bound")]
    NoHandler,

    /// The transport was created outside of a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,

    /// An error the transport reported through a
    /// [`TransportEvent::Error`](crate::TransportEvent::Error).
    #[error("transport error: {0}")]
    Reported(String),
}
