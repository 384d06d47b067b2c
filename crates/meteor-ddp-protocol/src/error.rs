//! Error types for the protocol layer.
//!
//! Each crate in the workspace defines its own error enum. A
//! `ProtocolError` always means something went wrong with the *shape* of
//! a message (serialising it, parsing it, or negotiating the protocol),
//! never with the network underneath.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into a text frame).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning a text frame into a message).
    ///
    /// Common causes: malformed JSON, a known `msg` with missing
    /// required fields, or wrong data types.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// Encoding produced nothing to send.
    #[error("message would be serialized to an empty frame")]
    EmptyFrame,

    /// The server asked for a protocol version this client cannot speak.
    #[error("protocol version not supported: {0}")]
    UnsupportedVersion(String),

    /// The server rejected a message with a top-level `error` frame.
    #[error("server rejected message: {0}")]
    Rejected(String),
}
