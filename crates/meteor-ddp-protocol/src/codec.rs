//! Codec trait and implementations for turning messages into text frames.
//!
//! The engine doesn't care HOW messages are serialized; it just needs
//! something that implements [`Codec`]. DDP is specified as JSON, so
//! [`JsonCodec`] is the only implementation shipped, but tests and
//! embedders can swap in their own (for example one that records frames).

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that encodes values to text frames and decodes them back.
///
/// `Send + Sync + 'static` because the engine holding the codec is shared
/// between the application's threads and the transport's I/O task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails and
    /// `ProtocolError::EmptyFrame` if it produced nothing worth sending.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text frame back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the frame is malformed or does
    /// not match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        frame: &str,
    ) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`), the DDP wire format.
///
/// ## Example
///
/// ```rust
/// use meteor_ddp_protocol::{ClientMessage, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let frame = codec
///     .encode(&ClientMessage::Unsub { id: "sub-1".into() })
///     .unwrap();
/// assert_eq!(frame, r#"{"msg":"unsub","id":"sub-1"}"#);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        let frame = serde_json::to_string(value).map_err(ProtocolError::Encode)?;
        if frame.is_empty() || frame == "null" {
            return Err(ProtocolError::EmptyFrame);
        }
        Ok(frame)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        frame: &str,
    ) -> Result<T, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }
}
