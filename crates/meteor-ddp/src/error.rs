//! Unified error type for the meteor-ddp client.

use meteor_ddp_protocol::{MethodError, ProtocolError};
use meteor_ddp_session::SessionError;
use meteor_ddp_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `meteor-ddp` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant auto-generates `From` impls, so the `?` operator
/// converts sub-crate errors automatically.
///
/// Errors that happen inside the engine (rather than being returned from a
/// call) reach observers through
/// [`DdpObserver::on_exception`](crate::DdpObserver::on_exception).
#[derive(Debug, thiserror::Error)]
pub enum DdpError {
    /// A transport-level error (open, send, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, version, server `error`).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (account details, login result).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The server answered a method or subscription with an error.
    #[error("method failed: {0}")]
    Method(MethodError),

    /// An observer or listener panicked while handling a callback.
    #[error("callback panicked: {0}")]
    CallbackPanicked(String),

    /// The request was dropped before the server answered, usually
    /// because the client disconnected.
    #[error("request abandoned before a response arrived")]
    RequestAbandoned,
}

impl From<MethodError> for DdpError {
    fn from(err: MethodError) -> Self {
        Self::Method(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let ddp_err: DdpError = err.into();
        assert!(matches!(ddp_err, DdpError::Transport(_)));
        assert!(ddp_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::UnsupportedVersion("2".into());
        let ddp_err: DdpError = err.into();
        assert!(matches!(ddp_err, DdpError::Protocol(_)));
        assert!(ddp_err.to_string().contains('2'));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::MissingIdentity;
        let ddp_err: DdpError = err.into();
        assert!(matches!(ddp_err, DdpError::Session(_)));
    }

    #[test]
    fn test_from_method_error() {
        let err = MethodError::new("404").with_reason("Method not found");
        let ddp_err: DdpError = err.into();
        assert!(matches!(ddp_err, DdpError::Method(_)));
        assert_eq!(ddp_err.to_string(), "method failed: 404: Method not found");
    }
}
