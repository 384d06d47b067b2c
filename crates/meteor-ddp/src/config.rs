//! Client configuration.

use meteor_ddp_protocol::DdpVersion;

/// Default ceiling for automatic reconnects after the transport drops.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default credential-store key of the resume token.
pub const DEFAULT_LOGIN_TOKEN_KEY: &str = "login_token";

/// Configuration for a [`DdpClient`](crate::DdpClient).
///
/// Create one with `ClientConfig::default()` and override just the fields
/// you care about:
///
/// ```rust
/// use meteor_ddp::ClientConfig;
///
/// let config = ClientConfig {
///     max_reconnect_attempts: 10,
///     ..ClientConfig::default()
/// };
/// assert_eq!(config.login_token_key, "login_token");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Protocol version offered first in the handshake.
    pub protocol_version: DdpVersion,

    /// How many times in a row the client re-opens a dropped transport
    /// before giving up and disconnecting for good. The count resets once
    /// a session is ready again.
    pub max_reconnect_attempts: u32,

    /// Key the resume token is stored under.
    pub login_token_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol_version: DdpVersion::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            login_token_key: DEFAULT_LOGIN_TOKEN_KEY.to_string(),
        }
    }
}
