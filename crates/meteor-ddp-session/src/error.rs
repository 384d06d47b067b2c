//! Error types for the session layer.

/// Errors that can occur while preparing or interpreting a login.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A new account needs a username or an email to log in with.
    /// Nothing is sent to the server when this is returned.
    #[error("account needs a username or an email")]
    MissingIdentity,

    /// The server answered a login call with something that isn't a
    /// login result (no user `id` or no `token`).
    #[error("invalid login result: {0}")]
    InvalidLoginResult(String),
}
