//! Login types: who the client is logged in as, and how to ask the server.
//!
//! The server side of accounts is just method calls (`login`, `logout`,
//! `createUser`). This module builds their parameters and interprets
//! their results; the engine decides when to send them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::SessionError;

// ---------------------------------------------------------------------------
// LoginRecord
// ---------------------------------------------------------------------------

/// The client's record of the current login.
///
/// ```text
///   logged out ──(login / resume ok)──→ logged in
///        ↑                                  │
///        └──(logout ok / resume failed)─────┘
/// ```
///
/// The token kept here is the in-memory copy; the engine persists it
/// through a [`CredentialStore`](crate::CredentialStore) alongside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginRecord {
    /// Id of the logged-in user, `None` when logged out.
    pub user_id: Option<String>,

    /// Resume token of the current login.
    pub token: Option<String>,

    /// Whether the last handshake logged in by resuming a stored token.
    pub signed_in_automatically: bool,
}

impl LoginRecord {
    /// Returns `true` if a user is logged in.
    pub fn is_logged_in(&self) -> bool {
        self.user_id.is_some()
    }

    /// Records a successful login.
    pub fn record(&mut self, result: &LoginResult) {
        self.user_id = Some(result.id.clone());
        self.token = Some(result.token.clone());
        tracing::info!(user_id = %result.id, "logged in");
    }

    /// Forgets the user and token. `signed_in_automatically` is left to
    /// the handshake that owns it.
    pub fn clear(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            tracing::info!(%user_id, "logged out");
        }
        self.token = None;
    }
}

// ---------------------------------------------------------------------------
// LoginResult
// ---------------------------------------------------------------------------

/// The value a successful `login` or `createUser` call returns.
///
/// ```json
/// { "id": "u1", "token": "…", "tokenExpires": { "$date": 1700000000000 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    /// The user's id.
    pub id: String,

    /// Resume token for future logins.
    pub token: String,

    /// Expiry as sent by the server (usually an EJSON date), untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires: Option<Value>,
}

impl LoginResult {
    /// Reads a login result out of a method's result value.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidLoginResult`] when `value` is missing
    /// or lacks a string `id` or `token`.
    pub fn from_value(value: Option<&Value>) -> Result<Self, SessionError> {
        let value = value.ok_or_else(|| {
            SessionError::InvalidLoginResult("empty result".into())
        })?;
        Self::deserialize(value)
            .map_err(|e| SessionError::InvalidLoginResult(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// LoginIdentity
// ---------------------------------------------------------------------------

/// How a user identifies for a password login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentity {
    Username(String),
    Email(String),
}

impl LoginIdentity {
    /// Builds the `login` method parameters for a password login:
    /// `[{ "user": { "username" | "email": … }, "password": … }]`.
    pub fn password_params(&self, password: &str) -> Vec<Value> {
        let user = match self {
            Self::Username(username) => json!({ "username": username }),
            Self::Email(email) => json!({ "email": email }),
        };
        vec![json!({ "user": user, "password": password })]
    }
}

/// Builds the `login` method parameters for a token login:
/// `[{ "resume": token }]`.
pub fn resume_params(token: &str) -> Vec<Value> {
    vec![json!({ "resume": token })]
}

// ---------------------------------------------------------------------------
// NewAccount
// ---------------------------------------------------------------------------

/// Details for a `createUser` call.
///
/// At least one of `username` and `email` must be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewAccount {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
    /// Free-form profile document stored with the user.
    pub profile: Option<Value>,
}

impl NewAccount {
    /// Creates an account request with just a password; set `username`
    /// and/or `email` with the builder methods.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn profile(mut self, profile: Value) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Builds the `createUser` method parameters.
    ///
    /// # Errors
    /// Returns [`SessionError::MissingIdentity`] if neither a username nor
    /// an email is set.
    pub fn to_params(&self) -> Result<Vec<Value>, SessionError> {
        if self.username.is_none() && self.email.is_none() {
            return Err(SessionError::MissingIdentity);
        }

        let mut account = Map::new();
        if let Some(username) = &self.username {
            account.insert("username".into(), Value::from(username.as_str()));
        }
        if let Some(email) = &self.email {
            account.insert("email".into(), Value::from(email.as_str()));
        }
        account.insert("password".into(), Value::from(self.password.as_str()));
        if let Some(profile) = &self.profile {
            account.insert("profile".into(), profile.clone());
        }
        Ok(vec![Value::Object(account)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_result(id: &str, token: &str) -> LoginResult {
        LoginResult {
            id: id.into(),
            token: token.into(),
            token_expires: None,
        }
    }

    // =====================================================================
    // LoginRecord
    // =====================================================================

    #[test]
    fn test_record_default_is_logged_out() {
        let record = LoginRecord::default();
        assert!(!record.is_logged_in());
        assert!(!record.signed_in_automatically);
    }

    #[test]
    fn test_record_login_sets_user_and_token() {
        let mut record = LoginRecord::default();
        record.record(&login_result("u1", "t1"));

        assert!(record.is_logged_in());
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_eq!(record.token.as_deref(), Some("t1"));
    }

    #[test]
    fn test_clear_forgets_user_and_token_keeps_flag() {
        let mut record = LoginRecord {
            signed_in_automatically: true,
            ..LoginRecord::default()
        };
        record.record(&login_result("u1", "t1"));

        record.clear();

        assert!(!record.is_logged_in());
        assert_eq!(record.token, None);
        assert!(record.signed_in_automatically);
    }

    // =====================================================================
    // LoginResult
    // =====================================================================

    #[test]
    fn test_from_value_reads_id_token_and_expiry() {
        let value = json!({
            "id": "u1",
            "token": "t1",
            "tokenExpires": {"$date": 1_700_000_000_000_u64}
        });

        let result = LoginResult::from_value(Some(&value)).unwrap();

        assert_eq!(result.id, "u1");
        assert_eq!(result.token, "t1");
        assert_eq!(
            result.token_expires,
            Some(json!({"$date": 1_700_000_000_000_u64}))
        );
    }

    #[test]
    fn test_from_value_missing_token_is_invalid() {
        let value = json!({"id": "u1"});
        let result = LoginResult::from_value(Some(&value));
        assert!(matches!(result, Err(SessionError::InvalidLoginResult(_))));
    }

    #[test]
    fn test_from_value_none_is_invalid() {
        let result = LoginResult::from_value(None);
        assert!(matches!(result, Err(SessionError::InvalidLoginResult(_))));
    }

    // =====================================================================
    // Parameters
    // =====================================================================

    #[test]
    fn test_password_params_with_username() {
        let params = LoginIdentity::Username("ann".into()).password_params("pw");
        assert_eq!(
            params,
            vec![json!({"user": {"username": "ann"}, "password": "pw"})]
        );
    }

    #[test]
    fn test_password_params_with_email() {
        let params =
            LoginIdentity::Email("ann@example.com".into()).password_params("pw");
        assert_eq!(
            params,
            vec![json!({"user": {"email": "ann@example.com"}, "password": "pw"})]
        );
    }

    #[test]
    fn test_resume_params_shape() {
        assert_eq!(resume_params("t1"), vec![json!({"resume": "t1"})]);
    }

    #[test]
    fn test_new_account_without_identity_fails() {
        let result = NewAccount::new("pw").to_params();
        assert!(matches!(result, Err(SessionError::MissingIdentity)));
    }

    #[test]
    fn test_new_account_params_include_optional_fields() {
        let params = NewAccount::new("pw")
            .username("ann")
            .email("ann@example.com")
            .profile(json!({"name": "Ann"}))
            .to_params()
            .unwrap();

        assert_eq!(
            params,
            vec![json!({
                "username": "ann",
                "email": "ann@example.com",
                "password": "pw",
                "profile": {"name": "Ann"}
            })]
        );
    }

    #[test]
    fn test_new_account_email_only_omits_username() {
        let params = NewAccount::new("pw").email("a@b.c").to_params().unwrap();
        assert!(params[0].get("username").is_none());
        assert_eq!(params[0]["email"], "a@b.c");
    }
}
