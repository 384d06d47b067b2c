//! Login state and credential storage for the meteor-ddp client.
//!
//! This crate holds what the client knows about *who* it is:
//!
//! 1. **Credentials**: where the resume token lives between runs
//!    ([`CredentialStore`] trait, [`MemoryCredentialStore`])
//! 2. **Login state**: the current user and token ([`LoginRecord`])
//! 3. **Login requests**: parameters for `login` / `createUser` and the
//!    shape of their results ([`LoginIdentity`], [`NewAccount`],
//!    [`LoginResult`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Engine (above)  ← decides when to resume, records logins
//!     ↕
//! Session Layer (this crate)  ← login state and credential storage
//! ```

mod credentials;
mod error;
mod login;

pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::SessionError;
pub use login::{
    LoginIdentity, LoginRecord, LoginResult, NewAccount, resume_params,
};
