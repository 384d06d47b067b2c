//! Credential storage hook for the resume token.
//!
//! The client doesn't decide where a login token lives between runs: a
//! file, the OS keychain, a browser's local storage. Instead it defines
//! the [`CredentialStore`] trait, a tiny key/value interface the engine
//! reads the token from on every handshake and writes it to after every
//! login or logout. [`MemoryCredentialStore`] is the in-process version,
//! good for tests and for hosts that don't need the token to outlive the
//! process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A key/value store for credentials.
///
/// # Trait bounds
///
/// - `Send + Sync`: the engine reads the store from whichever thread
///   delivered the transport event, and writes it from the application's.
/// - `'static`: the store lives as long as the engine that owns it.
///
/// Single-key `get`/`put` must be safe to call concurrently; nothing more
/// is required (the engine never needs a multi-key transaction).
///
/// # Blocking
///
/// The engine never holds its own lock while calling the store, so a
/// store may call back into the client. Calls still run on whichever
/// thread drives the engine at the time, which can be the transport's
/// I/O task; a store that blocks for long stalls inbound traffic.
///
/// # Example
///
/// ```rust
/// use meteor_ddp_session::{CredentialStore, MemoryCredentialStore};
///
/// let store = MemoryCredentialStore::new();
/// store.put("login_token", Some("abc"));
/// assert_eq!(store.get("login_token").as_deref(), Some("abc"));
///
/// store.put("login_token", None);
/// assert_eq!(store.get("login_token"), None);
/// ```
pub trait CredentialStore: Send + Sync + 'static {
    /// Stores `value` under `key`. `None` deletes the key.
    fn put(&self, key: &str, value: Option<&str>);

    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;
}

/// Sharing a store between the engine and the application is common
/// enough that `Arc<S>` is a store too.
impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn put(&self, key: &str, value: Option<&str>) {
        (**self).put(key, value);
    }

    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

/// A [`CredentialStore`] backed by a `HashMap` behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A panic while holding this lock can't leave the map half-written.
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn put(&self, key: &str, value: Option<&str>) {
        let mut values = self.lock();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        tracing::debug!(key, present = value.is_some(), "credential stored");
    }

    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }
}
