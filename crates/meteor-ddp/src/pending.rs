//! The pending request table: listeners waiting for a server response.
//!
//! Every method call and subscription is tagged with a correlation id.
//! The table maps each outstanding id to whatever is waiting for its
//! answer, and hands the entry back exactly once when the terminal
//! response (`result`, `ready`, `nosub`) arrives.

use std::collections::HashMap;

use meteor_ddp_protocol::MethodError;
use rand::Rng;
use serde_json::Value;

/// Receives the outcome of a method call.
pub type MethodCallback =
    Box<dyn FnOnce(Result<Option<Value>, MethodError>) + Send + 'static>;

/// Receives the outcome of a subscription: `Ok` once it is ready, `Err`
/// if the server refused it.
pub type SubscribeCallback =
    Box<dyn FnOnce(Result<(), MethodError>) + Send + 'static>;

/// Called once the server confirms a subscription has stopped.
pub type UnsubscribeCallback = Box<dyn FnOnce() + Send + 'static>;

/// What kind of method call an entry belongs to. Anything but `Plain`
/// changes the login state when it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodKind {
    Plain,
    /// `login` or `createUser` issued by the application.
    Login,
    Logout,
    /// The automatic token login of a handshake.
    Resume,
}

pub(crate) enum Pending {
    Method {
        kind: MethodKind,
        callback: Option<MethodCallback>,
    },
    Subscribe(SubscribeCallback),
    Unsubscribe(UnsubscribeCallback),
}

impl Pending {
    fn label(&self) -> &'static str {
        match self {
            Self::Method { .. } => "method",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<String, Pending>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Draws a correlation id that is not pending right now.
    pub(crate) fn next_id(&self) -> String {
        loop {
            let id = generate_id();
            if !self.contains(&id) {
                return id;
            }
        }
    }

    /// Registers `entry` under `id`.
    ///
    /// An id is only ever reused to let an unsubscribe listener take over
    /// from the subscribe listener of the same subscription.
    pub(crate) fn insert(&mut self, id: String, entry: Pending) {
        if let Some(previous) = self.entries.insert(id.clone(), entry) {
            tracing::debug!(%id, replaced = previous.label(), "pending entry replaced");
        }
    }

    /// Removes and returns the method entry for `id`. Other kinds of entry
    /// stay in place.
    pub(crate) fn take_method(
        &mut self,
        id: &str,
    ) -> Option<(MethodKind, Option<MethodCallback>)> {
        if !matches!(self.entries.get(id), Some(Pending::Method { .. })) {
            return None;
        }
        match self.entries.remove(id) {
            Some(Pending::Method { kind, callback }) => Some((kind, callback)),
            _ => None,
        }
    }

    /// Removes and returns the subscribe listener for `id`. An unsubscribe
    /// entry under the same id stays in place.
    pub(crate) fn take_subscribe(
        &mut self,
        id: &str,
    ) -> Option<SubscribeCallback> {
        if !matches!(self.entries.get(id), Some(Pending::Subscribe(_))) {
            return None;
        }
        match self.entries.remove(id) {
            Some(Pending::Subscribe(callback)) => Some(callback),
            _ => None,
        }
    }

    /// Removes and returns the subscribe or unsubscribe entry for `id`.
    pub(crate) fn take_subscription(&mut self, id: &str) -> Option<Pending> {
        if !matches!(
            self.entries.get(id),
            Some(Pending::Subscribe(_) | Pending::Unsubscribe(_))
        ) {
            return None;
        }
        self.entries.remove(id)
    }

    /// Removes the entry for `id`, whatever it is.
    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drops in-flight resume logins. They belong to the connection that
    /// just went away.
    pub(crate) fn drop_resumes(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !matches!(
                entry,
                Pending::Method {
                    kind: MethodKind::Resume,
                    ..
                }
            )
        });
        before - self.entries.len()
    }

    /// Drops every entry without calling any listener.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

/// Generates a random 128-bit correlation id as 32 hex characters.
fn generate_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::*;

    fn method(kind: MethodKind) -> Pending {
        Pending::Method {
            kind,
            callback: None,
        }
    }

    #[test]
    fn test_next_id_is_32_hex_chars() {
        let id = PendingRequests::new().next_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_next_id_many_draws_are_unique() {
        let table = PendingRequests::new();
        let ids: HashSet<String> = (0..1000).map(|_| table.next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_take_method_returns_entry_once() {
        let mut table = PendingRequests::new();
        table.insert("m1".into(), method(MethodKind::Login));

        let (kind, callback) = table.take_method("m1").unwrap();
        assert_eq!(kind, MethodKind::Login);
        assert!(callback.is_none());
        assert!(table.take_method("m1").is_none());
    }

    #[test]
    fn test_take_method_ignores_subscription_entry() {
        let mut table = PendingRequests::new();
        table.insert("s1".into(), Pending::Subscribe(Box::new(|_| {})));

        assert!(table.take_method("s1").is_none());
        assert!(table.contains("s1"));
    }

    #[test]
    fn test_take_subscription_ignores_method_entry() {
        let mut table = PendingRequests::new();
        table.insert("m1".into(), method(MethodKind::Plain));

        assert!(table.take_subscription("m1").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_take_subscribe_leaves_unsubscribe_entry() {
        let mut table = PendingRequests::new();
        table.insert("s1".into(), Pending::Unsubscribe(Box::new(|| {})));

        assert!(table.take_subscribe("s1").is_none());
        assert!(table.contains("s1"));
    }

    #[test]
    fn test_insert_unsubscribe_replaces_subscribe() {
        let mut table = PendingRequests::new();
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        table.insert("s1".into(), Pending::Subscribe(Box::new(|_| {})));
        table.insert(
            "s1".into(),
            Pending::Unsubscribe(Box::new(move || *flag.lock().unwrap() = true)),
        );

        assert_eq!(table.len(), 1);
        match table.take_subscription("s1") {
            Some(Pending::Unsubscribe(callback)) => callback(),
            _ => panic!("expected unsubscribe entry"),
        }
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn test_drop_resumes_keeps_other_entries() {
        let mut table = PendingRequests::new();
        table.insert("r1".into(), method(MethodKind::Resume));
        table.insert("m1".into(), method(MethodKind::Plain));
        table.insert("s1".into(), Pending::Subscribe(Box::new(|_| {})));

        assert_eq!(table.drop_resumes(), 1);
        assert!(!table.contains("r1"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_clear_drops_without_calling_listeners() {
        let mut table = PendingRequests::new();
        table.insert(
            "s1".into(),
            Pending::Subscribe(Box::new(|_| panic!("must not be called"))),
        );

        assert_eq!(table.clear(), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_remove_unknown_id_returns_false() {
        let mut table = PendingRequests::new();
        assert!(!table.remove("nope"));
    }
}
