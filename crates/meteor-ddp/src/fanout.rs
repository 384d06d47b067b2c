//! Event fan-out: delivering client events to registered observers.
//!
//! The engine produces [`ClientEvent`]s; the [`EventFanout`] hands each one
//! to every registered [`DdpObserver`], through the configured
//! [`Dispatcher`]. Request listeners (method results, subscription
//! readiness) go through the same dispatcher so they are ordered with the
//! events around them.
//!
//! Observer code is application code, so it is never trusted not to panic.
//! A panic is caught, logged and reported back to the observers as
//! [`DdpError::CallbackPanicked`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::DdpError;
use crate::dispatch::Dispatcher;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A document-level change pushed by the server for a subscribed
/// collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub collection: String,
    pub id: String,
    /// New or changed fields, as sent by the server.
    pub fields: Option<Value>,
    /// Names of fields that were removed (`changed` only).
    pub cleared: Option<Vec<String>>,
    /// Id of the document this one was inserted before (`addedBefore`
    /// only; `None` means the end of the collection).
    pub before: Option<String>,
}

/// Something observers are told about.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The session is ready. `signed_in_automatically` is `true` when a
    /// stored token logged the user back in.
    Connected { signed_in_automatically: bool },
    /// The transport dropped. The client may be reconnecting on its own.
    Disconnected,
    /// Something went wrong that no single request owns.
    Exception(Arc<DdpError>),
    DataAdded(DocumentChange),
    DataChanged(DocumentChange),
    DataRemoved(DocumentChange),
}

impl ClientEvent {
    pub(crate) fn exception(err: impl Into<DdpError>) -> Self {
        Self::Exception(Arc::new(err.into()))
    }
}

/// Receives client events.
///
/// Every method has an empty default, so implement only the ones you need.
///
/// ```rust
/// use meteor_ddp::{DdpObserver, DocumentChange};
///
/// struct TaskLog;
///
/// impl DdpObserver for TaskLog {
///     fn on_data_added(&self, change: &DocumentChange) {
///         println!("{} added to {}", change.id, change.collection);
///     }
/// }
/// ```
pub trait DdpObserver: Send + Sync + 'static {
    fn on_connect(&self, _signed_in_automatically: bool) {}
    fn on_disconnect(&self) {}
    fn on_exception(&self, _error: &DdpError) {}
    fn on_data_added(&self, _change: &DocumentChange) {}
    fn on_data_changed(&self, _change: &DocumentChange) {}
    fn on_data_removed(&self, _change: &DocumentChange) {}
}

/// Handle returned when registering an observer, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EventFanout
// ---------------------------------------------------------------------------

type ObserverList = Vec<(ObserverId, Arc<dyn DdpObserver>)>;

/// The observer set plus the dispatcher that delivers to it.
///
/// Cheap to clone; clones share the same observers.
#[derive(Clone)]
pub struct EventFanout {
    observers: Arc<Mutex<ObserverList>>,
    next_id: Arc<AtomicU64>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl EventFanout {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            dispatcher,
        }
    }

    /// Registers an observer. It receives every event emitted from now on.
    pub fn add(&self, observer: Arc<dyn DdpObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, observer));
        tracing::debug!(%id, "observer added");
        id
    }

    /// Removes an observer. Returns `false` if it wasn't registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        before != observers.len()
    }

    /// Removes every observer.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Delivers `event` to the observers registered right now.
    ///
    /// Observers removed before the job runs are skipped.
    pub fn emit(&self, event: ClientEvent) {
        let targets: Vec<ObserverId> =
            self.lock().iter().map(|(id, _)| *id).collect();
        if targets.is_empty() {
            tracing::debug!(?event, "event dropped, no observers");
            return;
        }

        let fanout = self.clone();
        self.dispatcher.dispatch(Box::new(move || {
            let live: Vec<Arc<dyn DdpObserver>> = fanout
                .lock()
                .iter()
                .filter(|(id, _)| targets.contains(id))
                .map(|(_, observer)| Arc::clone(observer))
                .collect();

            for observer in live {
                fanout.deliver(observer.as_ref(), &event);
            }
        }));
    }

    /// Runs a request listener on the dispatcher, with the same panic
    /// handling as observers.
    pub fn run_callback(&self, callback: impl FnOnce() + Send + 'static) {
        let fanout = self.clone();
        self.dispatcher.dispatch(Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback))
            {
                let message = panic_message(payload.as_ref());
                tracing::error!(%message, "request listener panicked");
                fanout.emit(ClientEvent::exception(DdpError::CallbackPanicked(
                    message,
                )));
            }
        }));
    }

    fn deliver(&self, observer: &dyn DdpObserver, event: &ClientEvent) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
            ClientEvent::Connected {
                signed_in_automatically,
            } => observer.on_connect(*signed_in_automatically),
            ClientEvent::Disconnected => observer.on_disconnect(),
            ClientEvent::Exception(error) => observer.on_exception(error),
            ClientEvent::DataAdded(change) => observer.on_data_added(change),
            ClientEvent::DataChanged(change) => observer.on_data_changed(change),
            ClientEvent::DataRemoved(change) => observer.on_data_removed(change),
        }));

        if let Err(payload) = outcome {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "observer panicked");
            // Re-reporting a panic from on_exception could loop forever.
            if !matches!(event, ClientEvent::Exception(_)) {
                self.emit(ClientEvent::exception(DdpError::CallbackPanicked(
                    message,
                )));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ObserverList> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for EventFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFanout")
            .field("observers", &self.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{InlineDispatcher, Job};

    /// Records the events it sees as short strings.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl DdpObserver for Recorder {
        fn on_connect(&self, auto: bool) {
            self.seen.lock().unwrap().push(format!("connect:{auto}"));
        }
        fn on_disconnect(&self) {
            self.seen.lock().unwrap().push("disconnect".into());
        }
        fn on_exception(&self, error: &DdpError) {
            self.seen.lock().unwrap().push(format!("exception:{error}"));
        }
        fn on_data_added(&self, change: &DocumentChange) {
            self.seen.lock().unwrap().push(format!("added:{}", change.id));
        }
    }

    struct Panicker;

    impl DdpObserver for Panicker {
        fn on_disconnect(&self) {
            panic!("observer blew up");
        }
        fn on_exception(&self, _error: &DdpError) {
            panic!("and again");
        }
    }

    /// Collects jobs instead of running them, so tests can control timing.
    #[derive(Default)]
    struct Deferred {
        jobs: Mutex<Vec<Job>>,
    }

    impl Deferred {
        fn run_all(&self) {
            let jobs: Vec<Job> = self.jobs.lock().unwrap().drain(..).collect();
            for job in jobs {
                job();
            }
        }
    }

    impl Dispatcher for Deferred {
        fn dispatch(&self, job: Job) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    fn inline_fanout() -> EventFanout {
        EventFanout::new(Arc::new(InlineDispatcher))
    }

    fn change(id: &str) -> DocumentChange {
        DocumentChange {
            collection: "tasks".into(),
            id: id.into(),
            fields: None,
            cleared: None,
            before: None,
        }
    }

    #[test]
    fn test_emit_delivers_to_every_observer_once() {
        let fanout = inline_fanout();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        fanout.add(a.clone());
        fanout.add(b.clone());

        fanout.emit(ClientEvent::Connected {
            signed_in_automatically: true,
        });
        fanout.emit(ClientEvent::DataAdded(change("d1")));

        assert_eq!(a.seen(), ["connect:true", "added:d1"]);
        assert_eq!(b.seen(), ["connect:true", "added:d1"]);
    }

    #[test]
    fn test_emit_with_no_observers_is_noop() {
        let fanout = inline_fanout();
        fanout.emit(ClientEvent::Disconnected);
        assert!(fanout.is_empty());
    }

    #[test]
    fn test_remove_stops_delivery() {
        let fanout = inline_fanout();
        let recorder = Arc::new(Recorder::default());
        let id = fanout.add(recorder.clone());

        assert!(fanout.remove(id));
        fanout.emit(ClientEvent::Disconnected);

        assert!(recorder.seen().is_empty());
        assert!(!fanout.remove(id));
    }

    #[test]
    fn test_clear_on_empty_set_is_fine() {
        let fanout = inline_fanout();
        fanout.clear();
        assert_eq!(fanout.len(), 0);
    }

    #[test]
    fn test_observer_added_after_emit_does_not_see_event() {
        let dispatcher = Arc::new(Deferred::default());
        let fanout = EventFanout::new(dispatcher.clone());
        let early = Arc::new(Recorder::default());
        fanout.add(early.clone());

        fanout.emit(ClientEvent::Disconnected);
        let late = Arc::new(Recorder::default());
        fanout.add(late.clone());
        dispatcher.run_all();

        assert_eq!(early.seen(), ["disconnect"]);
        assert!(late.seen().is_empty());
    }

    #[test]
    fn test_observer_removed_before_delivery_is_skipped() {
        let dispatcher = Arc::new(Deferred::default());
        let fanout = EventFanout::new(dispatcher.clone());
        let recorder = Arc::new(Recorder::default());
        let id = fanout.add(recorder.clone());

        fanout.emit(ClientEvent::Disconnected);
        fanout.remove(id);
        dispatcher.run_all();

        assert!(recorder.seen().is_empty());
    }

    #[test]
    fn test_observer_panic_is_reported_as_exception() {
        let fanout = inline_fanout();
        fanout.add(Arc::new(Panicker));
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone());

        fanout.emit(ClientEvent::Disconnected);

        let seen = recorder.seen();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&"disconnect".to_string()));
        assert!(
            seen.contains(&"exception:callback panicked: observer blew up".to_string())
        );
    }

    #[test]
    fn test_listener_panic_is_reported_as_exception() {
        let fanout = inline_fanout();
        let recorder = Arc::new(Recorder::default());
        fanout.add(recorder.clone());

        fanout.run_callback(|| panic!("listener blew up"));

        assert_eq!(
            recorder.seen(),
            ["exception:callback panicked: listener blew up"]
        );
    }

    #[test]
    fn test_run_callback_runs_through_dispatcher() {
        let dispatcher = Arc::new(Deferred::default());
        let fanout = EventFanout::new(dispatcher.clone());
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);

        fanout.run_callback(move || *flag.lock().unwrap() = true);
        assert!(!*ran.lock().unwrap());

        dispatcher.run_all();
        assert!(*ran.lock().unwrap());
    }
}
