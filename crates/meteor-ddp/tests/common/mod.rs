//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use meteor_ddp::{
    ClientConfig, DdpClient, DdpError, DdpObserver, DocumentChange,
    InlineDispatcher, JsonCodec, MemoryCredentialStore, Transport,
    TransportError, TransportEvent, TransportHandler,
};
use serde_json::Value;

type OpenHook = Box<dyn Fn() + Send>;

/// A transport that records what the engine asks of it.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_sends: AtomicBool,
    fail_opens: AtomicBool,
    fail_closes: AtomicBool,
    on_open: Mutex<Option<OpenHook>>,
    handler: Mutex<Option<Arc<dyn TransportHandler>>>,
}

impl MockTransport {
    /// Every frame sent so far, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("frames are JSON"))
            .collect()
    }

    /// Sent frames with the given `msg`.
    pub fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["msg"] == kind)
            .collect()
    }

    pub fn last_sent(&self) -> Value {
        self.sent().pop().expect("something was sent")
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Runs `hook` inside every `open()`, before it returns.
    pub fn on_open(&self, hook: impl Fn() + Send + 'static) {
        *self.on_open.lock().unwrap() = Some(Box::new(hook));
    }

    /// Delivers an event through the bound handler, as a real transport
    /// would.
    pub fn emit(&self, event: TransportEvent) {
        let handler = self.handler.lock().unwrap().clone();
        handler.expect("handler bound").on_event(event);
    }
}

impl Transport for MockTransport {
    fn bind_handler(&self, handler: Arc<dyn TransportHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn open(&self) -> Result<(), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_open.lock().unwrap().as_ref() {
            hook();
        }
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            )));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("already gone".into()));
        }
        Ok(())
    }

    fn send_text(&self, frame: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().unwrap().push(frame.to_string());
        Ok(())
    }
}

/// Observer that records events as short strings.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl DdpObserver for Recorder {
    fn on_connect(&self, signed_in_automatically: bool) {
        self.push(format!("connect:{signed_in_automatically}"));
    }

    fn on_disconnect(&self) {
        self.push("disconnect".into());
    }

    fn on_exception(&self, error: &DdpError) {
        self.push(format!("exception:{error}"));
    }

    fn on_data_added(&self, change: &DocumentChange) {
        self.push(format!("added:{}/{}", change.collection, change.id));
    }

    fn on_data_changed(&self, change: &DocumentChange) {
        self.push(format!("changed:{}/{}", change.collection, change.id));
    }

    fn on_data_removed(&self, change: &DocumentChange) {
        self.push(format!("removed:{}/{}", change.collection, change.id));
    }
}

pub type TestClient = DdpClient<MockTransport, MemoryCredentialStore>;

/// A client on a mock transport with an inline dispatcher and a recorder.
pub fn client_with(config: ClientConfig) -> (Arc<TestClient>, Arc<Recorder>) {
    let client = Arc::new(DdpClient::new(
        MockTransport::default(),
        MemoryCredentialStore::new(),
        JsonCodec,
        config,
        Arc::new(InlineDispatcher),
    ));
    let recorder = Arc::new(Recorder::default());
    client.add_observer(recorder.clone());
    (client, recorder)
}

pub fn client() -> (Arc<TestClient>, Arc<Recorder>) {
    client_with(ClientConfig::default())
}

/// Feeds a server frame to the client.
pub fn server_says(client: &TestClient, frame: Value) {
    client.handle_transport_event(TransportEvent::Text(frame.to_string()));
}

/// Connects and completes a handshake with no stored token.
pub fn ready(client: &TestClient, session: &str) {
    client.connect();
    client.handle_transport_event(TransportEvent::Connected);
    server_says(
        client,
        serde_json::json!({"msg": "connected", "session": session}),
    );
}
