//! WebSocket client transport using `tokio-tungstenite`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::{
    ConnectionId, Transport, TransportError, TransportEvent, TransportHandler,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server endpoint, e.g. `ws://localhost:3000/websocket`.
    pub url: String,

    /// How long the TCP + WebSocket handshake may take before the attempt
    /// is reported as failed.
    pub connect_timeout: Duration,
}

impl WebSocketConfig {
    /// Creates a config for `url` with the default timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/websocket".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Commands for a connection's I/O task.
enum Outgoing {
    Text(String),
    Close,
}

/// The connection currently owned by the transport.
struct Link {
    id: ConnectionId,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

/// A [`Transport`] that speaks WebSocket to a single server URL.
///
/// Every `open()` spawns a fresh I/O task on the runtime captured at
/// construction. Only the newest connection may report events; a
/// superseded connection is closed and stays silent.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    runtime: Handle,
    handler: Mutex<Option<Arc<dyn TransportHandler>>>,
    link: Mutex<Option<Link>>,
    current: Arc<AtomicU64>,
}

impl WebSocketTransport {
    /// Creates a transport bound to the current tokio runtime.
    ///
    /// # Errors
    /// Returns [`TransportError::NoRuntime`] when called outside a runtime.
    pub fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let runtime =
            Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Creates a transport that spawns its I/O tasks on `runtime`.
    pub fn with_runtime(config: WebSocketConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            handler: Mutex::new(None),
            link: Mutex::new(None),
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Transport for WebSocketTransport {
    fn bind_handler(&self, handler: Arc<dyn TransportHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    fn open(&self) -> Result<(), TransportError> {
        let handler =
            lock(&self.handler).clone().ok_or(TransportError::NoHandler)?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        self.current.store(id.into_inner(), Ordering::SeqCst);
        let previous = lock(&self.link).replace(Link { id, outgoing: tx });
        if let Some(old) = previous {
            tracing::debug!(old = %old.id, new = %id, "superseding connection");
            let _ = old.outgoing.send(Outgoing::Close);
        }

        let events = EventSink {
            id,
            current: Arc::clone(&self.current),
            handler,
        };
        self.runtime
            .spawn(run_connection(self.config.clone(), rx, events));
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        match lock(&self.link).take() {
            Some(link) => {
                if link.outgoing.send(Outgoing::Close).is_err() {
                    tracing::debug!(id = %link.id, "connection already finished");
                }
            }
            None => tracing::debug!("close requested with no connection"),
        }
        Ok(())
    }

    fn send_text(&self, frame: &str) -> Result<(), TransportError> {
        let guard = lock(&self.link);
        let link = guard.as_ref().ok_or(TransportError::NotOpen)?;
        link.outgoing
            .send(Outgoing::Text(frame.to_owned()))
            .map_err(|_| {
                TransportError::ConnectionClosed(format!(
                    "{} is no longer running",
                    link.id
                ))
            })
    }
}

/// Forwards events to the handler while its connection is the current one.
struct EventSink {
    id: ConnectionId,
    current: Arc<AtomicU64>,
    handler: Arc<dyn TransportHandler>,
}

impl EventSink {
    fn emit(&self, event: TransportEvent) {
        if self.current.load(Ordering::SeqCst) == self.id.into_inner() {
            self.handler.on_event(event);
        } else {
            tracing::trace!(id = %self.id, ?event, "dropping stale event");
        }
    }
}

/// Drives one connection: connect, then pump frames both ways until either
/// side closes.
async fn run_connection(
    config: WebSocketConfig,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    events: EventSink,
) {
    let id = events.id;
    let attempt = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(config.url.as_str()),
    )
    .await;

    let ws = match attempt {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            let err = TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ));
            tracing::debug!(%id, error = %err, "WebSocket connect failed");
            events.emit(TransportEvent::Error(err.to_string()));
            events.emit(TransportEvent::Disconnected);
            return;
        }
        Err(_) => {
            let err = TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ));
            tracing::debug!(%id, error = %err, "WebSocket connect timed out");
            events.emit(TransportEvent::Error(err.to_string()));
            events.emit(TransportEvent::Disconnected);
            return;
        }
    };

    tracing::debug!(%id, url = %config.url, "WebSocket connected");
    events.emit(TransportEvent::Connected);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let err = TransportError::SendFailed(
                            std::io::Error::new(
                                std::io::ErrorKind::BrokenPipe,
                                e,
                            ),
                        );
                        events.emit(TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => events.emit(TransportEvent::Text(text)),
                        Err(_) => {
                            tracing::debug!(%id, "dropping non UTF-8 binary frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/raw frame
                Some(Err(e)) => {
                    let err = TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    );
                    events.emit(TransportEvent::Error(err.to_string()));
                    break;
                }
            },
        }
    }

    tracing::debug!(%id, "WebSocket closed");
    events.emit(TransportEvent::Disconnected);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
