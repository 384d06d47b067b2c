//! The protocol engine: connection state, correlation, queueing and login.
//!
//! [`DdpClient`] turns transport events into protocol state changes and
//! observer events, and turns application requests into outbound frames.
//!
//! ```text
//!               connect()                    connected{session}
//! Disconnected ───────────→ AwaitingServerHandshake ──────────────→ SessionReady
//!      ↑                      ↑        │  (resume login first,           │
//!      │                      │        │   if a token is stored)         │
//!      │                      └────────┴──── transport dropped ──────────┘
//!      │                         (retry while attempts ≤ max)
//!      └──── disconnect(), retries exhausted, unsupported version
//! ```
//!
//! # Locking
//!
//! All state lives behind one `std::sync::Mutex`. Each operation mutates
//! state inside the lock and collects what should happen afterwards
//! (observer events, listener calls, credential writes, opening or closing
//! the transport) in an [`Effects`] value. Frames are sent while the lock
//! is held, which is what keeps the outbound order intact;
//! [`Transport::send_text`] must therefore not call back into the engine.
//!
//! Before the lock is released, the collected notifications are appended
//! to a shared outbox. Whichever thread finds the outbox idle drains it
//! with no lock held, so notifications reach the dispatcher in the order
//! the engine produced them even when several threads race. A callback
//! that calls back into the engine sees its own notifications delivered
//! after it returns, not nested inside it.
//!
//! The credential store is never called under the state lock: the token
//! is read before a `connected` frame is handled, and writes travel
//! through the outbox.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meteor_ddp_protocol::{
    ClientMessage, Codec, DdpVersion, JsonCodec, MethodError, ProtocolError,
    ServerMessage,
};
use meteor_ddp_session::{
    CredentialStore, LoginIdentity, LoginRecord, LoginResult, NewAccount,
    resume_params,
};
use meteor_ddp_transport::{Transport, TransportError, TransportEvent};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::fanout::{ClientEvent, DdpObserver, DocumentChange, EventFanout, ObserverId};
use crate::pending::{
    MethodCallback, MethodKind, Pending, PendingRequests, SubscribeCallback,
    UnsubscribeCallback,
};
use crate::DdpError;

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Where the client is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    Disconnected,
    /// The transport is opening, or open and waiting for `connected`.
    AwaitingServerHandshake,
    /// Handshake done (and resume login settled); frames flow directly.
    SessionReady,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct EngineState {
    connection: ConnectionState,
    transport_open: bool,
    version: DdpVersion,
    session_id: Option<String>,
    reconnect_attempts: u32,
    pending: PendingRequests,
    /// Serialized frames waiting for the session to become ready.
    outbound: VecDeque<String>,
    login: LoginRecord,
}

/// Work that must happen outside the state lock, in production order.
enum Notification {
    Event(ClientEvent),
    Method(MethodCallback, Result<Option<Value>, MethodError>),
    Subscribe(SubscribeCallback, Result<(), MethodError>),
    Unsubscribe(UnsubscribeCallback),
    /// Store (`Some`) or delete (`None`) the login token.
    Token(Option<String>),
}

#[derive(Default)]
struct Effects {
    notifications: Vec<Notification>,
    open: bool,
    close: bool,
}

impl Effects {
    fn event(&mut self, event: ClientEvent) {
        self.notifications.push(Notification::Event(event));
    }

    fn exception(&mut self, err: impl Into<DdpError>) {
        self.event(ClientEvent::exception(err));
    }
}

/// Notifications waiting to be handed to the fan-out.
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notification>,
    /// Set while some thread is draining `queue`.
    draining: bool,
}

// ---------------------------------------------------------------------------
// DdpClient
// ---------------------------------------------------------------------------

/// A DDP client bound to one transport.
///
/// The client doesn't register itself with the transport; whoever owns it
/// forwards transport events to [`handle_transport_event`]. The
/// [`DdpSession`](crate::DdpSession) facade does that wiring.
///
/// [`handle_transport_event`]: Self::handle_transport_event
pub struct DdpClient<T, S, C = JsonCodec>
where
    T: Transport,
    S: CredentialStore,
    C: Codec,
{
    transport: T,
    store: S,
    codec: C,
    config: ClientConfig,
    fanout: EventFanout,
    state: Mutex<EngineState>,
    outbox: Mutex<Outbox>,
}

impl<T, S, C> DdpClient<T, S, C>
where
    T: Transport,
    S: CredentialStore,
    C: Codec,
{
    /// Creates a disconnected client. Callbacks run on `dispatcher`.
    pub fn new(
        transport: T,
        store: S,
        codec: C,
        config: ClientConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let state = EngineState {
            connection: ConnectionState::Disconnected,
            transport_open: false,
            version: config.protocol_version,
            session_id: None,
            reconnect_attempts: 0,
            pending: PendingRequests::new(),
            outbound: VecDeque::new(),
            login: LoginRecord::default(),
        };
        Self {
            transport,
            store,
            codec,
            config,
            fanout: EventFanout::new(dispatcher),
            state: Mutex::new(state),
            outbox: Mutex::new(Outbox::default()),
        }
    }

    // -----------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------

    /// Starts connecting. Does nothing unless the client is disconnected.
    pub fn connect(&self) {
        let mut fx = Effects::default();
        let mut state = self.lock();
        if state.connection != ConnectionState::Disconnected {
            tracing::debug!(state = ?state.connection, "connect ignored, already connecting");
            return;
        }
        tracing::info!(version = %state.version, "connecting");
        state.connection = ConnectionState::AwaitingServerHandshake;
        fx.open = true;
        self.finish(state, fx);
    }

    /// Redoes the handshake: on the open transport if there is one,
    /// otherwise by opening it again.
    pub fn reconnect(&self) {
        let mut fx = Effects::default();
        let mut state = self.lock();
        state.connection = ConnectionState::AwaitingServerHandshake;
        if state.transport_open {
            tracing::info!("re-sending handshake");
            self.send_connect(&state, &mut fx);
        } else {
            tracing::info!("reopening transport");
            fx.open = true;
        }
        self.finish(state, fx);
    }

    /// Disconnects for good: forgets the session, drops pending requests
    /// without calling their listeners and closes the transport.
    ///
    /// Frames queued while not ready are kept and go out after the next
    /// successful connect.
    pub fn disconnect(&self) {
        let mut fx = Effects::default();
        let mut state = self.lock();
        Self::teardown(&mut state, &mut fx);
        self.finish(state, fx);
    }

    /// Feeds one transport event into the engine.
    pub fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(),
            TransportEvent::Disconnected => self.on_transport_disconnected(),
            TransportEvent::Text(frame) => self.on_frame(&frame),
            TransportEvent::Error(message) => {
                tracing::debug!(%message, "transport reported an error");
                self.notify(ClientEvent::exception(TransportError::Reported(
                    message,
                )));
            }
        }
    }

    // -----------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------

    /// Calls a remote method. Returns the correlation id.
    ///
    /// The call is sent right away when the session is ready, otherwise it
    /// waits in the outbound queue.
    pub fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        listener: Option<MethodCallback>,
    ) -> String {
        self.submit_method(method, params, None, MethodKind::Plain, listener)
    }

    /// Like [`call`](Self::call), with a `randomSeed` for server-side id
    /// generation.
    pub fn call_with_seed(
        &self,
        method: &str,
        params: Vec<Value>,
        random_seed: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.submit_method(
            method,
            params,
            Some(random_seed.to_string()),
            MethodKind::Plain,
            listener,
        )
    }

    /// Subscribes to a publication. Returns the subscription id, which is
    /// also what [`unsubscribe`](Self::unsubscribe) takes.
    pub fn subscribe(
        &self,
        name: &str,
        params: Vec<Value>,
        listener: Option<SubscribeCallback>,
    ) -> String {
        let mut fx = Effects::default();
        let mut state = self.lock();
        let id = state.pending.next_id();
        if let Some(listener) = listener {
            state.pending.insert(id.clone(), Pending::Subscribe(listener));
        }
        let msg = ClientMessage::Sub {
            name: name.to_string(),
            id: id.clone(),
            params: Some(params),
        };
        tracing::debug!(%id, name, "subscribing");
        self.enqueue(&mut state, &msg, Some(&id), &mut fx);
        self.finish(state, fx);
        id
    }

    /// Stops a subscription. The listener runs once the server confirms
    /// with `nosub`.
    pub fn unsubscribe(
        &self,
        subscription_id: &str,
        listener: Option<UnsubscribeCallback>,
    ) {
        let mut fx = Effects::default();
        let mut state = self.lock();
        if let Some(listener) = listener {
            state.pending.insert(
                subscription_id.to_string(),
                Pending::Unsubscribe(listener),
            );
        }
        let msg = ClientMessage::Unsub {
            id: subscription_id.to_string(),
        };
        tracing::debug!(id = %subscription_id, "unsubscribing");
        self.enqueue(&mut state, &msg, None, &mut fx);
        self.finish(state, fx);
    }

    // -----------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------

    /// Logs in with a username or email and a password. On success the
    /// token is stored before `listener` runs.
    pub fn login_with_password(
        &self,
        identity: &LoginIdentity,
        password: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.submit_method(
            "login",
            identity.password_params(password),
            None,
            MethodKind::Login,
            listener,
        )
    }

    /// Logs in with a resume token.
    pub fn login_with_token(
        &self,
        token: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.submit_method(
            "login",
            resume_params(token),
            None,
            MethodKind::Login,
            listener,
        )
    }

    /// Creates an account and logs in as it.
    ///
    /// # Errors
    /// Returns [`SessionError::MissingIdentity`](meteor_ddp_session::SessionError::MissingIdentity)
    /// if the account has neither a username nor an email; nothing is sent.
    pub fn register_and_login(
        &self,
        account: &NewAccount,
        listener: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        let params = account.to_params()?;
        Ok(self.submit_method(
            "createUser",
            params,
            None,
            MethodKind::Login,
            listener,
        ))
    }

    /// Logs out. On success the stored token and user id are cleared
    /// before `listener` runs.
    pub fn logout(&self, listener: Option<MethodCallback>) -> String {
        self.submit_method("logout", Vec::new(), None, MethodKind::Logout, listener)
    }

    // -----------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------

    pub fn add_observer(&self, observer: Arc<dyn DdpObserver>) -> ObserverId {
        self.fanout.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.fanout.remove(id)
    }

    pub fn remove_observers(&self) {
        self.fanout.clear();
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// `true` once the session is ready.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::SessionReady
    }

    /// The server-assigned session id, reused when reconnecting.
    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// The protocol version currently offered.
    pub fn protocol_version(&self) -> DdpVersion {
        self.lock().version
    }

    /// Consecutive reconnects since the session was last ready.
    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    pub fn user_id(&self) -> Option<String> {
        self.lock().login.user_id.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().login.is_logged_in()
    }

    /// Whether the last handshake logged in with a stored token.
    pub fn signed_in_automatically(&self) -> bool {
        self.lock().login.signed_in_automatically
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of frames waiting for the session to become ready.
    pub fn queued_frames(&self) -> usize {
        self.lock().outbound.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------

    fn on_transport_connected(&self) {
        let mut fx = Effects::default();
        let mut state = self.lock();
        if state.connection == ConnectionState::Disconnected {
            tracing::debug!("transport connected after disconnect, ignoring");
            return;
        }
        state.transport_open = true;
        tracing::debug!(session = ?state.session_id, "transport open, sending handshake");
        self.send_connect(&state, &mut fx);
        self.finish(state, fx);
    }

    fn on_transport_disconnected(&self) {
        let mut fx = Effects::default();
        let mut state = self.lock();
        state.transport_open = false;
        fx.event(ClientEvent::Disconnected);

        let dropped = state.pending.drop_resumes();
        if dropped > 0 {
            tracing::debug!(dropped, "resume login lost with the connection");
        }

        if state.connection != ConnectionState::Disconnected {
            state.reconnect_attempts += 1;
            let attempt = state.reconnect_attempts;
            let max = self.config.max_reconnect_attempts;
            if attempt <= max {
                tracing::info!(attempt, max, "connection lost, reconnecting");
                state.connection = ConnectionState::AwaitingServerHandshake;
                fx.open = true;
            } else {
                tracing::warn!(max, "connection lost, giving up");
                Self::teardown(&mut state, &mut fx);
            }
        }
        self.finish(state, fx);
    }

    fn on_frame(&self, frame: &str) {
        let msg: ServerMessage = match self.codec.decode(frame) {
            Ok(msg) => msg,
            Err(err) => {
                // `{"server_id": "0"}` and friends carry no `msg` at all.
                if let Ok(Value::Object(fields)) = self.codec.decode::<Value>(frame) {
                    if !fields.contains_key("msg") {
                        tracing::debug!(%frame, "ignoring frame without msg");
                        return;
                    }
                }
                tracing::debug!(error = %err, %frame, "undecodable frame");
                self.notify(ClientEvent::exception(err));
                return;
            }
        };

        tracing::debug!(kind = msg.kind(), "frame received");
        // Read outside the lock; the store may do I/O.
        let stored_token = if matches!(msg, ServerMessage::Connected { .. }) {
            self.store.get(&self.config.login_token_key)
        } else {
            None
        };

        let mut fx = Effects::default();
        let mut state = self.lock();
        self.handle_message(&mut state, msg, stored_token, &mut fx);
        self.finish(state, fx);
    }

    // -----------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------

    fn handle_message(
        &self,
        state: &mut EngineState,
        msg: ServerMessage,
        stored_token: Option<String>,
        fx: &mut Effects,
    ) {
        match msg {
            ServerMessage::Connected { session } => {
                self.on_connected(state, session, stored_token, fx);
            }
            ServerMessage::Failed { version } => {
                self.on_failed(state, version, fx);
            }
            ServerMessage::Ping { id } => {
                self.send_message(&ClientMessage::Pong { id }, fx);
            }
            ServerMessage::MethodResult { id, result, error } => {
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(result),
                };
                self.on_method_result(state, &id, outcome, fx);
            }
            ServerMessage::Ready { subs } => {
                for id in subs {
                    match state.pending.take_subscribe(&id) {
                        Some(callback) => fx
                            .notifications
                            .push(Notification::Subscribe(callback, Ok(()))),
                        None => tracing::debug!(%id, "ready for unknown subscription"),
                    }
                }
            }
            ServerMessage::Nosub { id, error } => {
                match state.pending.take_subscription(&id) {
                    Some(Pending::Subscribe(callback)) => {
                        fx.notifications.push(Notification::Subscribe(
                            callback,
                            Err(error.unwrap_or_default()),
                        ));
                    }
                    Some(Pending::Unsubscribe(callback)) => {
                        fx.notifications.push(Notification::Unsubscribe(callback));
                    }
                    _ => tracing::debug!(%id, "nosub for unknown subscription"),
                }
            }
            ServerMessage::Added {
                collection,
                id,
                fields,
            } => fx.event(ClientEvent::DataAdded(DocumentChange {
                collection,
                id,
                fields,
                cleared: None,
                before: None,
            })),
            ServerMessage::AddedBefore {
                collection,
                id,
                fields,
                before,
            } => fx.event(ClientEvent::DataAdded(DocumentChange {
                collection,
                id,
                fields,
                cleared: None,
                before,
            })),
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => fx.event(ClientEvent::DataChanged(DocumentChange {
                collection,
                id,
                fields,
                cleared,
                before: None,
            })),
            ServerMessage::Removed { collection, id } => {
                fx.event(ClientEvent::DataRemoved(DocumentChange {
                    collection,
                    id,
                    fields: None,
                    cleared: None,
                    before: None,
                }));
            }
            ServerMessage::ServerError {
                reason,
                offending_message,
            } => {
                let reason = reason.unwrap_or_else(|| "unknown reason".to_string());
                tracing::warn!(%reason, offending = ?offending_message, "server rejected a frame");
                fx.exception(ProtocolError::Rejected(reason));
            }
            ServerMessage::MovedBefore { collection, id, .. } => {
                tracing::debug!(%collection, %id, "document moved");
            }
            ServerMessage::Updated { methods } => {
                tracing::debug!(?methods, "method writes visible");
            }
            ServerMessage::Pong { .. } | ServerMessage::Unknown => {}
        }
    }

    fn on_connected(
        &self,
        state: &mut EngineState,
        session: String,
        stored_token: Option<String>,
        fx: &mut Effects,
    ) {
        if state.connection != ConnectionState::AwaitingServerHandshake {
            tracing::debug!(state = ?state.connection, "unexpected connected frame");
            return;
        }
        tracing::info!(%session, "session established");
        state.session_id = Some(session);

        let Some(token) = stored_token else {
            // Nothing to resume with: the connection is anonymous.
            if state.login.is_logged_in() {
                tracing::info!("no stored token, dropping previous login");
            }
            Self::forget_login(state, fx);
            self.announce_ready(state, false, fx);
            return;
        };

        tracing::debug!("resuming login with stored token");
        let id = state.pending.next_id();
        state.pending.insert(
            id.clone(),
            Pending::Method {
                kind: MethodKind::Resume,
                callback: None,
            },
        );
        let msg = ClientMessage::Method {
            method: "login".to_string(),
            id: id.clone(),
            params: Some(resume_params(&token)),
            random_seed: None,
        };
        if !self.send_message(&msg, fx) {
            state.pending.remove(&id);
            self.announce_ready(state, false, fx);
        }
    }

    fn on_failed(&self, state: &mut EngineState, version: String, fx: &mut Effects) {
        match DdpVersion::parse(&version) {
            Some(proposed) if proposed != state.version => {
                tracing::info!(from = %state.version, to = %proposed, "server proposed another version");
                state.version = proposed;
                self.send_connect(state, fx);
            }
            _ => {
                tracing::warn!(%version, "no common protocol version");
                fx.exception(ProtocolError::UnsupportedVersion(version));
                Self::teardown(state, fx);
            }
        }
    }

    fn on_method_result(
        &self,
        state: &mut EngineState,
        id: &str,
        outcome: Result<Option<Value>, MethodError>,
        fx: &mut Effects,
    ) {
        let Some((kind, callback)) = state.pending.take_method(id) else {
            tracing::debug!(%id, "result for unknown method call");
            return;
        };

        match kind {
            MethodKind::Plain => {}
            MethodKind::Login => {
                if let Ok(value) = &outcome {
                    match LoginResult::from_value(value.as_ref()) {
                        Ok(login) => Self::remember_login(state, &login, fx),
                        Err(err) => fx.exception(err),
                    }
                }
            }
            MethodKind::Logout => {
                if outcome.is_ok() {
                    Self::forget_login(state, fx);
                }
            }
            MethodKind::Resume => {
                let resumed = match &outcome {
                    Ok(value) => match LoginResult::from_value(value.as_ref()) {
                        Ok(login) => {
                            Self::remember_login(state, &login, fx);
                            true
                        }
                        Err(err) => {
                            fx.exception(err);
                            false
                        }
                    },
                    Err(err) => {
                        tracing::info!(error = %err, "stored token rejected");
                        false
                    }
                };
                if !resumed {
                    Self::forget_login(state, fx);
                }
                self.announce_ready(state, resumed, fx);
            }
        }

        if let Some(callback) = callback {
            fx.notifications.push(Notification::Method(callback, outcome));
        }
    }

    // -----------------------------------------------------------------
    // Helpers (called with the lock held)
    // -----------------------------------------------------------------

    fn submit_method(
        &self,
        method: &str,
        params: Vec<Value>,
        random_seed: Option<String>,
        kind: MethodKind,
        listener: Option<MethodCallback>,
    ) -> String {
        let mut fx = Effects::default();
        let mut state = self.lock();
        let id = state.pending.next_id();
        // Account calls always need their result, listener or not.
        if kind != MethodKind::Plain || listener.is_some() {
            state.pending.insert(
                id.clone(),
                Pending::Method {
                    kind,
                    callback: listener,
                },
            );
        }
        let msg = ClientMessage::Method {
            method: method.to_string(),
            id: id.clone(),
            params: Some(params),
            random_seed,
        };
        tracing::debug!(%id, method, "calling method");
        self.enqueue(&mut state, &msg, Some(&id), &mut fx);
        self.finish(state, fx);
        id
    }

    /// Encodes an application frame and sends it, or queues it until the
    /// session is ready.
    fn enqueue(
        &self,
        state: &mut EngineState,
        msg: &ClientMessage,
        pending_id: Option<&str>,
        fx: &mut Effects,
    ) {
        let frame = match self.codec.encode(msg) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "dropping frame that failed to encode");
                if let Some(id) = pending_id {
                    state.pending.remove(id);
                }
                fx.exception(err);
                return;
            }
        };

        if state.connection == ConnectionState::SessionReady {
            self.send_frame(&frame, fx);
        } else {
            state.outbound.push_back(frame);
            tracing::debug!(queued = state.outbound.len(), "frame queued until ready");
        }
    }

    /// Marks the session ready and flushes the outbound queue in order.
    fn announce_ready(&self, state: &mut EngineState, resumed: bool, fx: &mut Effects) {
        state.connection = ConnectionState::SessionReady;
        state.reconnect_attempts = 0;
        state.login.signed_in_automatically = resumed;
        tracing::info!(resumed, queued = state.outbound.len(), "session ready");

        fx.event(ClientEvent::Connected {
            signed_in_automatically: resumed,
        });
        while let Some(frame) = state.outbound.pop_front() {
            self.send_frame(&frame, fx);
        }
    }

    fn send_connect(&self, state: &EngineState, fx: &mut Effects) {
        let msg = ClientMessage::connect(state.version, state.session_id.clone());
        self.send_message(&msg, fx);
    }

    /// Encodes and sends a control frame, bypassing the queue. Returns
    /// `false` if it couldn't be encoded.
    fn send_message(&self, msg: &ClientMessage, fx: &mut Effects) -> bool {
        match self.codec.encode(msg) {
            Ok(frame) => {
                self.send_frame(&frame, fx);
                true
            }
            Err(err) => {
                fx.exception(err);
                false
            }
        }
    }

    fn send_frame(&self, frame: &str, fx: &mut Effects) {
        if let Err(err) = self.transport.send_text(frame) {
            tracing::debug!(error = %err, "send failed");
            fx.exception(err);
        }
    }

    fn remember_login(state: &mut EngineState, login: &LoginResult, fx: &mut Effects) {
        fx.notifications
            .push(Notification::Token(Some(login.token.clone())));
        state.login.record(login);
    }

    fn forget_login(state: &mut EngineState, fx: &mut Effects) {
        fx.notifications.push(Notification::Token(None));
        state.login.clear();
    }

    fn teardown(state: &mut EngineState, fx: &mut Effects) {
        let dropped = state.pending.clear();
        state.connection = ConnectionState::Disconnected;
        state.transport_open = false;
        state.session_id = None;
        state.reconnect_attempts = 0;
        tracing::info!(dropped, queued = state.outbound.len(), "disconnected");
        fx.close = true;
    }

    // -----------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------

    /// Queues the notifications in `fx` while `state` is still locked,
    /// releases the lock, then opens or closes the transport and drains
    /// the outbox.
    fn finish(&self, state: MutexGuard<'_, EngineState>, fx: Effects) {
        self.outbox().queue.extend(fx.notifications);
        drop(state);

        if fx.close {
            if let Err(err) = self.transport.close() {
                tracing::debug!(error = %err, "transport close failed");
                self.outbox()
                    .queue
                    .push_back(Notification::Event(ClientEvent::exception(err)));
            }
        }

        if fx.open {
            if let Err(err) = self.transport.open() {
                tracing::warn!(error = %err, "transport open failed");
                let mut state = self.lock();
                if state.connection == ConnectionState::AwaitingServerHandshake
                    && !state.transport_open
                {
                    state.connection = ConnectionState::Disconnected;
                }
                self.outbox()
                    .queue
                    .push_back(Notification::Event(ClientEvent::exception(err)));
            }
        }

        self.drain();
    }

    /// Emits an event that doesn't touch engine state.
    fn notify(&self, event: ClientEvent) {
        self.outbox().queue.push_back(Notification::Event(event));
        self.drain();
    }

    /// Hands queued notifications to the fan-out in order. Returns at once
    /// if another thread (or an outer frame of this one) is already
    /// draining; that drainer picks up whatever was queued.
    fn drain(&self) {
        loop {
            let batch = {
                let mut outbox = self.outbox();
                if outbox.draining || outbox.queue.is_empty() {
                    return;
                }
                outbox.draining = true;
                std::mem::take(&mut outbox.queue)
            };
            for notification in batch {
                self.deliver(notification);
            }
            self.outbox().draining = false;
        }
    }

    fn deliver(&self, notification: Notification) {
        match notification {
            Notification::Event(event) => self.fanout.emit(event),
            Notification::Method(callback, outcome) => {
                self.fanout.run_callback(move || callback(outcome));
            }
            Notification::Subscribe(callback, outcome) => {
                self.fanout.run_callback(move || callback(outcome));
            }
            Notification::Unsubscribe(callback) => {
                self.fanout.run_callback(callback);
            }
            Notification::Token(token) => {
                self.store.put(&self.config.login_token_key, token.as_deref());
            }
        }
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
