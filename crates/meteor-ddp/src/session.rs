//! `DdpSession` facade and builder.
//!
//! This is the entry point for applications. It owns a [`DdpClient`],
//! hooks it up to its transport and adds the conveniences the engine
//! doesn't need to know about: collection helpers and async wrappers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use meteor_ddp_protocol::{Codec, JsonCodec, MethodError};
use meteor_ddp_session::{
    CredentialStore, LoginIdentity, MemoryCredentialStore, NewAccount,
};
use meteor_ddp_transport::{
    Transport, TransportError, TransportEvent, TransportHandler,
    WebSocketConfig, WebSocketTransport,
};
use serde_json::{Map, Value, json};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::dispatch::{Dispatcher, TokioDispatcher};
use crate::engine::{ConnectionState, DdpClient};
use crate::fanout::{DdpObserver, ObserverId};
use crate::pending::{MethodCallback, SubscribeCallback, UnsubscribeCallback};
use crate::{ClientConfig, DdpError};

/// Forwards transport events to the engine without keeping it alive.
struct EngineLink<T: Transport, S: CredentialStore, C: Codec> {
    client: Weak<DdpClient<T, S, C>>,
}

impl<T, S, C> TransportHandler for EngineLink<T, S, C>
where
    T: Transport,
    S: CredentialStore,
    C: Codec,
{
    fn on_event(&self, event: TransportEvent) {
        match self.client.upgrade() {
            Some(client) => client.handle_transport_event(event),
            None => tracing::trace!(?event, "client dropped, ignoring event"),
        }
    }
}

// ---------------------------------------------------------------------------
// DdpSession
// ---------------------------------------------------------------------------

/// A handle to a DDP session.
///
/// Cheap to clone; clones drive the same client. Dropping the last clone
/// drops the client, after which the transport's events go nowhere.
///
/// # Example
///
/// ```rust,no_run
/// use meteor_ddp::prelude::*;
/// use serde_json::json;
///
/// # async fn run() -> Result<(), DdpError> {
/// let session = DdpSession::builder()
///     .url("ws://localhost:3000/websocket")
///     .build(MemoryCredentialStore::new())?;
/// session.connect();
///
/// let sum = session.call_async("add", vec![json!(1), json!(2)]).await?;
/// println!("1 + 2 = {sum:?}");
/// # Ok(())
/// # }
/// ```
pub struct DdpSession<T, S, C = JsonCodec>
where
    T: Transport,
    S: CredentialStore,
    C: Codec,
{
    client: Arc<DdpClient<T, S, C>>,
}

impl<T, S, C> Clone for DdpSession<T, S, C>
where
    T: Transport,
    S: CredentialStore,
    C: Codec,
{
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl DdpSession<WebSocketTransport, MemoryCredentialStore> {
    /// Creates a builder for a WebSocket session. The credential store is
    /// chosen when building, so this works for any store type.
    pub fn builder() -> DdpSessionBuilder {
        DdpSessionBuilder::new()
    }
}

impl<T, S, C> DdpSession<T, S, C>
where
    T: Transport,
    S: CredentialStore,
    C: Codec,
{
    /// Wraps an engine built by hand and binds its transport to it.
    pub fn new(client: DdpClient<T, S, C>) -> Self {
        let client = Arc::new(client);
        let link = EngineLink {
            client: Arc::downgrade(&client),
        };
        client.transport().bind_handler(Arc::new(link));
        Self { client }
    }

    /// The engine behind this session.
    pub fn client(&self) -> &DdpClient<T, S, C> {
        &self.client
    }

    pub fn connect(&self) {
        self.client.connect();
    }

    pub fn disconnect(&self) {
        self.client.disconnect();
    }

    pub fn reconnect(&self) {
        self.client.reconnect();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn user_id(&self) -> Option<String> {
        self.client.user_id()
    }

    pub fn is_logged_in(&self) -> bool {
        self.client.is_logged_in()
    }

    // -----------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------

    pub fn add_observer(&self, observer: Arc<dyn DdpObserver>) -> ObserverId {
        self.client.add_observer(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.client.remove_observer(id)
    }

    pub fn remove_observers(&self) {
        self.client.remove_observers();
    }

    // -----------------------------------------------------------------
    // Methods and subscriptions
    // -----------------------------------------------------------------

    pub fn call(
        &self,
        method: &str,
        params: Vec<Value>,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client.call(method, params, listener)
    }

    pub fn call_with_seed(
        &self,
        method: &str,
        params: Vec<Value>,
        random_seed: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client
            .call_with_seed(method, params, random_seed, listener)
    }

    pub fn subscribe(
        &self,
        name: &str,
        params: Vec<Value>,
        listener: Option<SubscribeCallback>,
    ) -> String {
        self.client.subscribe(name, params, listener)
    }

    pub fn unsubscribe(
        &self,
        subscription_id: &str,
        listener: Option<UnsubscribeCallback>,
    ) {
        self.client.unsubscribe(subscription_id, listener);
    }

    /// Calls a method and waits for its result.
    ///
    /// # Errors
    /// - [`DdpError::Method`] if the server answered with an error
    /// - [`DdpError::RequestAbandoned`] if the client disconnected first
    pub async fn call_async(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<Value>, DdpError> {
        let (tx, rx) = oneshot::channel();
        self.client.call(method, params, Some(reply_to(tx)));
        rx.await.map_err(|_| DdpError::RequestAbandoned)?.map_err(DdpError::Method)
    }

    /// Subscribes and waits until the subscription is ready. Returns the
    /// subscription id.
    ///
    /// # Errors
    /// - [`DdpError::Method`] if the server refused the subscription
    /// - [`DdpError::RequestAbandoned`] if the client disconnected first
    pub async fn subscribe_async(
        &self,
        name: &str,
        params: Vec<Value>,
    ) -> Result<String, DdpError> {
        let (tx, rx) = oneshot::channel();
        let id = self.client.subscribe(name, params, Some(reply_to(tx)));
        rx.await.map_err(|_| DdpError::RequestAbandoned)?.map_err(DdpError::Method)?;
        Ok(id)
    }

    // -----------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------

    /// Inserts a document through the collection's `insert` method.
    pub fn insert(
        &self,
        collection: &str,
        document: Value,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client
            .call(&format!("/{collection}/insert"), vec![document], listener)
    }

    /// Updates documents matching `selector` with the mongo-style
    /// `modifier` (`{"$set": {...}}` and so on).
    pub fn update(
        &self,
        collection: &str,
        selector: Value,
        modifier: Value,
        options: Option<Value>,
        listener: Option<MethodCallback>,
    ) -> String {
        let options = options.unwrap_or_else(|| Value::Object(Map::new()));
        self.client.call(
            &format!("/{collection}/update"),
            vec![selector, modifier, options],
            listener,
        )
    }

    /// Removes the document with the given `_id`.
    pub fn remove(
        &self,
        collection: &str,
        document_id: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client.call(
            &format!("/{collection}/remove"),
            vec![json!({ "_id": document_id })],
            listener,
        )
    }

    // -----------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------

    pub fn login_with_username(
        &self,
        username: &str,
        password: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client.login_with_password(
            &LoginIdentity::Username(username.to_string()),
            password,
            listener,
        )
    }

    pub fn login_with_email(
        &self,
        email: &str,
        password: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client.login_with_password(
            &LoginIdentity::Email(email.to_string()),
            password,
            listener,
        )
    }

    pub fn login_with_token(
        &self,
        token: &str,
        listener: Option<MethodCallback>,
    ) -> String {
        self.client.login_with_token(token, listener)
    }

    /// Creates an account and logs in as it.
    ///
    /// # Errors
    /// Returns [`DdpError::Session`] if the account has neither a username
    /// nor an email.
    pub fn register_and_login(
        &self,
        account: &NewAccount,
        listener: Option<MethodCallback>,
    ) -> Result<String, DdpError> {
        self.client.register_and_login(account, listener)
    }

    pub fn logout(&self, listener: Option<MethodCallback>) -> String {
        self.client.logout(listener)
    }
}

fn reply_to<R: Send + 'static>(
    tx: oneshot::Sender<Result<R, MethodError>>,
) -> Box<dyn FnOnce(Result<R, MethodError>) + Send + 'static> {
    Box::new(move |outcome| {
        // The caller may have stopped waiting; nothing to do then.
        let _ = tx.send(outcome);
    })
}

// ---------------------------------------------------------------------------
// DdpSessionBuilder
// ---------------------------------------------------------------------------

/// Builder for a WebSocket + JSON [`DdpSession`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use meteor_ddp::prelude::*;
///
/// # fn run() -> Result<(), DdpError> {
/// let session = DdpSession::builder()
///     .url("wss://example.com/websocket")
///     .connect_timeout(Duration::from_secs(10))
///     .config(ClientConfig {
///         max_reconnect_attempts: 10,
///         ..ClientConfig::default()
///     })
///     .build(MemoryCredentialStore::new())?;
/// # Ok(())
/// # }
/// ```
pub struct DdpSessionBuilder {
    transport: WebSocketConfig,
    config: ClientConfig,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl DdpSessionBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            transport: WebSocketConfig::default(),
            config: ClientConfig::default(),
            dispatcher: None,
        }
    }

    /// Sets the server endpoint.
    pub fn url(mut self, url: &str) -> Self {
        self.transport.url = url.to_string();
        self
    }

    /// Sets how long a connection attempt may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.transport.connect_timeout = timeout;
        self
    }

    /// Sets the client configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets where callbacks run. Defaults to a [`TokioDispatcher`] on the
    /// current runtime.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Builds the session on the current tokio runtime. Nothing connects
    /// until [`DdpSession::connect`] is called.
    ///
    /// # Errors
    /// Returns [`TransportError::NoRuntime`]
    /// when called outside a tokio runtime.
    pub fn build<S: CredentialStore>(
        self,
        store: S,
    ) -> Result<DdpSession<WebSocketTransport, S, JsonCodec>, DdpError> {
        let transport = WebSocketTransport::new(self.transport)?;
        let dispatcher: Arc<dyn Dispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => {
                let runtime = Handle::try_current()
                    .map_err(|_| TransportError::NoRuntime)?;
                Arc::new(TokioDispatcher::new(&runtime))
            }
        };
        tracing::debug!(url = %transport.config().url, "building DDP session");

        let client =
            DdpClient::new(transport, store, JsonCodec, self.config, dispatcher);
        Ok(DdpSession::new(client))
    }
}

impl Default for DdpSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
