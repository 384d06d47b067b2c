//! # meteor-ddp
//!
//! A client for DDP, the protocol Meteor servers speak over WebSocket.
//!
//! The client keeps a session alive across dropped connections, matches
//! method results and subscription readiness to the requests that caused
//! them, holds requests back until the session is ready, and logs the user
//! back in with a stored token after every reconnect. Applications see the
//! result through a [`DdpObserver`] and per-request listeners.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meteor_ddp::prelude::*;
//!
//! struct Printer;
//!
//! impl DdpObserver for Printer {
//!     fn on_connect(&self, resumed: bool) {
//!         println!("connected (resumed login: {resumed})");
//!     }
//!     fn on_data_added(&self, change: &DocumentChange) {
//!         println!("{}: {} added", change.collection, change.id);
//!     }
//! }
//!
//! # async fn run() -> Result<(), DdpError> {
//! let session = DdpSession::builder()
//!     .url("ws://localhost:3000/websocket")
//!     .build(MemoryCredentialStore::new())?;
//! session.add_observer(Arc::new(Printer));
//! session.connect();
//! session.subscribe_async("tasks", vec![]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - `meteor-ddp-transport`: the [`Transport`] port and a WebSocket adapter
//! - `meteor-ddp-protocol`: wire messages and the [`Codec`] port
//! - `meteor-ddp-session`: login state and the [`CredentialStore`] port
//! - `meteor-ddp` (this crate): the engine, event fan-out and facade

mod config;
mod dispatch;
mod engine;
mod error;
mod fanout;
mod pending;
mod session;

pub use config::{
    ClientConfig, DEFAULT_LOGIN_TOKEN_KEY, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
pub use dispatch::{Dispatcher, InlineDispatcher, Job, TokioDispatcher};
pub use engine::{ConnectionState, DdpClient};
pub use error::DdpError;
pub use fanout::{ClientEvent, DdpObserver, DocumentChange, EventFanout, ObserverId};
pub use pending::{MethodCallback, SubscribeCallback, UnsubscribeCallback};
pub use session::{DdpSession, DdpSessionBuilder};

pub use meteor_ddp_protocol::{
    ClientMessage, Codec, DdpVersion, JsonCodec, MethodError, ProtocolError,
    ServerMessage,
};
pub use meteor_ddp_session::{
    CredentialStore, LoginIdentity, LoginRecord, LoginResult,
    MemoryCredentialStore, NewAccount, SessionError,
};
pub use meteor_ddp_transport::{
    Transport, TransportError, TransportEvent, TransportHandler,
    WebSocketConfig, WebSocketTransport,
};

/// The types most applications need.
pub mod prelude {
    pub use crate::{
        ClientConfig, ConnectionState, CredentialStore, DdpError, DdpObserver,
        DdpSession, DocumentChange, LoginIdentity, MemoryCredentialStore,
        MethodError, NewAccount, ObserverId,
    };
}
