//! Wire protocol for the meteor-ddp client.
//!
//! This crate defines the frames a DDP client and server exchange:
//!
//! - **Types** ([`ClientMessage`], [`ServerMessage`], [`DdpVersion`],
//!   [`MethodError`]): the message structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages are
//!   converted to and from text frames.
//! - **Errors** ([`ProtocolError`]): what can go wrong during encoding,
//!   decoding or version negotiation.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (text frames) and the engine
//! (session state). It doesn't know about connections or login; it only
//! knows how to serialize and deserialize messages.
//!
//! ```text
//! Transport (text) → Protocol (ServerMessage) → Engine (session state)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{ClientMessage, DdpVersion, MethodError, ServerMessage};
