//! DDP message types.
//!
//! Every frame on the wire is a JSON object with a `msg` field naming its
//! kind. Outbound frames are modelled by [`ClientMessage`], inbound frames by
//! [`ServerMessage`]; both are internally tagged on `msg`, so decoding a
//! frame is a single step that yields a closed enum the engine can `match`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Protocol version
// ---------------------------------------------------------------------------

/// A DDP protocol version this client can speak.
///
/// The wire representation is the bare version string (`"1"`, `"pre2"`,
/// `"pre1"`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum DdpVersion {
    #[default]
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "pre2")]
    Pre2,
    #[serde(rename = "pre1")]
    Pre1,
}

impl DdpVersion {
    /// Supported versions, in order of preference.
    pub const SUPPORTED: [DdpVersion; 3] =
        [DdpVersion::V1, DdpVersion::Pre2, DdpVersion::Pre1];

    /// Returns the wire string for this version.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::Pre2 => "pre2",
            Self::Pre1 => "pre1",
        }
    }

    /// Looks up a version by its wire string.
    ///
    /// Returns `None` for versions this client doesn't support.
    pub fn parse(version: &str) -> Option<Self> {
        Self::SUPPORTED
            .into_iter()
            .find(|supported| supported.as_str() == version)
    }
}

impl FromStr for DdpVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| ProtocolError::UnsupportedVersion(s.to_string()))
    }
}

impl fmt::Display for DdpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MethodError
// ---------------------------------------------------------------------------

/// The in-band error carried by `result` and `nosub` frames.
///
/// Servers are loose about the types here: `error` is often a number
/// (`403`) and `details` may be any JSON value. Everything is normalised
/// to strings, and absent or `null` fields become `None`. A `nosub` without
/// an error object is reported with [`MethodError::default()`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodError {
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub reason: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub details: Option<String>,
}

impl MethodError {
    /// Creates an error with just the `error` field set.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Adds a human-readable reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let error = self.error.as_deref().unwrap_or("unknown error");
        match &self.reason {
            Some(reason) => write!(f, "{error}: {reason}"),
            None => f.write_str(error),
        }
    }
}

impl std::error::Error for MethodError {}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

// ---------------------------------------------------------------------------
// ClientMessage (client → server)
// ---------------------------------------------------------------------------

/// A frame the client sends.
///
/// `#[serde(tag = "msg")]` produces the flat DDP shape:
///   `{ "msg": "sub", "name": "tasks", "id": "…" }`
/// Optional fields are omitted rather than sent as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Opens (or resumes) a DDP session.
    Connect {
        version: DdpVersion,
        support: Vec<DdpVersion>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },

    /// Invokes a remote method.
    Method {
        method: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Value>>,
        #[serde(
            rename = "randomSeed",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        random_seed: Option<String>,
    },

    /// Subscribes to a publication.
    Sub {
        name: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Value>>,
    },

    /// Stops a subscription.
    Unsub { id: String },

    /// Answers a server `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ClientMessage {
    /// Builds a `connect` frame offering every supported version.
    pub fn connect(version: DdpVersion, session: Option<String>) -> Self {
        Self::Connect {
            version,
            support: DdpVersion::SUPPORTED.to_vec(),
            session,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerMessage (server → client)
// ---------------------------------------------------------------------------

/// A frame the server sends.
///
/// Kinds this client has no use for still decode (so they can be logged),
/// and anything with an unrecognised `msg` becomes [`ServerMessage::Unknown`].
/// A frame without a `msg` field at all fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The handshake succeeded.
    Connected { session: String },

    /// The handshake failed; the server proposes `version` instead.
    Failed { version: String },

    /// Liveness check; must be answered with a `pong`.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Answer to a client ping. This client never pings, so it is ignored.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Outcome of a method call.
    #[serde(rename = "result")]
    MethodResult {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },

    /// The writes of these methods are reflected in the data messages.
    Updated {
        #[serde(default)]
        methods: Vec<String>,
    },

    /// These subscriptions delivered their initial data set.
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },

    /// A subscription ended (or never started).
    Nosub {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },

    /// A document was added to a collection.
    Added {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Value>,
    },

    /// A document was added at a position in an ordered collection.
    AddedBefore {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<String>,
    },

    /// Fields of a document changed (`fields`) or were removed (`cleared`).
    Changed {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cleared: Option<Vec<String>>,
    },

    /// A document was removed from a collection.
    Removed { collection: String, id: String },

    /// A document moved within an ordered collection.
    MovedBefore {
        collection: String,
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<String>,
    },

    /// The server could not process one of our frames.
    #[serde(rename = "error")]
    ServerError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(
            rename = "offendingMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<Value>,
    },

    /// A `msg` kind this client doesn't know.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// The `msg` value this frame was decoded from, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Failed { .. } => "failed",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::MethodResult { .. } => "result",
            Self::Updated { .. } => "updated",
            Self::Ready { .. } => "ready",
            Self::Nosub { .. } => "nosub",
            Self::Added { .. } => "added",
            Self::AddedBefore { .. } => "addedBefore",
            Self::Changed { .. } => "changed",
            Self::Removed { .. } => "removed",
            Self::MovedBefore { .. } => "movedBefore",
            Self::ServerError { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
