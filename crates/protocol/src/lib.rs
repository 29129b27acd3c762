//! Wire types for the botgate WebSocket protocol.
//!
//! Everything on the wire is a JSON text frame:
//! - [`CommandFrame`]   — consumer → gateway command call
//! - [`ApiResponse`]    — gateway → consumer command result (plus echo)
//! - [`LifecycleEvent`] — gateway → consumer handshake meta-event
//! - [`BotEvent`]       — gateway → consumer event push

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// `_post_method` value stamped on events delivered over an accepted
/// WebSocket connection.
pub const POST_METHOD_WEBSOCKET: u8 = 2;

/// Dial header carrying the reverse connection's role.
pub const ROLE_HEADER: &str = "x-client-role";
/// Dial header carrying the bot's numeric identity.
pub const SELF_ID_HEADER: &str = "x-self-id";

/// User-Agent presented on reverse dials.
pub const USER_AGENT: &str = concat!("botgate/", env!("CARGO_PKG_VERSION"));

// ── Retcodes ─────────────────────────────────────────────────────────────────

pub mod retcodes {
    /// Action is not part of the bot capability surface.
    pub const UNSUPPORTED_ACTION: i64 = 1404;
    /// An interceptor refused the command.
    pub const INTERCEPTED: i64 = 1429;
}

// ── Command envelope ─────────────────────────────────────────────────────────

/// Inbound command envelope: `{action, params, echo?}`.
///
/// Parsing is tolerant: missing fields default instead of failing, and a
/// frame that is not valid JSON at all decodes to an empty action (which the
/// bot surface then answers with an error-shaped response).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandFrame {
    pub action: String,
    pub params: serde_json::Value,
    pub echo: Option<serde_json::Value>,
}

impl CommandFrame {
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

/// Strip the trailing async marker from an action name. Sync and async
/// dispatch are identical over a message-oriented transport, so the marker
/// carries no further meaning.
pub fn strip_async_suffix(action: &str) -> &str {
    action.strip_suffix("_async").unwrap_or(action)
}

// ── Command response ─────────────────────────────────────────────────────────

/// Outbound command result. `echo` is copied verbatim from the triggering
/// command when present, whatever JSON value it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub retcode: i64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".into(),
            retcode: 0,
            data,
            msg: None,
            echo: None,
        }
    }

    pub fn failed(retcode: i64, msg: impl Into<String>) -> Self {
        Self {
            status: "failed".into(),
            retcode,
            data: serde_json::Value::Null,
            msg: Some(msg.into()),
            echo: None,
        }
    }
}

// ── Lifecycle handshake ──────────────────────────────────────────────────────

/// First frame on every event-capable connection, sent before any real
/// event. The accepted-side variant carries `_post_method`; the dialed-side
/// variant omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "_post_method", skip_serializing_if = "Option::is_none")]
    pub post_method: Option<u8>,
    pub meta_event_type: String,
    pub post_type: String,
    pub self_id: i64,
    pub sub_type: String,
    pub time: i64,
}

impl LifecycleEvent {
    /// Handshake for a connection this gateway accepted.
    pub fn accepted(self_id: i64, time: i64) -> Self {
        Self {
            post_method: Some(POST_METHOD_WEBSOCKET),
            ..Self::dialed(self_id, time)
        }
    }

    /// Handshake for a connection this gateway dialed.
    pub fn dialed(self_id: i64, time: i64) -> Self {
        Self {
            post_method: None,
            meta_event_type: "lifecycle".into(),
            post_type: "meta_event".into(),
            self_id,
            sub_type: "connect".into(),
            time,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ── Bot events ───────────────────────────────────────────────────────────────

/// An event produced by the bot, carrying both its JSON form (for filters)
/// and its serialized text (produced once, shared by every push).
#[derive(Debug, Clone)]
pub struct BotEvent {
    value: serde_json::Value,
    json: String,
}

impl BotEvent {
    pub fn new(value: serde_json::Value) -> Self {
        let json = value.to_string();
        Self { value, json }
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    pub fn json(&self) -> &str {
        &self.json
    }
}

// ── Reverse roles ────────────────────────────────────────────────────────────

/// Traffic direction of a reverse (dialed) connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Multiplexed: event push and command dispatch on one link.
    Universal,
    /// Push only.
    Event,
    /// Command dispatch only.
    Api,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Universal => "Universal",
            Self::Event => "Event",
            Self::Api => "API",
        }
    }

    /// Whether this role receives event pushes (and therefore handshakes).
    pub fn event_capable(&self) -> bool {
        !matches!(self, Self::Api)
    }

    /// Whether this role accepts inbound commands.
    pub fn command_capable(&self) -> bool {
        !matches!(self, Self::Event)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
