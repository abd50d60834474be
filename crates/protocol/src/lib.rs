//! Gateway WebSocket/RPC protocol definitions (client side).
//!
//! Protocol version 3. All communication uses JSON frames, one per WebSocket
//! message.
//!
//! Frame types:
//! - `RequestFrame`: client to gateway RPC call
//! - `ResponseFrame`: gateway to client RPC result
//! - `EventFrame`: gateway to client server push

use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{Error, Result};

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_MIN_PROTOCOL: u32 = 3;
pub const DEFAULT_MAX_PROTOCOL: u32 = 3;
pub const MAX_PAYLOAD_BYTES: usize = 26_214_400; // 25 MiB
/// Window in which an early `connect.challenge` push is awaited before the
/// first `connect` is committed.
pub const CONNECT_DEBOUNCE_MS: u64 = 750;

/// Method name of the mandatory handshake request.
pub const CONNECT_METHOD: &str = "connect";
/// Server push that carries the anti-replay nonce. Never forwarded to listeners.
pub const CONNECT_CHALLENGE_EVENT: &str = "connect.challenge";
/// Value of `type` in a successful handshake payload.
pub const HELLO_OK: &str = "hello-ok";

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const NOT_LINKED: &str = "NOT_LINKED";
    pub const NOT_PAIRED: &str = "NOT_PAIRED";
    pub const AGENT_TIMEOUT: &str = "AGENT_TIMEOUT";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAVAILABLE: &str = "UNAVAILABLE";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// Structured error carried by a failed response. `retryable` and
/// `retry_after_ms` are hints for the caller; the client never acts on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(rename = "retryAfterMs", skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: None,
            retry_after_ms: None,
        }
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Client → gateway RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Gateway → client RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Split into the success payload or the error to surface.
    ///
    /// A failed response without an error body still fails, with a generic
    /// `request failed` message.
    pub fn into_result(self) -> std::result::Result<serde_json::Value, ErrorShape> {
        if self.ok {
            Ok(self.payload.unwrap_or(serde_json::Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ErrorShape::new(error_codes::UNAVAILABLE, "request failed")))
        }
    }
}

/// Gateway → client server-push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
    pub state_version: Option<StateVersion>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
            seq: None,
            state_version: None,
        }
    }

    /// The nonce of a `connect.challenge` push, if this is one and it carries
    /// a non-empty string nonce.
    pub fn challenge_nonce(&self) -> Option<&str> {
        if self.event != CONNECT_CHALLENGE_EVENT {
            return None;
        }
        self.payload
            .as_ref()
            .and_then(|p| p.get("nonce"))
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVersion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<u64>,
}

/// Discriminated union of all frame types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "req")]
    Request(RequestFrame),
    #[serde(rename = "res")]
    Response(ResponseFrame),
    #[serde(rename = "event")]
    Event(EventFrame),
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// Serialize a frame to its wire text.
pub fn encode(frame: &GatewayFrame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse wire text into a frame.
///
/// Anything that is not a well-formed frame yields `None`: intermediaries may
/// inject non-protocol traffic and the connection must survive it.
pub fn decode(text: &str) -> Option<GatewayFrame> {
    serde_json::from_str(text).ok()
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters sent by the client in the initial `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "minProtocol")]
    pub min_protocol: u32,
    #[serde(rename = "maxProtocol")]
    pub max_protocol: u32,
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub version: String,
    pub platform: String,
    pub mode: String,
    #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Signed device block. `signed_at` is in milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub signature: String,
    #[serde(rename = "signedAt")]
    pub signed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Sent by the gateway after a successful handshake.
///
/// Parsed leniently: every section is optional so that newer gateways with
/// extra or reshaped fields still connect. Unknown keys land in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelloOk {
    #[serde(default)]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
    #[serde(
        rename = "canvasHostUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub canvas_host_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl HelloOk {
    /// Best-effort typed view of a raw `connect` payload.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(rename = "connId")]
    pub conn_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloAuth {
    #[serde(rename = "deviceToken")]
    pub device_token: String,
    pub role: String,
    pub scopes: Vec<String>,
    #[serde(rename = "issuedAtMs", skip_serializing_if = "Option::is_none")]
    pub issued_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "maxPayload")]
    pub max_payload: usize,
    #[serde(rename = "maxBufferedBytes")]
    pub max_buffered_bytes: usize,
    #[serde(rename = "tickIntervalMs")]
    pub tick_interval_ms: u64,
}

// ── Roles, scopes, modes, caps ───────────────────────────────────────────────

pub mod roles {
    pub const OPERATOR: &str = "operator";
    pub const NODE: &str = "node";
}

pub mod scopes {
    pub const ADMIN: &str = "operator.admin";
    pub const READ: &str = "operator.read";
    pub const WRITE: &str = "operator.write";
    pub const APPROVALS: &str = "operator.approvals";
    pub const PAIRING: &str = "operator.pairing";
}

/// Values accepted for `client.mode`.
pub mod modes {
    pub const BACKEND: &str = "backend";
    pub const CLI: &str = "cli";
    pub const UI: &str = "ui";
    pub const PROBE: &str = "probe";
    pub const TEST: &str = "test";
    pub const NODE: &str = "node";
    pub const WEBCHAT: &str = "webchat";
}

pub mod caps {
    /// Ask the gateway to stream tool-call events to this client.
    pub const TOOL_EVENTS: &str = "tool-events";
}
