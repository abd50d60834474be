use std::time::Duration;

use {
    clawlink_protocol::{
        CONNECT_DEBOUNCE_MS, DEFAULT_MAX_PROTOCOL, DEFAULT_MIN_PROTOCOL, MAX_PAYLOAD_BYTES, modes,
        roles, scopes,
    },
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
};

pub const DEFAULT_CLIENT_ID: &str = "gateway-client";
pub const DEFAULT_CLIENT_VERSION: &str = "dev";

/// Everything needed to open one gateway connection.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Final `ws://` or `wss://` URL. Redirects are not followed.
    pub url: String,
    pub token: Option<Secret<String>>,
    pub password: Option<Secret<String>>,
    /// Pre-built `Cookie` header value. Takes precedence over a minted one.
    pub cookie: Option<Secret<String>>,
    /// Shared secret used to mint the proxy session cookie.
    pub proxy_jwt_secret: Option<Secret<String>>,
    /// Omit the `device` block from `connect` even when an identity is supplied.
    pub disable_device_identity: bool,

    pub client_id: String,
    pub client_display_name: Option<String>,
    pub client_version: String,
    pub platform: String,
    pub mode: String,
    pub instance_id: Option<String>,

    pub role: String,
    pub scopes: Vec<String>,
    pub caps: Vec<String>,
    pub min_protocol: u32,
    pub max_protocol: u32,

    /// How long to wait for an early `connect.challenge` before sending `connect`.
    pub connect_delay_ms: u64,
    /// Largest inbound WebSocket message accepted.
    pub max_message_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            password: None,
            cookie: None,
            proxy_jwt_secret: None,
            disable_device_identity: false,
            client_id: DEFAULT_CLIENT_ID.into(),
            client_display_name: None,
            client_version: DEFAULT_CLIENT_VERSION.into(),
            platform: std::env::consts::OS.into(),
            mode: modes::BACKEND.into(),
            instance_id: None,
            role: roles::OPERATOR.into(),
            scopes: vec![scopes::READ.into()],
            caps: Vec::new(),
            min_protocol: DEFAULT_MIN_PROTOCOL,
            max_protocol: DEFAULT_MAX_PROTOCOL,
            connect_delay_ms: CONNECT_DEBOUNCE_MS,
            max_message_bytes: MAX_PAYLOAD_BYTES,
        }
    }
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub(crate) fn token_str(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret().as_str())
    }

    pub(crate) fn password_str(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret().as_str())
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |present: bool| if present { Some("[REDACTED]") } else { None };
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("token", &redact(self.token.is_some()))
            .field("password", &redact(self.password.is_some()))
            .field("cookie", &redact(self.cookie.is_some()))
            .field("proxy_jwt_secret", &redact(self.proxy_jwt_secret.is_some()))
            .field("disable_device_identity", &self.disable_device_identity)
            .field("client_id", &self.client_id)
            .field("client_display_name", &self.client_display_name)
            .field("client_version", &self.client_version)
            .field("platform", &self.platform)
            .field("mode", &self.mode)
            .field("instance_id", &self.instance_id)
            .field("role", &self.role)
            .field("scopes", &self.scopes)
            .field("caps", &self.caps)
            .field("min_protocol", &self.min_protocol)
            .field("max_protocol", &self.max_protocol)
            .field("connect_delay_ms", &self.connect_delay_ms)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish()
    }
}
