//! Gateway configuration RPCs.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value, json},
};

use crate::{Result, session::GatewaySession};

/// Current configuration as reported by `config.get`.
///
/// The snapshot is open-ended; fields this client does not model are kept in
/// `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Concurrency token to pass back as `baseHash` on writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchemaResponse {
    pub schema: Value,
    #[serde(rename = "uiHints", default)]
    pub ui_hints: Map<String, Value>,
    pub version: String,
    #[serde(rename = "generatedAt")]
    pub generated_at: String,
}

/// Parameters of `config.set`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigSetParams {
    pub raw: String,
    #[serde(rename = "baseHash", skip_serializing_if = "Option::is_none")]
    pub base_hash: Option<String>,
}

/// Parameters of `config.patch` and `config.apply`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigPatchParams {
    pub raw: String,
    #[serde(rename = "baseHash", skip_serializing_if = "Option::is_none")]
    pub base_hash: Option<String>,
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(rename = "restartDelayMs", skip_serializing_if = "Option::is_none")]
    pub restart_delay_ms: Option<u64>,
}

/// Reads and writes gateway configuration over a [`GatewaySession`].
#[derive(Debug)]
pub struct ConfigClient {
    session: GatewaySession,
}

impl ConfigClient {
    pub fn new(session: GatewaySession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &GatewaySession {
        &self.session
    }

    pub async fn get(&self) -> Result<ConfigSnapshot> {
        self.session.request("config.get", &json!({})).await
    }

    pub async fn schema(&self) -> Result<ConfigSchemaResponse> {
        self.session.request("config.schema", &json!({})).await
    }

    /// Replace the whole configuration. The result shape is gateway-defined.
    pub async fn set(&self, params: &ConfigSetParams) -> Result<Value> {
        self.session.request("config.set", params).await
    }

    pub async fn patch(&self, params: &ConfigPatchParams) -> Result<Value> {
        self.session.request("config.patch", params).await
    }

    pub async fn apply(&self, params: &ConfigPatchParams) -> Result<Value> {
        self.session.request("config.apply", params).await
    }

    /// `hash` of the current snapshot, for use as `baseHash`.
    ///
    /// Passed through as reported, blank included; the gateway decides whether
    /// it matches.
    pub async fn current_hash(&self) -> Result<Option<String>> {
        Ok(self.get().await?.hash)
    }

    pub async fn stop(&self) {
        self.session.stop().await;
    }
}
