//! Chat and agent RPCs.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::{Result, session::GatewaySession};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatAttachment {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

// ── Params ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatHistoryParams {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatSendParams {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ChatAttachment>,
    #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Generated when absent so a resend after reconnect is deduplicated.
    #[serde(rename = "idempotencyKey", skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatAbortParams {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "runId", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatInjectParams {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Parameters of the `agent` method.
///
/// Routing fields beyond the common ones (group, thread, lane, provenance and
/// the like) go in `extra` under their wire names.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentParams {
    pub message: String,
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "sessionKey", skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ChatAttachment>,
    #[serde(rename = "extraSystemPrompt", skip_serializing_if = "Option::is_none")]
    pub extra_system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "idempotencyKey", skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(rename = "thinkingLevel", default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<Value>,
    #[serde(rename = "verboseLevel", default, skip_serializing_if = "Option::is_none")]
    pub verbose_level: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSendResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAbortResponse {
    pub ok: bool,
    pub aborted: bool,
    #[serde(rename = "runIds", default)]
    pub run_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInjectResponse {
    pub ok: bool,
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Chat operations over a [`GatewaySession`].
#[derive(Debug)]
pub struct ChatClient {
    session: GatewaySession,
}

impl ChatClient {
    pub fn new(session: GatewaySession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &GatewaySession {
        &self.session
    }

    pub async fn history(&self, params: &ChatHistoryParams) -> Result<ChatHistoryResponse> {
        self.session.request("chat.history", params).await
    }

    pub async fn send(&self, params: ChatSendParams) -> Result<ChatSendResponse> {
        let params = ChatSendParams {
            idempotency_key: Some(idempotency_key(params.idempotency_key.as_deref())),
            ..params
        };
        self.session.request("chat.send", &params).await
    }

    pub async fn abort(&self, params: &ChatAbortParams) -> Result<ChatAbortResponse> {
        self.session.request("chat.abort", params).await
    }

    pub async fn inject(&self, params: &ChatInjectParams) -> Result<ChatInjectResponse> {
        self.session.request("chat.inject", params).await
    }

    /// Run an agent turn. The response shape depends on the gateway.
    pub async fn agent(&self, params: AgentParams) -> Result<Value> {
        let params = AgentParams {
            idempotency_key: Some(idempotency_key(params.idempotency_key.as_deref())),
            ..params
        };
        self.session.request("agent", &params).await
    }

    pub async fn stop(&self) {
        self.session.stop().await;
    }
}

/// The caller's key, or a fresh UUID.
fn idempotency_key(provided: Option<&str>) -> String {
    provided
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
