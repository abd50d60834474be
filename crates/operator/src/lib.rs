//! Operator-facing gateway clients: configuration and chat.
//!
//! Both clients sit on a [`GatewaySession`], which connects on first use and
//! reconnects after the connection closes.

pub mod chat_client;
pub mod config_client;
pub mod error;
pub mod session;

pub use {
    chat_client::{
        AgentParams, ChatAbortParams, ChatAbortResponse, ChatAttachment, ChatClient,
        ChatHistoryParams, ChatHistoryResponse, ChatInjectParams, ChatInjectResponse,
        ChatSendParams, ChatSendResponse,
    },
    config_client::{
        ConfigClient, ConfigPatchParams, ConfigSchemaResponse, ConfigSetParams, ConfigSnapshot,
    },
    error::{Error, Result},
    session::GatewaySession,
};
