//! Connection phase and the pending-request table owned by the driver task.

use std::collections::HashMap;

use {clawlink_protocol::ResponseFrame, serde_json::Value, tokio::sync::oneshot};

use crate::{Error, Result};

/// Lifecycle of one gateway connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    /// Transport opening, or open and waiting out the challenge window.
    Connecting,
    AwaitingConnectAck,
    Ready,
    Closed,
}

/// Why a connection ended. Every waiter observes the same closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    /// Close frame received, or the socket closed by us with a code.
    Remote { code: u16, reason: String },
    /// Transport error or EOF without a close frame.
    Lost(String),
    /// `stop()` was called or every handle was dropped.
    Stopped,
}

impl Closure {
    pub fn to_error(&self) -> Error {
        match self {
            Self::Remote { code, reason } => Error::Closed {
                code: *code,
                reason: reason.clone(),
            },
            Self::Lost(detail) => Error::ConnectionLost(detail.clone()),
            Self::Stopped => Error::Stopped,
        }
    }
}

impl std::fmt::Display for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_error().fmt(f)
    }
}

/// Snapshot published to handles through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    pub closure: Option<Closure>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            closure: None,
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<Value>>;

/// In-flight requests keyed by request id.
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: HashMap<String, Reply>,
}

impl PendingRequests {
    /// Register `reply` under a fresh id and return the id.
    pub(crate) fn register(&mut self, reply: Reply) -> String {
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !self.entries.contains_key(&id) {
                self.entries.insert(id.clone(), reply);
                return id;
            }
        }
    }

    /// Settle the entry matching `response`. Returns `false` for unknown ids.
    pub(crate) fn resolve(&mut self, response: ResponseFrame) -> bool {
        let Some(reply) = self.entries.remove(&response.id) else {
            return false;
        };
        let result = response.into_result().map_err(Error::Request);
        // The caller may have stopped waiting; nothing to do then.
        let _ = reply.send(result);
        true
    }

    /// Fail every entry with the same closure.
    pub(crate) fn fail_all(&mut self, closure: &Closure) {
        for (_, reply) in self.entries.drain() {
            let _ = reply.send(Err(closure.to_error()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
