//! Lazily connected, self-healing gateway session shared by the domain clients.

use std::sync::Arc;

use {
    clawlink_auth::DeviceIdentity,
    clawlink_client::{ClientOptions, EventSender, GatewayClient, GatewayConnector},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
    tokio::sync::{Mutex, watch},
    tracing::debug,
};

use crate::{Error, Result};

/// One logical gateway session.
///
/// The connection is opened on the first request and reused while it stays
/// open. A request made after the connection closed opens a fresh one; there is
/// no retry of the request that observed the closure.
///
/// The connection slot is only locked briefly. A handshake in flight is not
/// guarded by it, so [`stop`](Self::stop) cancels a pending connect instead of
/// waiting for it.
pub struct GatewaySession {
    options: Arc<ClientOptions>,
    identity: Option<Arc<DeviceIdentity>>,
    events: Option<EventSender>,
    client: Mutex<Option<GatewayClient>>,
    /// Serializes connection attempts.
    connecting: Mutex<()>,
    /// Bumped by every `stop`.
    stops: watch::Sender<u64>,
}

impl GatewaySession {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options: Arc::new(options),
            identity: None,
            events: None,
            client: Mutex::new(None),
            connecting: Mutex::new(()),
            stops: watch::channel(0).0,
        }
    }

    pub fn with_device_identity(mut self, identity: Arc<DeviceIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Events from every connection this session opens go to `events`.
    pub fn with_event_listener(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Connect now rather than on first request. No-op while connected.
    pub async fn start(&self) -> Result<()> {
        self.client().await.map(drop)
    }

    /// The live connection, opening one if needed.
    ///
    /// Fails with [`clawlink_client::Error::Stopped`] when `stop` runs while
    /// the handshake is still pending.
    pub async fn client(&self) -> Result<GatewayClient> {
        let mut stops = self.stops.subscribe();
        if let Some(client) = self.live_client().await {
            return Ok(client);
        }

        let _connecting = self.connecting.lock().await;
        // Another caller may have connected while this one waited.
        if let Some(client) = self.live_client().await {
            return Ok(client);
        }

        let mut connector = GatewayConnector::new(Arc::clone(&self.options));
        if let Some(identity) = &self.identity {
            connector = connector.device_identity(Arc::clone(identity));
        }
        if let Some(events) = &self.events {
            connector = connector.event_listener(events.clone());
        }
        // Dropping the connect future tears down its driver and socket.
        let client = tokio::select! {
            result = connector.connect() => result?,
            _ = stops.changed() => {
                debug!("gateway connect cancelled by stop");
                return Err(clawlink_client::Error::Stopped.into());
            },
        };

        let mut slot = self.client.lock().await;
        if stops.has_changed().unwrap_or(false) {
            client.stop();
            return Err(clawlink_client::Error::Stopped.into());
        }
        *slot = Some(client.clone());
        Ok(client)
    }

    /// The cached connection while it is open.
    async fn live_client(&self) -> Option<GatewayClient> {
        let slot = self.client.lock().await;
        let client = slot.as_ref()?;
        if client.is_closed() {
            debug!(
                reason = client.close_reason().as_deref().unwrap_or(""),
                "gateway connection closed; reconnecting"
            );
            return None;
        }
        Some(client.clone())
    }

    pub async fn is_connected(&self) -> bool {
        self.client
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Send `method` with serialized `params` and decode the response.
    pub async fn request<P, T>(&self, method: &str, params: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = self.request_value(method, serde_json::to_value(params)?).await?;
        serde_json::from_value(payload).map_err(|source| Error::Response {
            method: method.to_owned(),
            source,
        })
    }

    pub async fn request_value(&self, method: &str, params: Value) -> Result<Value> {
        let client = self.client().await?;
        Ok(client.request(method, Some(params)).await?)
    }

    /// Close the current connection, if any, and cancel a connect in flight.
    /// A later request reconnects.
    pub async fn stop(&self) {
        self.stops.send_modify(|n| *n = n.wrapping_add(1));
        if let Some(client) = self.client.lock().await.take() {
            client.stop();
        }
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("options", &self.options)
            .field("device_identity", &self.identity.is_some())
            .finish_non_exhaustive()
    }
}
