//! One gateway connection: handshake, request multiplexing, event delivery.
//!
//! A dedicated driver task owns the socket, the pending-request table, the
//! handshake phase and the challenge nonce. [`GatewayClient`] handles talk to
//! it over a command channel, so connection state is never shared.

use std::sync::Arc;

use {
    clawlink_auth::DeviceIdentity,
    clawlink_protocol::{
        CONNECT_CHALLENGE_EVENT, CONNECT_METHOD, EventFrame, GatewayFrame, HelloOk, RequestFrame,
        ResponseFrame, decode, encode,
    },
    futures::{Sink, SinkExt, Stream, StreamExt},
    serde::de::DeserializeOwned,
    serde_json::Value,
    tokio::sync::{mpsc, oneshot, watch},
    tokio_tungstenite::tungstenite::{
        self, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
    tracing::{debug, trace, warn},
};

use crate::{
    Error, Result,
    handshake::build_connect_params,
    options::ClientOptions,
    state::{Closure, ConnectionPhase, ConnectionStatus, PendingRequests, Reply},
    transport::{self, unix_now_ms},
};

/// Receiving end for server-pushed events. One listener per connection.
pub type EventSender = mpsc::UnboundedSender<EventFrame>;

const CONNECT_FAILED_CODE: u16 = 1008;
const ABNORMAL_CLOSURE_CODE: u16 = 1006;
const NO_STATUS_CODE: u16 = 1005;

enum Command {
    Request {
        method: String,
        params: Option<Value>,
        reply: Reply,
    },
    SetEventListener(Option<EventSender>),
    Stop,
}

// ── Connector ────────────────────────────────────────────────────────────────

/// Opens a connection and drives it to `Ready`.
pub struct GatewayConnector {
    options: Arc<ClientOptions>,
    identity: Option<Arc<DeviceIdentity>>,
    events: Option<EventSender>,
    status: watch::Sender<ConnectionStatus>,
}

impl GatewayConnector {
    pub fn new(options: impl Into<Arc<ClientOptions>>) -> Self {
        Self {
            options: options.into(),
            identity: None,
            events: None,
            status: watch::channel(ConnectionStatus::default()).0,
        }
    }

    /// Sign the handshake with this identity (ignored when the options
    /// disable device identity).
    pub fn device_identity(mut self, identity: Arc<DeviceIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Register the event listener before the handshake so that no event
    /// pushed right after `hello-ok` is missed.
    pub fn event_listener(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    fn signing_identity(&self) -> Option<Arc<DeviceIdentity>> {
        if self.options.disable_device_identity {
            None
        } else {
            self.identity.clone()
        }
    }

    /// Phase updates for this attempt, starting at `Idle`. The receiver keeps
    /// following the connection after the handshake.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Open the WebSocket and complete the handshake.
    pub async fn connect(self) -> Result<GatewayClient> {
        self.set_phase(ConnectionPhase::Connecting);
        let stream =
            match transport::open(&self.options, self.signing_identity().is_some()).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.status.send_replace(ConnectionStatus {
                        phase: ConnectionPhase::Closed,
                        closure: Some(Closure::Lost(e.to_string())),
                    });
                    return Err(e);
                },
            };
        self.connect_with_stream(stream).await
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    /// Complete the handshake over an already open WebSocket.
    pub async fn connect_with_stream<S>(self, stream: S) -> Result<GatewayClient>
    where
        S: Stream<Item = std::result::Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin
            + Send
            + 'static,
    {
        self.set_phase(ConnectionPhase::Connecting);
        let status_rx = self.status.subscribe();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let driver = Driver {
            identity: self.signing_identity(),
            stream,
            options: self.options,
            listener: self.events,
            status: self.status,
            pending: PendingRequests::default(),
            connect_sent: false,
            connect_id: None,
            connect_nonce: None,
            ready: Some(ready_tx),
        };
        tokio::spawn(driver.run(commands_rx));

        match ready_rx.await {
            Ok(Ok(hello)) => Ok(GatewayClient {
                commands: commands_tx,
                status: status_rx,
                hello: Arc::new(hello),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(closed_error(&status_rx)),
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Handle to a connection that completed its handshake.
///
/// Clones share the connection. The connection is stopped by [`stop`] or when
/// the last handle is dropped.
///
/// [`stop`]: GatewayClient::stop
#[derive(Clone)]
pub struct GatewayClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    hello: Arc<Value>,
}

impl GatewayClient {
    pub fn connector(options: impl Into<Arc<ClientOptions>>) -> GatewayConnector {
        GatewayConnector::new(options)
    }

    /// Raw `connect` result payload.
    pub fn hello(&self) -> &Value {
        &self.hello
    }

    pub fn hello_ok(&self) -> Option<HelloOk> {
        HelloOk::from_payload(&self.hello)
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.status.borrow().phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == ConnectionPhase::Closed
    }

    /// Human-readable closure cause, once closed.
    pub fn close_reason(&self) -> Option<String> {
        self.status.borrow().closure.as_ref().map(ToString::to_string)
    }

    /// Wait until the connection reaches `Closed`.
    pub async fn closed(&self) -> Closure {
        let mut status = self.status.clone();
        let closure = match status
            .wait_for(|s| s.phase == ConnectionPhase::Closed)
            .await
        {
            Ok(s) => s.closure.clone().unwrap_or(Closure::Stopped),
            Err(_) => Closure::Stopped,
        };
        closure
    }

    /// Send `method` and wait for its response.
    ///
    /// There is no timeout; the call ends with the response or with the
    /// connection.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(closed_error(&self.status));
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                method: method.to_owned(),
                params,
                reply,
            })
            .map_err(|_| closed_error(&self.status))?;
        rx.await.map_err(|_| closed_error(&self.status))?
    }

    pub async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let payload = self.request(method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Replace the event listener. Events arriving while none is set are lost.
    pub fn set_event_listener(&self, listener: Option<EventSender>) {
        let _ = self.commands.send(Command::SetEventListener(listener));
    }

    /// Close the connection. Pending and later requests fail with
    /// [`Error::Stopped`].
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

fn closed_error(status: &watch::Receiver<ConnectionStatus>) -> Error {
    status
        .borrow()
        .closure
        .as_ref()
        .map_or(Error::Stopped, Closure::to_error)
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// `Err` ends the connection with the given closure.
type Step = std::result::Result<(), Closure>;

struct Driver<S> {
    stream: S,
    options: Arc<ClientOptions>,
    identity: Option<Arc<DeviceIdentity>>,
    listener: Option<EventSender>,
    status: watch::Sender<ConnectionStatus>,
    pending: PendingRequests,
    connect_sent: bool,
    connect_id: Option<String>,
    connect_nonce: Option<String>,
    /// Settled exactly once: with `hello-ok`, the rejection, or the closure.
    ready: Option<oneshot::Sender<Result<Value>>>,
}

impl<S> Driver<S>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let debounce = tokio::time::sleep(self.options.connect_delay());
        tokio::pin!(debounce);

        let closure = loop {
            let step = tokio::select! {
                () = &mut debounce, if !self.connect_sent => self.send_connect().await,
                inbound = self.stream.next() => match inbound {
                    Some(Ok(message)) => self.handle_message(message).await,
                    Some(Err(e)) => Err(Closure::Lost(e.to_string())),
                    None => Err(Closure::Remote {
                        code: ABNORMAL_CLOSURE_CODE,
                        reason: String::new(),
                    }),
                },
                command = commands.recv() => match command {
                    Some(Command::Request { method, params, reply }) => {
                        self.send_request(method, params, reply).await
                    },
                    Some(Command::SetEventListener(listener)) => {
                        self.listener = listener;
                        Ok(())
                    },
                    Some(Command::Stop) | None => {
                        self.send_close(None).await;
                        Err(Closure::Stopped)
                    },
                },
            };
            if let Err(closure) = step {
                break closure;
            }
        };

        self.shutdown(closure);
    }

    fn phase(&self) -> ConnectionPhase {
        self.status.borrow().phase
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    async fn handle_message(&mut self, message: Message) -> Step {
        match message {
            Message::Text(text) => self.handle_text(text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => self.handle_text(text).await,
                Err(_) => {
                    trace!(len = bytes.len(), "dropping non-utf8 binary message");
                    Ok(())
                },
            },
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((NO_STATUS_CODE, String::new()));
                Err(Closure::Remote { code, reason })
            },
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(()),
        }
    }

    async fn handle_text(&mut self, text: &str) -> Step {
        let Some(frame) = decode(text) else {
            trace!(len = text.len(), "dropping malformed inbound frame");
            return Ok(());
        };
        match frame {
            GatewayFrame::Response(response) => self.handle_response(response).await,
            GatewayFrame::Event(event) if event.event == CONNECT_CHALLENGE_EVENT => {
                match event.challenge_nonce().map(str::to_owned) {
                    Some(nonce) => self.handle_challenge(nonce).await,
                    None => {
                        debug!("ignoring connect.challenge without a nonce");
                        Ok(())
                    },
                }
            },
            GatewayFrame::Event(event) => {
                self.dispatch_event(event);
                Ok(())
            },
            GatewayFrame::Request(request) => {
                debug!(method = %request.method, "ignoring gateway-initiated request");
                Ok(())
            },
        }
    }

    async fn handle_challenge(&mut self, nonce: String) -> Step {
        if self.connect_sent {
            // Only the window before the first send can bind a nonce. Late
            // challenges, including after the handshake settled, are ignored.
            debug!(phase = ?self.phase(), "ignoring connect.challenge after connect was sent");
            return Ok(());
        }
        self.connect_nonce = Some(nonce);
        self.send_connect().await
    }

    async fn send_connect(&mut self) -> Step {
        if self.connect_sent {
            return Ok(());
        }
        self.connect_sent = true;

        let params = build_connect_params(
            &self.options,
            self.identity.as_deref(),
            self.connect_nonce.as_deref(),
            unix_now_ms(),
        );
        let params = serde_json::to_value(&params).map_err(|e| Closure::Lost(e.to_string()))?;
        let id = uuid::Uuid::new_v4().to_string();
        self.connect_id = Some(id.clone());
        self.set_phase(ConnectionPhase::AwaitingConnectAck);
        debug!(
            with_nonce = self.connect_nonce.is_some(),
            device_identity = self.identity.is_some(),
            "sending connect"
        );
        self.write_frame(&GatewayFrame::Request(RequestFrame::new(
            id,
            CONNECT_METHOD,
            Some(params),
        )))
        .await
    }

    async fn handle_response(&mut self, response: ResponseFrame) -> Step {
        if self.connect_id.as_deref() == Some(response.id.as_str()) {
            self.connect_id = None;
            return match response.into_result() {
                Ok(hello) => {
                    self.set_phase(ConnectionPhase::Ready);
                    debug!("gateway handshake complete");
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Ok(hello));
                    }
                    Ok(())
                },
                Err(shape) => {
                    warn!(code = %shape.code, message = %shape.message, "gateway rejected connect");
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Err(Error::Handshake(shape)));
                    }
                    self.send_close(Some(CloseFrame {
                        code: CloseCode::Policy,
                        reason: "connect failed".into(),
                    }))
                    .await;
                    Err(Closure::Remote {
                        code: CONNECT_FAILED_CODE,
                        reason: "connect failed".into(),
                    })
                },
            };
        }

        if !self.pending.resolve(response) {
            trace!("dropping response for unknown request id");
        }
        Ok(())
    }

    async fn send_request(&mut self, method: String, params: Option<Value>, reply: Reply) -> Step {
        if self.phase() != ConnectionPhase::Ready {
            let _ = reply.send(Err(Error::NotConnected));
            return Ok(());
        }
        let id = self.pending.register(reply);
        trace!(%method, %id, in_flight = self.pending.len(), "sending request");
        // On write failure the entry is failed with the rest at shutdown.
        self.write_frame(&GatewayFrame::Request(RequestFrame::new(id, method, params)))
            .await
    }

    fn dispatch_event(&mut self, event: EventFrame) {
        if self.phase() != ConnectionPhase::Ready {
            trace!(event = %event.event, "dropping event received before hello-ok");
            return;
        }
        let Some(listener) = &self.listener else {
            trace!(event = %event.event, "no event listener; dropping event");
            return;
        };
        if listener.send(event).is_err() {
            debug!("event listener went away");
            self.listener = None;
        }
    }

    async fn write_frame(&mut self, frame: &GatewayFrame) -> Step {
        let text = encode(frame).map_err(|e| Closure::Lost(e.to_string()))?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Closure::Lost(e.to_string()))
    }

    async fn send_close(&mut self, frame: Option<CloseFrame>) {
        if let Err(e) = self.stream.send(Message::Close(frame)).await {
            trace!(error = %e, "close frame not delivered");
        }
    }

    fn shutdown(mut self, closure: Closure) {
        debug!(%closure, in_flight = self.pending.len(), "gateway connection closed");
        self.status.send_modify(|s| {
            s.phase = ConnectionPhase::Closed;
            s.closure = Some(closure.clone());
        });
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(closure.to_error()));
        }
        self.pending.fail_all(&closure);
    }
}
