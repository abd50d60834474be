#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Connection engine against an in-process WebSocket gateway.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    clawlink_auth::{DeviceAuthPayload, DeviceIdentity, verify_device_signature},
    clawlink_client::{
        ClientOptions, Closure, ConnectionPhase, Error, GatewayClient, GatewayConnector,
    },
    clawlink_protocol::{
        ConnectParams, ErrorShape, EventFrame, GatewayFrame, RequestFrame, ResponseFrame, decode,
        encode, error_codes,
    },
    futures::{SinkExt, StreamExt},
    secrecy::Secret,
    serde_json::{Value, json},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
    tokio_tungstenite::{
        WebSocketStream,
        tungstenite::{
            Message,
            handshake::server::{ErrorResponse, Request, Response},
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    },
};

type ServerWs = WebSocketStream<TcpStream>;

// ── Harness ──────────────────────────────────────────────────────────────────

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    (listener, format!("ws://127.0.0.1:{}", addr.port()))
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (tcp, _) = listener.accept().await.expect("accept");
    tokio_tungstenite::accept_async(tcp)
        .await
        .expect("ws accept")
}

async fn read_request(ws: &mut ServerWs) -> RequestFrame {
    loop {
        match ws.next().await.expect("stream ended").expect("ws read") {
            Message::Text(text) => match decode(text.as_str()) {
                Some(GatewayFrame::Request(req)) => return req,
                other => panic!("expected request frame, got {other:?}"),
            },
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

async fn send_frame(ws: &mut ServerWs, frame: GatewayFrame) {
    ws.send(Message::Text(encode(&frame).unwrap().into()))
        .await
        .expect("ws send");
}

async fn send_event(ws: &mut ServerWs, event: &str, payload: Value) {
    send_frame(ws, GatewayFrame::Event(EventFrame::new(event, payload))).await;
}

async fn respond_ok(ws: &mut ServerWs, id: &str, payload: Value) {
    send_frame(ws, GatewayFrame::Response(ResponseFrame::ok(id, payload))).await;
}

fn hello() -> Value {
    json!({
        "type": "hello-ok",
        "protocol": 3,
        "server": { "version": "2026.1.0", "connId": "conn-1" },
        "features": { "methods": ["config.get", "chat.send"], "events": ["tick"] },
    })
}

fn options(url: &str) -> ClientOptions {
    ClientOptions {
        connect_delay_ms: 20,
        ..ClientOptions::new(url)
    }
}

/// Accept one connection and complete the handshake on the server side.
async fn serve_handshake(listener: &TcpListener) -> (ServerWs, ConnectParams) {
    let mut ws = accept(listener).await;
    let req = read_request(&mut ws).await;
    assert_eq!(req.method, "connect");
    let params: ConnectParams = serde_json::from_value(req.params.clone().unwrap()).unwrap();
    respond_ok(&mut ws, &req.id, hello()).await;
    (ws, params)
}

async fn connected(
    connector: GatewayConnector,
    listener: TcpListener,
) -> (GatewayClient, ServerWs) {
    let server = tokio::spawn(async move { serve_handshake(&listener).await.0 });
    let client = connector.connect().await.expect("connect");
    (client, server.await.unwrap())
}

// ── Handshake ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_exposes_hello_and_reaches_ready() {
    let (listener, url) = listen().await;
    let (client, _ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    assert_eq!(client.phase(), ConnectionPhase::Ready);
    assert_eq!(client.hello()["type"], "hello-ok");
    let hello = client.hello_ok().unwrap();
    assert_eq!(hello.protocol, Some(3));
    assert_eq!(hello.server.unwrap().conn_id, "conn-1");
    assert!(client.close_reason().is_none());
}

#[tokio::test]
async fn connector_status_starts_idle_and_follows_the_connection() {
    let (listener, url) = listen().await;
    let connector = GatewayConnector::new(options(&url));
    let status = connector.status();
    assert_eq!(status.borrow().phase, ConnectionPhase::Idle);

    let (client, _ws) = connected(connector, listener).await;
    assert_eq!(status.borrow().phase, ConnectionPhase::Ready);

    client.stop();
    assert_eq!(client.closed().await, Closure::Stopped);
    assert_eq!(status.borrow().phase, ConnectionPhase::Closed);
}

#[tokio::test]
async fn failed_open_reports_closed_phase() {
    let (listener, url) = listen().await;
    drop(listener);

    let connector = GatewayConnector::new(options(&url));
    let status = connector.status();
    let err = connector.connect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");

    let status = status.borrow();
    assert_eq!(status.phase, ConnectionPhase::Closed);
    assert!(matches!(status.closure, Some(Closure::Lost(_))));
}

#[tokio::test]
async fn early_challenge_skips_debounce_and_binds_nonce() {
    let (listener, url) = listen().await;
    let identity = Arc::new(DeviceIdentity::generate());
    let opts = ClientOptions {
        connect_delay_ms: 10_000,
        token: Some(Secret::new("tok".into())),
        ..ClientOptions::new(&url)
    };

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        send_event(&mut ws, "connect.challenge", json!({ "nonce": "n1", "ts": 1 })).await;
        let req = read_request(&mut ws).await;
        respond_ok(&mut ws, &req.id, hello()).await;
        (ws, req)
    });

    let client = tokio::time::timeout(
        Duration::from_secs(5),
        GatewayConnector::new(opts)
            .device_identity(Arc::clone(&identity))
            .connect(),
    )
    .await
    .expect("challenge should short-circuit the debounce")
    .expect("connect");
    let (_ws, req) = server.await.unwrap();

    assert_eq!(client.phase(), ConnectionPhase::Ready);
    let params: ConnectParams = serde_json::from_value(req.params.unwrap()).unwrap();
    let device = params.device.expect("device block");
    assert_eq!(device.nonce.as_deref(), Some("n1"));
    assert_eq!(device.id, identity.device_id());

    let scopes = params.scopes.unwrap();
    let payload = DeviceAuthPayload {
        device_id: &device.id,
        client_id: &params.client.id,
        client_mode: &params.client.mode,
        role: params.role.as_deref().unwrap(),
        scopes: &scopes,
        signed_at_ms: device.signed_at,
        token: Some("tok"),
        nonce: Some("n1"),
    };
    assert!(payload.to_canonical_string().starts_with("v2|"));
    verify_device_signature(&device.public_key, &payload, &device.signature).unwrap();
}

#[tokio::test]
async fn connect_sent_once_after_debounce_and_late_challenge_ignored() {
    let (listener, url) = listen().await;
    let identity = Arc::new(DeviceIdentity::generate());

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let connect = read_request(&mut ws).await;
        assert_eq!(connect.method, "connect");
        // A challenge arriving after connect went out must not trigger a resend.
        send_event(&mut ws, "connect.challenge", json!({ "nonce": "late" })).await;
        respond_ok(&mut ws, &connect.id, hello()).await;
        send_event(&mut ws, "connect.challenge", json!({ "nonce": "later" })).await;

        let next = read_request(&mut ws).await;
        assert_eq!(next.method, "health");
        respond_ok(&mut ws, &next.id, json!({ "ok": true })).await;
        (ws, connect)
    });

    let client = GatewayConnector::new(options(&url))
        .device_identity(identity)
        .connect()
        .await
        .unwrap();
    let payload = client.request("health", None).await.unwrap();
    assert_eq!(payload["ok"], true);

    let (_ws, connect) = server.await.unwrap();
    let params: ConnectParams = serde_json::from_value(connect.params.unwrap()).unwrap();
    assert!(params.device.unwrap().nonce.is_none());
}

#[tokio::test]
async fn disabled_device_identity_omits_device_block() {
    let (listener, url) = listen().await;
    let opts = ClientOptions {
        disable_device_identity: true,
        ..options(&url)
    };

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = read_request(&mut ws).await;
        respond_ok(&mut ws, &req.id, hello()).await;
        (ws, req)
    });
    let _client = GatewayConnector::new(opts)
        .device_identity(Arc::new(DeviceIdentity::generate()))
        .connect()
        .await
        .unwrap();

    let (_ws, req) = server.await.unwrap();
    let params = req.params.unwrap();
    assert!(params.get("device").is_none());
    assert!(params.get("auth").is_none());
}

#[tokio::test]
async fn rejected_handshake_fails_connect_and_closes_with_policy_code() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = read_request(&mut ws).await;
        send_frame(
            &mut ws,
            GatewayFrame::Response(ResponseFrame::err(
                &req.id,
                ErrorShape::new(error_codes::UNAUTHORIZED, "bad token"),
            )),
        )
        .await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    });

    let err = GatewayConnector::new(options(&url))
        .connect()
        .await
        .unwrap_err();
    match &err {
        Error::Handshake(shape) => assert_eq!(shape.code, error_codes::UNAUTHORIZED),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "bad token");

    let frame = server.await.unwrap().expect("close frame");
    assert_eq!(frame.code, CloseCode::Policy);
    assert_eq!(frame.reason.as_str(), "connect failed");
}

#[tokio::test]
async fn close_before_ack_fails_connect_with_close_details() {
    let (listener, url) = listen().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let req = read_request(&mut ws).await;
        assert_eq!(req.method, "connect");
        ws.close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "boom".into(),
        }))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let err = GatewayConnector::new(options(&url))
        .connect()
        .await
        .unwrap_err();
    match &err {
        Error::Closed { code, reason } => {
            assert_eq!(*code, 1011);
            assert_eq!(reason, "boom");
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "gateway closed (1011): boom");
    server.await.unwrap();
}

#[tokio::test]
async fn cookie_header_is_sent_on_upgrade() {
    let (listener, url) = listen().await;
    let seen = Arc::new(Mutex::new(None::<String>));
    let captured = Arc::clone(&seen);

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let cookie = req
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            *captured.lock().unwrap() = cookie;
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();
        let req = read_request(&mut ws).await;
        respond_ok(&mut ws, &req.id, hello()).await;
        ws
    });

    let opts = ClientOptions {
        cookie: Some(Secret::new("octoclaw_session=abc".into())),
        ..options(&url)
    };
    let _client = GatewayConnector::new(opts).connect().await.unwrap();
    let _ws = server.await.unwrap();

    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("octoclaw_session=abc")
    );
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn responses_are_matched_by_id_in_any_order() {
    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.request("config.get", None).await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.request("chat.history", Some(json!({ "limit": 1 }))).await }
    });

    let a = read_request(&mut ws).await;
    let b = read_request(&mut ws).await;
    // Answer in reverse arrival order, echoing the method name.
    respond_ok(&mut ws, &b.id, json!(b.method)).await;
    respond_ok(&mut ws, &a.id, json!(a.method)).await;

    assert_eq!(first.await.unwrap().unwrap(), "config.get");
    assert_eq!(second.await.unwrap().unwrap(), "chat.history");
}

#[tokio::test]
async fn junk_and_unknown_ids_do_not_disturb_the_connection() {
    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("status", None).await }
    });
    let req = read_request(&mut ws).await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"bogus"}"#.into()))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![0xff, 0xfe].into()))
        .await
        .unwrap();
    respond_ok(&mut ws, "ghost", json!("nobody asked")).await;
    respond_ok(&mut ws, &req.id, json!({ "status": "fine" })).await;

    assert_eq!(pending.await.unwrap().unwrap()["status"], "fine");
    assert_eq!(client.phase(), ConnectionPhase::Ready);
}

#[tokio::test]
async fn failed_response_surfaces_error_shape() {
    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("config.set", Some(json!({}))).await }
    });
    let req = read_request(&mut ws).await;
    let mut shape = ErrorShape::new(error_codes::INVALID_REQUEST, "baseHash mismatch");
    shape.details = Some(json!({ "expected": "abc" }));
    send_frame(&mut ws, GatewayFrame::Response(ResponseFrame::err(&req.id, shape))).await;

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "baseHash mismatch");
    let shape = err.error_shape().unwrap();
    assert_eq!(shape.code, error_codes::INVALID_REQUEST);
    assert_eq!(shape.details.as_ref().unwrap()["expected"], "abc");
}

#[tokio::test]
async fn typed_request_decodes_payload() {
    #[derive(serde::Deserialize)]
    struct Health {
        ok: bool,
        uptime: u64,
    }

    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request_typed::<Health>("health", None).await }
    });
    let req = read_request(&mut ws).await;
    respond_ok(&mut ws, &req.id, json!({ "ok": true, "uptime": 42 })).await;

    let health = pending.await.unwrap().unwrap();
    assert!(health.ok);
    assert_eq!(health.uptime, 42);
}

// ── Close semantics ──────────────────────────────────────────────────────────

#[tokio::test]
async fn remote_close_fails_every_pending_request() {
    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let requests: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|method| {
            let client = client.clone();
            tokio::spawn(async move { client.request(method, None).await })
        })
        .collect();
    read_request(&mut ws).await;
    read_request(&mut ws).await;

    ws.close(Some(CloseFrame {
        code: CloseCode::Away,
        reason: "going away".into(),
    }))
    .await
    .unwrap();

    for request in requests {
        let err = request.await.unwrap().unwrap_err();
        assert!(
            matches!(&err, Error::Closed { code: 1001, reason } if reason == "going away"),
            "unexpected error: {err:?}"
        );
    }

    let closure = client.closed().await;
    assert_eq!(closure, Closure::Remote {
        code: 1001,
        reason: "going away".into(),
    });
    assert_eq!(
        client.close_reason().as_deref(),
        Some("gateway closed (1001): going away")
    );

    // Requests after close fail immediately with the same cause.
    let err = client.request("late", None).await.unwrap_err();
    assert!(matches!(err, Error::Closed { code: 1001, .. }));
}

#[tokio::test]
async fn stop_closes_connection_and_rejects_new_requests() {
    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("slow", None).await }
    });
    read_request(&mut ws).await;

    client.stop();
    assert_eq!(client.closed().await, Closure::Stopped);
    assert_eq!(client.phase(), ConnectionPhase::Closed);
    assert!(matches!(pending.await.unwrap(), Err(Error::Stopped)));
    assert!(matches!(
        client.request("after", None).await,
        Err(Error::Stopped)
    ));

    // The gateway sees a close frame.
    let mut saw_close = false;
    while let Some(Ok(message)) = ws.next().await {
        if matches!(message, Message::Close(_)) {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close);
}

#[tokio::test]
async fn dropped_transport_fails_pending_requests() {
    let (listener, url) = listen().await;
    let (client, mut ws) = connected(GatewayConnector::new(options(&url)), listener).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request("x", None).await }
    });
    read_request(&mut ws).await;
    drop(ws);

    let err = pending.await.unwrap().unwrap_err();
    assert!(
        matches!(err, Error::ConnectionLost(_) | Error::Closed { .. }),
        "unexpected error: {err:?}"
    );
    assert!(client.is_closed());
}

// ── Events ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn events_are_forwarded_but_challenge_is_not() {
    let (listener, url) = listen().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (client, mut ws) = connected(
        GatewayConnector::new(options(&url)).event_listener(tx),
        listener,
    )
    .await;

    send_event(&mut ws, "connect.challenge", json!({ "nonce": "n2" })).await;
    send_event(&mut ws, "tick", json!({ "ts": 1 })).await;
    send_event(&mut ws, "presence", json!({ "online": 2 })).await;

    let first = rx.recv().await.unwrap();
    assert_eq!(first.event, "tick");
    assert_eq!(first.payload.unwrap()["ts"], 1);
    assert_eq!(rx.recv().await.unwrap().event, "presence");

    // Replacing the listener redirects later events.
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    client.set_event_listener(Some(tx2));
    // Round-trip a request so the listener swap is processed first.
    let ping = tokio::spawn({
        let client = client.clone();
        async move { client.request("ping", None).await }
    });
    let req = read_request(&mut ws).await;
    respond_ok(&mut ws, &req.id, json!(null)).await;
    ping.await.unwrap().unwrap();

    send_event(&mut ws, "chat", json!({ "state": "final" })).await;
    assert_eq!(rx2.recv().await.unwrap().event, "chat");
    assert!(rx.try_recv().is_err());
}
