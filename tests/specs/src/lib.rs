// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end ingest/query core tests.
//!
//! Wires up the real connection multiplexer, ingest handler, and HTTP/WS
//! surface against an ephemeral TCP port in-process, then exposes raw
//! TCP/WS helpers so integration tests exercise the wire protocols exactly
//! as a target process or browser UI would.

use std::sync::Arc;

use axum::serve::Listener;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use outrig_core::http::{self, AppState};
use outrig_core::ingest::{self, PeerEventNotifier};
use outrig_core::mux;
use outrig_core::peer::registry::PeerRegistry;
use outrig_core::peer::PeerLimits;
use outrig_core::rpc::methods::MethodContext;
use outrig_core::rpc::{Broker, Router as RpcRouter, WidgetStore};

struct BrokerNotifier {
    broker: Arc<Broker>,
}

impl PeerEventNotifier for BrokerNotifier {
    fn notify_status_update(&self, apprunid: &str) {
        self.broker.publish("app:statusupdate", Some(vec![apprunid.to_owned()]), None, None, None);
    }

    fn notify_log_update(&self, apprunid: &str) {
        self.broker.publish("log:update", Some(vec![apprunid.to_owned()]), None, None, None);
    }
}

/// A full ingest/query core, wired up against an ephemeral `127.0.0.1` port
/// for the duration of one test. Dropping it cancels every background task.
pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub ctx: MethodContext,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl TestServer {
    pub async fn start() -> Self {
        let shutdown = CancellationToken::new();
        let limits = PeerLimits { log_capacity: 100_000, goroutine_capacity_hint: 64, stats_capacity: 3600 };
        let registry = Arc::new(PeerRegistry::new(limits));
        let broker = Arc::new(Broker::new());
        let router = Arc::new(RpcRouter::new(Arc::clone(&broker)));
        let widgets = Arc::new(WidgetStore::new());
        let notifier = Arc::new(BrokerNotifier { broker: Arc::clone(&broker) });

        let mux_handles = mux::spawn("127.0.0.1:0", shutdown.clone()).await.expect("bind mux");
        let addr = mux_handles.http.local_addr().expect("local addr");

        let mut ingest_rx = mux_handles.ingest;
        {
            let registry = Arc::clone(&registry);
            let notifier = Arc::clone(&notifier);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                while let Some((stream, _addr)) = ingest_rx.recv().await {
                    let registry = Arc::clone(&registry);
                    let notifier = Arc::clone(&notifier);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        ingest::serve(stream, &registry, notifier.as_ref(), shutdown).await;
                    });
                }
            });
        }

        let ctx = MethodContext { registry: Arc::clone(&registry), widgets, router, broker };
        let state = AppState { ctx: ctx.clone(), start_ts: outrig_core::peer::now_ms(), version: "test" };
        let http_router = http::build_router(state);
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(mux_handles.http, http_router).with_graceful_shutdown(sd.cancelled_owned()).await;
        });

        // Give the accept loop a moment to be scheduled before the first connect.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        Self { addr, ctx, shutdown }
    }

    /// Open a new ingest connection and write its handshake line.
    pub async fn open_ingest(&self, handshake: Value) -> TcpStream {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect ingest");
        let mut line = serde_json::to_string(&handshake).expect("encode handshake");
        line.push('\n');
        stream.write_all(line.as_bytes()).await.expect("write handshake");
        stream
    }

    /// Make a raw HTTP/1.1 GET over the multiplexer's HTTP sub-channel,
    /// returning the decoded JSON body.
    pub async fn http_get(&self, path: &str) -> Value {
        let mut stream = TcpStream::connect(self.addr).await.expect("connect http");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write request");
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.expect("read response");
        let text = String::from_utf8_lossy(&raw);
        let body_start = text.find("\r\n\r\n").expect("header/body split") + 4;
        let body = text[body_start..].trim();
        serde_json::from_str(body).expect("parse json body")
    }

    /// Open a WebSocket connection to `/ws?routeid=<route_id>`.
    pub async fn connect_ws(&self, route_id: &str) -> WsClient {
        let url = format!("ws://{}/ws?routeid={route_id}", self.addr);
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await.expect("ws connect");
        WsClient { ws }
    }
}

/// Send one newline-terminated raw line over an already-open ingest
/// connection (packet-mode JSON body, or log-mode raw text).
pub async fn send_line(stream: &mut TcpStream, line: &str) {
    let mut buf = line.to_owned();
    buf.push('\n');
    stream.write_all(buf.as_bytes()).await.expect("write line");
}

/// A UI-side WebSocket client speaking the RPC fabric's `{type:"rpc", ts,
/// data}` frame wrapper, answering server pings along the way.
pub struct WsClient {
    ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send a `Call`-shaped RPC request without waiting for its reply.
    /// Used when a request's reply is expected to never arrive (e.g. an
    /// outbound message over the server's size cap, silently dropped).
    pub async fn send_call(&mut self, route_id: &str, reqid: &str, command: &str, data: Value) {
        let envelope = json!({
            "reqid": reqid,
            "command": command,
            "commanddata": data,
            "source": "test",
            "route": route_id,
        });
        let frame = json!({"type": "rpc", "ts": 0, "data": envelope});
        self.ws.send(Message::Text(frame.to_string().into())).await.expect("send rpc");
    }

    /// Send a `Call`-shaped RPC request and wait for the envelope whose
    /// `reqid` matches, answering any `ping` frames received in the
    /// meantime.
    pub async fn call(&mut self, route_id: &str, reqid: &str, command: &str, data: Value) -> Value {
        self.send_call(route_id, reqid, command, data).await;
        loop {
            let msg = self.next_rpc().await;
            if msg["reqid"] == reqid {
                return msg;
            }
        }
    }

    /// Read frames until the next one is an `rpc` frame, responding to any
    /// server `ping` with a `pong` along the way, and return its envelope.
    pub async fn next_rpc(&mut self) -> Value {
        loop {
            let msg = self.ws.next().await.expect("ws stream open").expect("ws frame");
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(&text.to_string()).expect("parse frame");
            match frame["type"].as_str() {
                Some("ping") => {
                    let pong = json!({"type": "pong", "ts": 0});
                    self.ws.send(Message::Text(pong.to_string().into())).await.expect("send pong");
                }
                Some("rpc") => return frame["data"].clone(),
                _ => {}
            }
        }
    }
}
