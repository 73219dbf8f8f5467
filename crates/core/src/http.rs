// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The HTTP/WebSocket surface (§4.9): `GET /api/health`, `GET /api/status`,
//! and the `/ws?routeid=<id>` upgrade that carries the RPC fabric.
//!
//! Grounded in the teacher's `transport/mod.rs::build_router` for the route
//! table/CORS layer shape and `transport/ws.rs` for the per-connection
//! ping/pong and read-deadline loop, generalized from a fixed
//! `ClientMessage`/`ServerMessage` pair to the open envelope dispatch in
//! [`crate::rpc::methods`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::ErrorCode;
use crate::peer::{now_ms, AppRunInfo};
use crate::rpc::envelope::{Envelope, WsFrame};
use crate::rpc::methods::{self, MethodContext};

const PING_INITIAL: Duration = Duration::from_secs(1);
const PING_STEADY: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(15);
const CLOSE_QUIESCE: Duration = Duration::from_secs(1);
/// Outbound WS messages larger than this are dropped rather than sent (§5).
const MAX_OUTBOUND_WS_BYTES: usize = 5 * 1024 * 1024;
/// Per-route bound on concurrently executing inbound RPC dispatches; beyond
/// this a burst of calls queues for a free slot instead of each getting an
/// unbounded spawned task right away.
const DISPATCH_WORKERS: usize = 8;
/// Control-frame channel (pong replies) depth; pings are infrequent and
/// replied to promptly, so this never needs much headroom.
const CONTROL_CAPACITY: usize = 8;

/// Everything an HTTP/WS handler needs, shared behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub ctx: MethodContext,
    pub start_ts: i64,
    pub version: &'static str,
}

/// Build the process's axum `Router`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok", time: now_ms() })
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    time: i64,
    hasconnections: bool,
    appruns: Vec<AppRunInfo>,
    version: &'static str,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let appruns: Vec<AppRunInfo> = state.ctx.registry.list().iter().map(|p| p.to_app_run_info()).collect();
    let hasconnections = appruns.iter().any(|a| a.isrunning);
    Json(StatusResponse { status: "ok", time: now_ms(), hasconnections, appruns, version: state.version })
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    routeid: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(routeid) = query.routeid.filter(|r| !r.is_empty()) else {
        return ErrorCode::BadRequest.to_http_response("missing routeid query parameter").into_response();
    };
    ws.on_upgrade(move |socket| handle_connection(state, routeid, socket)).into_response()
}

/// One WS connection: a dedicated send task owns the socket's write half and
/// drains the route's outbound channel plus ping/pong control frames, while
/// this task reads inbound frames, resets the 15s idle deadline, and
/// dispatches each RPC envelope onto a bounded worker pool rather than
/// awaiting it inline — a slow method body or a backed-up socket write can
/// no longer stall reading (and thus cancelling) the next request.
async fn handle_connection(state: AppState, route_id: String, socket: WebSocket) {
    let proxy = state.ctx.router.register(&route_id, false);
    let outbound_rx = proxy.outbound_rx;
    let (ws_tx, mut ws_rx) = socket.split();

    let conn_cancel = CancellationToken::new();
    let inflight: Arc<Mutex<HashMap<String, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));
    let dispatch_permits = Arc::new(Semaphore::new(DISPATCH_WORKERS));
    let (ctrl_tx, ctrl_rx) = mpsc::channel(CONTROL_CAPACITY);

    let sender_route_id = route_id.clone();
    let sender_task = tokio::spawn(run_sender(ws_tx, outbound_rx, ctrl_rx, sender_route_id));

    let mut read_deadline = Box::pin(tokio::time::sleep(READ_DEADLINE));

    loop {
        tokio::select! {
            _ = &mut read_deadline => {
                tracing::debug!("ws route {route_id} idle past read deadline, closing");
                break;
            }
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                read_deadline.as_mut().reset(Instant::now() + READ_DEADLINE);
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<WsFrame>(&text) {
                            Ok(WsFrame::Ping { .. }) => {
                                if ctrl_tx.send(WsFrame::Pong { ts: now_ms() }).await.is_err() {
                                    break;
                                }
                            }
                            Ok(WsFrame::Pong { .. }) => {}
                            Ok(WsFrame::Rpc { data, .. }) => {
                                dispatch_inbound(
                                    state.ctx.clone(),
                                    route_id.clone(),
                                    Arc::clone(&inflight),
                                    Arc::clone(&dispatch_permits),
                                    conn_cancel.clone(),
                                    data,
                                );
                            }
                            Err(e) => tracing::debug!("malformed ws frame on route {route_id}: {e}"),
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    conn_cancel.cancel();
    state.ctx.router.unregister(&route_id);
    drop(ctrl_tx);
    if tokio::time::timeout(CLOSE_QUIESCE, sender_task).await.is_err() {
        tracing::debug!("ws route {route_id} send task still draining past close quiesce");
    }
}

/// Owns the socket's write half for one connection: drains `outbound_rx`
/// (the route's RPC replies/pushes) and `ctrl_rx` (pong replies), and drives
/// the ping cadence on its own timer. Exits once both channels are closed
/// and drained or a send fails.
async fn run_sender(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    mut ctrl_rx: mpsc::Receiver<WsFrame>,
    route_id: String,
) {
    let mut next_ping = Box::pin(tokio::time::sleep(PING_INITIAL));

    loop {
        tokio::select! {
            _ = &mut next_ping => {
                let frame = WsFrame::Ping { ts: now_ms() };
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
                next_ping.as_mut().reset(Instant::now() + PING_STEADY);
            }
            ctrl = ctrl_rx.recv() => {
                let Some(frame) = ctrl else { break };
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
            }
            outgoing = outbound_rx.recv() => {
                let Some(envelope) = outgoing else { break };
                let frame = WsFrame::Rpc { ts: now_ms(), data: envelope };
                match serde_json::to_string(&frame) {
                    Ok(text) if text.len() > MAX_OUTBOUND_WS_BYTES => {
                        tracing::warn!(
                            "ws route {route_id} dropped oversized outbound message ({} bytes > {} limit)",
                            text.len(),
                            MAX_OUTBOUND_WS_BYTES,
                        );
                    }
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::debug!("ws route {route_id} failed to encode outbound frame: {e}"),
                }
            }
        }
    }
}

/// Handle one inbound RPC envelope without blocking the read loop: a cancel
/// envelope is resolved against `inflight` immediately, everything else is
/// spawned onto its own task gated by `permits` so at most
/// [`DISPATCH_WORKERS`] dispatches run concurrently per route while still
/// letting the caller go back to reading (and so cancelling) right away.
fn dispatch_inbound(
    ctx: MethodContext,
    route_id: String,
    inflight: Arc<Mutex<HashMap<String, CancellationToken>>>,
    permits: Arc<Semaphore>,
    conn_cancel: CancellationToken,
    envelope: Envelope,
) {
    if envelope.is_cancel() {
        if let Some(reqid) = &envelope.reqid {
            if let Some(token) = inflight.lock().remove(reqid) {
                token.cancel();
            }
        }
        return;
    }

    let cancel = conn_cancel.child_token();
    if let Some(reqid) = envelope.reqid.clone() {
        inflight.lock().insert(reqid, cancel.clone());
    }

    tokio::spawn(async move {
        let Ok(_permit) = permits.acquire_owned().await else { return };
        let source = envelope.source.clone();
        let replies = methods::dispatch(&ctx, &route_id, &source, &envelope, cancel).await;
        for reply in replies {
            if ctx.router.send(reply).is_err() {
                tracing::debug!("dropped reply for unregistered route {route_id}");
            }
        }
        if let Some(reqid) = &envelope.reqid {
            inflight.lock().remove(reqid);
        }
    });
}

async fn send_frame<S>(tx: &mut S, frame: &WsFrame) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
