// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The declarative query method table: request/response types for each RPC
//! method in §4.8, plus the dispatcher that turns an inbound [`Envelope`]
//! into zero or more outbound envelopes. Dispatch is a `match` over the
//! envelope's `command` string; this module mandates the *behavior* of the
//! method table, not a code generator for client stubs (§4.7).
//!
//! Grounded in the teacher's `transport/ws.rs` request/reply loop, reshaped
//! from a fixed `ClientMessage` enum to an open command-string dispatch
//! table, since the spec's RPC fabric is itself the generic layer the
//! teacher's fixed enum would otherwise have been hand-specialized for.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::peer::goroutine::ParsedGoRoutine;
use crate::peer::log::LogLine;
use crate::peer::registry::PeerRegistry;
use crate::peer::stats::{AlignedSample, RuntimeStatsInfo};
use crate::peer::watch::WatchSample;
use crate::peer::AppRunInfo;
use crate::rpc::broker::Broker;
use crate::rpc::envelope::Envelope;
use crate::rpc::router::Router;
use crate::rpc::widget::WidgetStore;

/// A method failure, tagged with the §7 error kind it maps to. Reported to
/// callers as a single `"{CODE}: {message}"` string in the envelope's
/// `error` field — the fabric's error field is a flat string, but the code
/// prefix keeps it machine-parseable without inventing a richer envelope.
struct MethodError {
    code: ErrorCode,
    message: String,
}

impl MethodError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }
}

impl std::fmt::Display for MethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

type MethodResult = Result<Value, MethodError>;

/// Shared dependencies every query method reads from. Cloned cheaply (all
/// fields are `Arc`s) and handed to each dispatch call.
#[derive(Clone)]
pub struct MethodContext {
    pub registry: Arc<PeerRegistry>,
    pub widgets: Arc<WidgetStore>,
    pub router: Arc<Router>,
    pub broker: Arc<Broker>,
}

// -- Request/response wire types, one pair per method in §4.8 ---------------

#[derive(Debug, Deserialize)]
pub struct GetAppRunLogsRequest {
    pub apprunid: String,
}

#[derive(Debug, Serialize)]
pub struct GetAppRunLogsResponse {
    pub lines: Vec<LogLine>,
}

#[derive(Debug, Deserialize)]
pub struct LogSearchRequest {
    pub widgetid: String,
    pub apprunid: String,
    #[serde(default)]
    pub searchterm: String,
    pub pagesize: usize,
    pub requestpages: Vec<i64>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct LogSearchPage {
    pub pagenum: i64,
    pub lines: Vec<LogLine>,
}

#[derive(Debug, Serialize, Default)]
pub struct LogSearchResponse {
    pub totalcount: u64,
    pub filteredcount: u64,
    pub pages: Vec<LogSearchPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogWidgetAdminRequest {
    pub widgetid: String,
    #[serde(default)]
    pub keepalive: bool,
    #[serde(default)]
    pub drop: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogUpdateMarkedLinesRequest {
    pub widgetid: String,
    #[serde(default)]
    pub markedlines: HashMap<String, bool>,
    #[serde(default)]
    pub clear: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogGetMarkedLinesRequest {
    pub widgetid: String,
}

#[derive(Debug, Serialize)]
pub struct LogGetMarkedLinesResponse {
    pub lines: Vec<LogLine>,
}

#[derive(Debug, Deserialize)]
pub struct GetAppRunGoroutinesRequest {
    pub apprunid: String,
    #[serde(default, rename = "sinceversion")]
    pub since_version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GetAppRunGoroutinesResponse {
    pub goroutines: Vec<ParsedGoRoutine>,
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct GetAppRunWatchesRequest {
    pub apprunid: String,
    #[serde(default, rename = "sinceversion")]
    pub since_version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct GetAppRunWatchesResponse {
    pub watches: Vec<WatchSample>,
    pub version: u64,
}

#[derive(Debug, Deserialize)]
pub struct GetAppRunRuntimeStatsRequest {
    pub apprunid: String,
}

#[derive(Debug, Serialize)]
pub struct GetAppRunRuntimeStatsResponse {
    pub latest: Option<RuntimeStatsInfo>,
    pub timeseries: Vec<RuntimeStatsInfo>,
    /// The same window expressed on the aligner's 1s logical grid, with
    /// gaps filled by synthetic timestamps (§4.3, §4.8).
    pub aligned: Vec<AlignedSample>,
}

// -- Dispatch -----------------------------------------------------------------

/// Run one query method to completion, returning the response envelopes to
/// emit. Notify-shaped calls (no `reqid`) never produce a reply. Streaming
/// `LogSearchRequest` calls spawn a background task pushing further page
/// updates through `ctx.router` and return only the initial page(s); the
/// caller is responsible for cancelling that task when a `cancel` envelope
/// arrives for the same `(route, reqid)`.
pub async fn dispatch(
    ctx: &MethodContext,
    route_id: &str,
    source: &str,
    envelope: &Envelope,
    cancel: CancellationToken,
) -> Vec<Envelope> {
    let Some(command) = envelope.command.as_deref() else {
        return Vec::new();
    };
    let reqid = envelope.reqid.clone();
    let data = envelope.commanddata.clone().unwrap_or(Value::Null);

    let result = match command {
        "ListAppRuns" => list_app_runs(ctx),
        "GetAppRunLogs" => get_app_run_logs(ctx, data),
        "LogSearchRequest" => {
            return log_search_request(ctx, route_id, source, reqid, data, cancel).await;
        }
        "LogWidgetAdmin" => log_widget_admin(ctx, data),
        "LogUpdateMarkedLines" => log_update_marked_lines(ctx, data),
        "LogGetMarkedLines" => log_get_marked_lines(ctx, data),
        "GetAppRunGoroutines" => get_app_run_goroutines(ctx, data),
        "GetAppRunWatches" => get_app_run_watches(ctx, data),
        "GetAppRunRuntimeStats" => get_app_run_runtime_stats(ctx, data),
        other => Err(MethodError::new(ErrorCode::UnknownCommand, format!("unknown command {other:?}"))),
    };

    let Some(reqid) = reqid else {
        // Notify shape: log dispatch errors, never reply.
        if let Err(e) = result {
            tracing::debug!("notify {command} failed: {e}");
        }
        return Vec::new();
    };

    match result {
        Ok(value) => vec![Envelope::reply(route_id, source, &reqid, value)],
        Err(e) => vec![Envelope::error_reply(route_id, source, Some(&reqid), e.to_string())],
    }
}

fn list_app_runs(ctx: &MethodContext) -> MethodResult {
    let mut infos: Vec<AppRunInfo> = ctx.registry.list().iter().map(|p| p.to_app_run_info()).collect();
    infos.sort_by(|a, b| b.starttime.cmp(&a.starttime));
    serde_json::to_value(infos).map_err(|e| MethodError::new(ErrorCode::Internal, e.to_string()))
}

fn get_app_run_logs(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: GetAppRunLogsRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    let peer = ctx.registry.get(&req.apprunid).ok_or_else(|| MethodError::not_found("apprun not found"))?;
    let resp = GetAppRunLogsResponse { lines: peer.logs.snapshot() };
    serde_json::to_value(resp).map_err(|e| MethodError::new(ErrorCode::Internal, e.to_string()))
}

/// Compute (or reuse the cached) filtered line numbers for `widgetid`,
/// returning `(filter_is_valid, total_count, filtered_line_nums)`.
fn compute_filtered(ctx: &MethodContext, widgetid: &str, apprunid: &str, searchterm: &str, peer: &crate::peer::AppRunPeer) -> (bool, u64, Vec<u64>) {
    let filter = ctx.widgets.ensure_filter(widgetid, apprunid, searchterm);
    let total_count = peer.logs.total_count();
    if !filter.is_valid() {
        return (false, total_count, Vec::new());
    }
    if let Some(cached) = ctx.widgets.cached_filtered(widgetid, total_count) {
        return (true, total_count, cached);
    }
    let matched: Vec<u64> = peer.logs.search(&filter).into_iter().map(|l| l.line_num).collect();
    ctx.widgets.store_filtered(widgetid, matched.clone(), total_count);
    (true, total_count, matched)
}

fn build_pages(peer: &crate::peer::AppRunPeer, filtered: &[u64], pagesize: usize, requestpages: &[i64]) -> Vec<LogSearchPage> {
    if pagesize == 0 {
        return Vec::new();
    }
    let page_count = filtered.len().div_ceil(pagesize).max(1);
    requestpages
        .iter()
        .map(|&raw| {
            let resolved = if raw < 0 { (page_count - 1) as i64 } else { raw };
            let start = (resolved.max(0) as usize) * pagesize;
            let end = (start + pagesize).min(filtered.len());
            let lines = if start < filtered.len() {
                filtered[start..end].iter().filter_map(|&ln| peer.logs.get_line(ln)).collect()
            } else {
                Vec::new()
            };
            LogSearchPage { pagenum: resolved, lines }
        })
        .collect()
}

async fn log_search_request(
    ctx: &MethodContext,
    route_id: &str,
    source: &str,
    reqid: Option<String>,
    data: Value,
    cancel: CancellationToken,
) -> Vec<Envelope> {
    let req: LogSearchRequest = match serde_json::from_value(data) {
        Ok(r) => r,
        Err(e) => {
            let err = MethodError::bad_request(e.to_string());
            return reqid
                .map(|r| vec![Envelope::error_reply(route_id, source, Some(&r), err.to_string())])
                .unwrap_or_default();
        }
    };
    let Some(reqid) = reqid else { return Vec::new() };

    let Some(peer) = ctx.registry.get(&req.apprunid) else {
        let err = MethodError::not_found("apprun not found");
        return vec![Envelope::error_reply(route_id, source, Some(&reqid), err.to_string())];
    };

    let (valid, total_count, filtered) =
        compute_filtered(ctx, &req.widgetid, &req.apprunid, &req.searchterm, &peer);
    let response = if !valid {
        LogSearchResponse { totalcount: total_count, filteredcount: 0, pages: Vec::new(), error: Some("invalid search expression".to_owned()) }
    } else {
        let pages = build_pages(&peer, &filtered, req.pagesize, &req.requestpages);
        LogSearchResponse { totalcount: total_count, filteredcount: filtered.len() as u64, pages, error: None }
    };

    let Ok(value) = serde_json::to_value(&response) else {
        let err = MethodError::new(ErrorCode::Internal, "encode error");
        return vec![Envelope::error_reply(route_id, source, Some(&reqid), err.to_string())];
    };

    if !req.stream {
        return vec![Envelope::reply(route_id, source, &reqid, value)];
    }

    // Streaming: emit the initial page(s) as a non-terminal stream item, then
    // spawn a task that re-runs the search on every `log:update` for this
    // apprunid and pushes further (non-terminal) updates until cancelled.
    let first = vec![Envelope::stream_item(route_id, source, &reqid, value)];
    spawn_log_stream(ctx.clone(), route_id.to_owned(), source.to_owned(), reqid, req, cancel);
    first
}

fn spawn_log_stream(ctx: MethodContext, route_id: String, source: String, reqid: String, req: LogSearchRequest, cancel: CancellationToken) {
    let internal_route = format!("__logstream:{route_id}:{reqid}");
    let proxy = ctx.router.register(&internal_route, false);
    ctx.broker.subscribe(&internal_route, "log:update", Some(&req.apprunid), false, false);
    let mut outbound_rx = proxy.outbound_rx;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = outbound_rx.recv() => {
                    if msg.is_none() {
                        break;
                    }
                    let Some(peer) = ctx.registry.get(&req.apprunid) else { break };
                    let (valid, total_count, filtered) =
                        compute_filtered(&ctx, &req.widgetid, &req.apprunid, &req.searchterm, &peer);
                    let response = if !valid {
                        LogSearchResponse { totalcount: total_count, filteredcount: 0, pages: Vec::new(), error: Some("invalid search expression".to_owned()) }
                    } else {
                        let pages = build_pages(&peer, &filtered, req.pagesize, &req.requestpages);
                        LogSearchResponse { totalcount: total_count, filteredcount: filtered.len() as u64, pages, error: None }
                    };
                    let Ok(value) = serde_json::to_value(&response) else { continue };
                    let item = Envelope::stream_item(&route_id, &source, &reqid, value);
                    if ctx.router.send(item).is_err() {
                        break;
                    }
                }
            }
        }
        let done = Envelope::stream_done(&route_id, &source, &reqid);
        let _ = ctx.router.send(done);
        ctx.router.unregister(&internal_route);
    });
}

fn log_widget_admin(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: LogWidgetAdminRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    if req.drop {
        ctx.widgets.drop_widget(&req.widgetid);
    } else if req.keepalive {
        ctx.widgets.keepalive(&req.widgetid);
    }
    Ok(Value::Object(Default::default()))
}

fn log_update_marked_lines(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: LogUpdateMarkedLinesRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    let apprunid = ctx.widgets.apprunid_of(&req.widgetid).ok_or_else(|| MethodError::not_found("widget not found"))?;
    let peer = ctx.registry.get(&apprunid).ok_or_else(|| MethodError::not_found("apprun not found"))?;
    let diff: HashMap<u64, bool> = req
        .markedlines
        .into_iter()
        .filter_map(|(k, v)| k.parse::<u64>().ok().map(|n| (n, v)))
        .collect();
    peer.marked_lines.update(&req.widgetid, &diff, req.clear);
    Ok(Value::Object(Default::default()))
}

fn log_get_marked_lines(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: LogGetMarkedLinesRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    let apprunid = ctx.widgets.apprunid_of(&req.widgetid).ok_or_else(|| MethodError::not_found("widget not found"))?;
    let peer = ctx.registry.get(&apprunid).ok_or_else(|| MethodError::not_found("apprun not found"))?;
    let mut line_nums: Vec<u64> = peer.marked_lines.get(&req.widgetid).into_iter().collect();
    line_nums.sort_unstable();
    let lines = line_nums.into_iter().filter_map(|n| peer.logs.get_line(n)).collect();
    serde_json::to_value(LogGetMarkedLinesResponse { lines }).map_err(|e| MethodError::new(ErrorCode::Internal, e.to_string()))
}

fn get_app_run_goroutines(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: GetAppRunGoroutinesRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    let peer = ctx.registry.get(&req.apprunid).ok_or_else(|| MethodError::not_found("apprun not found"))?;
    let (delta, version) = peer.goroutines.get_since(req.since_version.unwrap_or(0));
    let goroutines = delta.into_iter().map(|(_, v)| v).collect();
    serde_json::to_value(GetAppRunGoroutinesResponse { goroutines, version }).map_err(|e| MethodError::new(ErrorCode::Internal, e.to_string()))
}

fn get_app_run_watches(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: GetAppRunWatchesRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    let peer = ctx.registry.get(&req.apprunid).ok_or_else(|| MethodError::not_found("apprun not found"))?;
    let (delta, version) = peer.watches.get_since(req.since_version.unwrap_or(0));
    let watches = delta.into_iter().map(|(_, v)| v).collect();
    serde_json::to_value(GetAppRunWatchesResponse { watches, version }).map_err(|e| MethodError::new(ErrorCode::Internal, e.to_string()))
}

fn get_app_run_runtime_stats(ctx: &MethodContext, data: Value) -> MethodResult {
    let req: GetAppRunRuntimeStatsRequest = serde_json::from_value(data).map_err(|e| MethodError::bad_request(e.to_string()))?;
    let peer = ctx.registry.get(&req.apprunid).ok_or_else(|| MethodError::not_found("apprun not found"))?;
    let latest = peer.stats.latest();
    let timeseries = peer.stats.snapshot();
    let aligned = peer.stats.aligned_window();
    serde_json::to_value(GetAppRunRuntimeStatsResponse { latest, timeseries, aligned }).map_err(|e| MethodError::new(ErrorCode::Internal, e.to_string()))
}

#[cfg(test)]
#[path = "methods_tests.rs"]
mod tests;
