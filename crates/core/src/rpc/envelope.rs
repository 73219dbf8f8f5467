// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The symmetric RPC message envelope carried over WebSocket text frames
//! (wrapped as `{type:"rpc", ts, data:<envelope>}`) and over the internal
//! broker/router channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One RPC envelope. Every field but `source` and `route` is optional since
/// the same struct carries all four call shapes plus pub/sub-free plumbing
/// (cancel) and plain notifies.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reqid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commanddata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel: Option<bool>,
    pub source: String,
    pub route: String,
}

impl Envelope {
    pub fn is_cancel(&self) -> bool {
        self.cancel.unwrap_or(false) && self.reqid.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }

    /// Build a single-response `Call`-shape reply: `response` + `done=true`.
    pub fn reply(route: &str, source: &str, reqid: &str, response: Value) -> Self {
        Self {
            reqid: Some(reqid.to_owned()),
            response: Some(response),
            done: Some(true),
            source: source.to_owned(),
            route: route.to_owned(),
            ..Default::default()
        }
    }

    /// Build one element of a `ResponseStream`/`RequestResponseStream` reply,
    /// not yet terminal.
    pub fn stream_item(route: &str, source: &str, reqid: &str, response: Value) -> Self {
        Self {
            reqid: Some(reqid.to_owned()),
            response: Some(response),
            source: source.to_owned(),
            route: route.to_owned(),
            ..Default::default()
        }
    }

    /// Terminal `done=true` marker with no payload, closing a response stream.
    pub fn stream_done(route: &str, source: &str, reqid: &str) -> Self {
        Self {
            reqid: Some(reqid.to_owned()),
            done: Some(true),
            source: source.to_owned(),
            route: route.to_owned(),
            ..Default::default()
        }
    }

    /// Build an error reply. Per §8, a reqid that receives an error never
    /// also receives a `done=true` response.
    pub fn error_reply(route: &str, source: &str, reqid: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            reqid: reqid.map(str::to_owned),
            error: Some(message.into()),
            source: source.to_owned(),
            route: route.to_owned(),
            ..Default::default()
        }
    }
}

/// The outer frame wrapping RPC envelopes (and ping/pong) over a WS text
/// frame, per §4.9/§6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsFrame {
    Rpc { ts: i64, data: Envelope },
    Ping { ts: i64 },
    Pong { ts: i64 },
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
