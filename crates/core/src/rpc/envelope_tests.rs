// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn reply_carries_done_and_no_error() {
    let env = Envelope::reply("r1", "server", "req1", serde_json::json!({"ok": true}));
    assert_eq!(env.reqid.as_deref(), Some("req1"));
    assert!(env.is_done());
    assert!(env.error.is_none());
}

#[test]
fn error_reply_never_sets_done() {
    let env = Envelope::error_reply("r1", "server", Some("req1"), "boom");
    assert_eq!(env.error.as_deref(), Some("boom"));
    assert!(!env.is_done());
}

#[test]
fn cancel_requires_reqid() {
    let mut env = Envelope { cancel: Some(true), source: "c".into(), route: "r".into(), ..Default::default() };
    assert!(!env.is_cancel());
    env.reqid = Some("req1".into());
    assert!(env.is_cancel());
}

#[test]
fn ws_frame_rpc_roundtrips_through_json() {
    let frame = WsFrame::Rpc {
        ts: 123,
        data: Envelope::reply("r1", "server", "req1", serde_json::json!(42)),
    };
    let text = serde_json::to_string(&frame).unwrap();
    assert!(text.contains("\"type\":\"rpc\""));
    let back: WsFrame = serde_json::from_str(&text).unwrap();
    match back {
        WsFrame::Rpc { ts, data } => {
            assert_eq!(ts, 123);
            assert_eq!(data.reqid.as_deref(), Some("req1"));
        }
        _ => panic!("expected Rpc frame"),
    }
}

#[test]
fn ws_frame_ping_pong_roundtrip() {
    let text = serde_json::to_string(&WsFrame::Ping { ts: 1 }).unwrap();
    assert_eq!(text, r#"{"type":"ping","ts":1}"#);
    let back: WsFrame = serde_json::from_str(r#"{"type":"pong","ts":2}"#).unwrap();
    assert!(matches!(back, WsFrame::Pong { ts: 2 }));
}
