// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box end-to-end tests driving the real TCP multiplexer, ingest
//! handler, and HTTP/WS surface together, covering the literal scenarios
//! enumerated in the ingest/query core's specification.

use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncReadExt;

use outrig_specs::{send_line, TestServer};

#[tokio::test]
async fn scenario_log_ingest_and_search() {
    let server = TestServer::start().await;
    let mut ingest = server
        .open_ingest(json!({"mode": "log", "submode": "stdout", "apprunid": "A", "webserverport": 0}))
        .await;
    send_line(&mut ingest, "hello").await;
    send_line(&mut ingest, "world").await;
    send_line(&mut ingest, "hello again").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = server.connect_ws("ui1").await;
    let resp = ws
        .call(
            "ui1",
            "r1",
            "LogSearchRequest",
            json!({"widgetid": "W", "apprunid": "A", "searchterm": "hello", "pagesize": 100, "requestpages": [0]}),
        )
        .await;

    assert_eq!(resp["done"], true);
    let response = &resp["response"];
    assert_eq!(response["totalcount"], 3);
    assert_eq!(response["filteredcount"], 2);
    let lines = response["pages"][0]["lines"].as_array().expect("lines array");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["line_num"], 0);
    assert_eq!(lines[0]["msg"], "hello");
    assert_eq!(lines[0]["source"], "stdout");
    assert_eq!(lines[1]["line_num"], 2);
    assert_eq!(lines[1]["msg"], "hello again");

    drop(ingest);
}

#[tokio::test]
async fn scenario_disconnected_vs_done() {
    let server = TestServer::start().await;

    let mut ingest = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "B", "webserverport": 0}))
        .await;
    send_line(&mut ingest, &json!({"type": "appinfo", "data": {"appname": "svc-b"}}).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(ingest);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = server.http_get("/api/status").await;
    let appruns = status["appruns"].as_array().expect("appruns array");
    let b = appruns.iter().find(|a| a["apprunid"] == "B").expect("apprun B present");
    assert_eq!(b["isrunning"], false);
    let peer = server.ctx.registry.get("B").expect("peer B exists");
    assert_eq!(peer.status(), outrig_core::peer::PeerStatus::Disconnected);

    let mut ingest2 = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "B", "webserverport": 0}))
        .await;
    send_line(&mut ingest2, &json!({"type": "appdone"}).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(ingest2);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(peer.status(), outrig_core::peer::PeerStatus::Done);

    // `done` is terminal; a further disconnect on the same apprunid must
    // not flip status back.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.status(), outrig_core::peer::PeerStatus::Done);
}

#[tokio::test]
async fn scenario_goroutine_versioned_delta() {
    let server = TestServer::start().await;
    let mut ingest = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "C", "webserverport": 0}))
        .await;
    send_line(
        &mut ingest,
        &json!({"type": "appinfo", "data": {"appname": "svc-c", "module": "example.com/svc"}}).to_string(),
    )
    .await;

    let dump = "goroutine 1 [running]:\nmain.worker()\n\t/src/example.com/svc/main.go:10 +0x20\n\n\
                goroutine 2 [select]:\nmain.idle()\n\t/src/example.com/svc/main.go:20 +0x30\n\n\
                goroutine 3 [chan receive]:\nmain.reader()\n\t/src/example.com/svc/main.go:30 +0x40\n";
    send_line(&mut ingest, &json!({"type": "goroutine", "data": {"dump": dump}}).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = server.connect_ws("ui-c").await;
    let first =
        ws.call("ui-c", "r1", "GetAppRunGoroutines", json!({"apprunid": "C", "sinceversion": 0})).await;
    let first_goroutines = first["response"]["goroutines"].as_array().expect("goroutines array");
    assert_eq!(first_goroutines.len(), 3);
    let v1 = first["response"]["version"].as_u64().expect("version");
    assert!(v1 > 0);

    let dump2 = "goroutine 2 [running]:\nmain.idle()\n\t/src/example.com/svc/main.go:21 +0x31\n";
    send_line(&mut ingest, &json!({"type": "goroutine", "data": {"dump": dump2}}).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second =
        ws.call("ui-c", "r2", "GetAppRunGoroutines", json!({"apprunid": "C", "sinceversion": v1})).await;
    let second_goroutines = second["response"]["goroutines"].as_array().expect("goroutines array");
    assert_eq!(second_goroutines.len(), 1);
    assert_eq!(second_goroutines[0]["go_id"], 2);
    let v2 = second["response"]["version"].as_u64().expect("version");
    assert!(v2 > v1);

    drop(ingest);
}

#[tokio::test]
async fn scenario_multiplexer_routes_http_and_ingest_on_one_socket() {
    let server = TestServer::start().await;

    let health = server.http_get("/api/health").await;
    assert_eq!(health["status"], "ok");

    let mut ingest = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "D", "webserverport": 0}))
        .await;
    send_line(&mut ingest, &json!({"type": "appinfo", "data": {"appname": "x"}}).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let peer = server.ctx.registry.get("D").expect("peer D created via ingest");
    assert_eq!(peer.info().appname, "x");

    drop(ingest);
}

#[tokio::test]
async fn scenario_later_ingest_connection_displaces_the_earlier_one() {
    let server = TestServer::start().await;
    let mut first = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "G", "webserverport": 0}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut second = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "G", "webserverport": 0}))
        .await;
    send_line(&mut second, &json!({"type": "appinfo", "data": {"appname": "g2"}}).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The displaced connection's read loop exits and the server drops its
    // half of the socket, which the still-open client observes as EOF.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_millis(500), first.read(&mut buf))
        .await
        .expect("displaced connection closes promptly")
        .expect("read does not error");
    assert_eq!(n, 0);

    let peer = server.ctx.registry.get("G").expect("peer G exists");
    assert_eq!(peer.info().appname, "g2");
    assert_eq!(peer.status(), outrig_core::peer::PeerStatus::Running);

    drop(second);
}

#[tokio::test]
async fn scenario_pubsub_scope_matching() {
    let server = TestServer::start().await;
    let proxy = server.ctx.router.register("R", false);
    let mut outbound = proxy.outbound_rx;

    server.ctx.broker.subscribe("R", "user:update", Some("user:*"), false, false);
    server.ctx.broker.publish("user:update", Some(vec!["user:42".to_owned()]), None, None, None);
    let received = tokio::time::timeout(Duration::from_millis(200), outbound.recv())
        .await
        .expect("event delivered")
        .expect("channel open");
    assert_eq!(received.commanddata.expect("event data")["event"], "user:update");

    server.ctx.broker.publish("user:update", Some(vec!["user:42:profile".to_owned()]), None, None, None);
    let not_received = tokio::time::timeout(Duration::from_millis(150), outbound.recv()).await;
    assert!(not_received.is_err(), "user:* must not match a deeper scope");

    server.ctx.broker.unsubscribe("R", "user:update");
    server.ctx.broker.subscribe("R", "user:update", Some("user:**"), false, false);
    server.ctx.broker.publish("user:update", Some(vec!["user:42".to_owned()]), None, None, None);
    server.ctx.broker.publish("user:update", Some(vec!["user:42:profile".to_owned()]), None, None, None);
    let first = tokio::time::timeout(Duration::from_millis(200), outbound.recv())
        .await
        .expect("first delivered")
        .expect("channel open");
    let second = tokio::time::timeout(Duration::from_millis(200), outbound.recv())
        .await
        .expect("second delivered")
        .expect("channel open");
    assert_eq!(first.commanddata.expect("data")["scopes"][0], "user:42");
    assert_eq!(second.commanddata.expect("data")["scopes"][0], "user:42:profile");
}

#[tokio::test]
async fn scenario_ring_wraparound_preserves_line_num() {
    // Exercises the ring primitive directly at the spec's documented
    // capacity-3 scenario; a peer's log ring uses the same `CirBuf` with a
    // fixed larger capacity, so this drives the underlying storage type
    // rather than routing five thousand log lines through ingest.
    let ring: outrig_core::ring::CirBuf<i32> = outrig_core::ring::CirBuf::new(3);
    for i in 0..5i32 {
        ring.write(i);
    }
    let result = ring.get_range(0, 5);
    assert_eq!(result.true_start, 2);
    assert!(result.eof);
    assert_eq!(result.items, vec![2, 3, 4]);
}

#[tokio::test]
async fn scenario_runtime_stats_returns_aligned_timeseries() {
    let server = TestServer::start().await;
    let mut ingest = server
        .open_ingest(json!({"mode": "packet", "submode": "", "apprunid": "E", "webserverport": 0}))
        .await;
    let stats = |ts: i64| {
        json!({"type": "runtimestats", "data": {
            "ts": ts, "cpu_usage": 0.1, "goroutine_count": 4, "gomaxprocs": 8, "numcpu": 8,
            "goos": "linux", "goarch": "amd64", "go_version": "go1.22", "pid": 1, "cwd": "/tmp",
            "memstats": {
                "alloc": 0, "total_alloc": 0, "sys": 0, "heap_alloc": 0, "heap_inuse": 0,
                "heap_idle": 0, "stack_inuse": 0, "mspan_inuse": 0, "mcache_inuse": 0, "gc_sys": 0,
                "other_sys": 0, "next_gc": 0, "last_gc": 0, "pause_total_ns": 0, "num_gc": 0,
                "alloc_rate": 0.0, "heap_obj_rate": 0.0, "total_heap_obj": 0, "total_heap_obj_free": 0
            }
        }})
    };
    send_line(&mut ingest, &stats(0).to_string()).await;
    send_line(&mut ingest, &stats(3000).to_string()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = server.connect_ws("ui-e").await;
    let resp = ws.call("ui-e", "r1", "GetAppRunRuntimeStats", json!({"apprunid": "E"})).await;
    let aligned = resp["response"]["aligned"].as_array().expect("aligned array");
    assert_eq!(aligned.len(), 4);
    assert!(aligned[0]["stats"].is_object());
    assert!(aligned[1]["stats"].is_null());
    assert_eq!(aligned[1]["ts"], 1000);
    assert!(aligned[2]["stats"].is_null());
    assert_eq!(aligned[2]["ts"], 2000);
    assert!(aligned[3]["stats"].is_object());

    drop(ingest);
}

#[tokio::test]
async fn scenario_oversized_outbound_ws_message_is_dropped_not_fatal() {
    // A widget matching every one of ~3.5k long lines with a matching page
    // size produces a response comfortably over the 5MB outbound cap; the
    // connection must survive the drop and keep answering later requests.
    let server = TestServer::start().await;
    let mut ingest = server
        .open_ingest(json!({"mode": "log", "submode": "stdout", "apprunid": "F", "webserverport": 0}))
        .await;
    let long_line = "x".repeat(2000);
    for _ in 0..3_500 {
        send_line(&mut ingest, &long_line).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut ws = server.connect_ws("ui-f").await;
    ws.send_call(
        "ui-f",
        "r1",
        "LogSearchRequest",
        json!({"widgetid": "Wbig", "apprunid": "F", "searchterm": "", "pagesize": 3500, "requestpages": [0]}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    // The oversized reply for "r1" never arrives (dropped at the size
    // cap); prove the connection is still alive by completing a normal
    // follow-up call.
    let small = ws
        .call(
            "ui-f",
            "r2",
            "LogSearchRequest",
            json!({"widgetid": "Wsmall", "apprunid": "F", "searchterm": "", "pagesize": 10, "requestpages": [0]}),
        )
        .await;
    assert_eq!(small["response"]["pages"][0]["lines"].as_array().expect("lines").len(), 10);

    drop(ingest);
}
