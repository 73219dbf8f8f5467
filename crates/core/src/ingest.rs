// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ingest handler: the line-framed protocol a target process speaks over
//! either the TCP mux's ingest sub-channel or the Unix control socket. One
//! task per connection; the connection's lifetime is the peer's reference
//! lifetime (acquired on handshake, released on close or EOF). A fresh
//! handshake for an `apprunid` that already has a live connection displaces
//! it via [`AppRunPeer::begin_ingest_session`] rather than letting both run.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;

use crate::packet::Packet;
use crate::peer::registry::PeerRegistry;
use crate::peer::{AppRunPeer, PacketEffect, now_ms};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// First line of every ingest connection.
#[derive(Debug, Deserialize)]
struct Handshake {
    mode: String,
    #[serde(default)]
    submode: String,
    apprunid: String,
    #[serde(default)]
    #[allow(dead_code)]
    webserverport: i64,
}

/// Told about peer status transitions and rate-gated log appends so they can
/// be republished through the RPC broker. A no-op notifier is fine when
/// nothing downstream cares yet.
pub trait PeerEventNotifier: Send + Sync {
    fn notify_status_update(&self, apprunid: &str);
    fn notify_log_update(&self, apprunid: &str);
}

impl PeerEventNotifier for () {
    fn notify_status_update(&self, _apprunid: &str) {}
    fn notify_log_update(&self, _apprunid: &str) {}
}

/// Serve one ingest connection to completion. Never returns an error: every
/// failure mode (bad handshake, malformed line, closed socket) is logged and
/// treated as "this connection is done," per the spec's handshake
/// EOF-tolerance rule.
pub async fn serve<S>(
    stream: S,
    registry: &PeerRegistry,
    notifier: &dyn PeerEventNotifier,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    let read = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line)).await;
    let n = match read {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            tracing::debug!("ingest handshake read error: {e}");
            return;
        }
        Err(_) => {
            tracing::debug!("ingest handshake timed out");
            return;
        }
    };
    if n == 0 {
        // Empty probe (e.g. a health check dialing and hanging up): silent.
        return;
    }

    let handshake: Handshake = match serde_json::from_str(line.trim_end_matches(['\n', '\r'])) {
        Ok(h) => h,
        Err(e) => {
            tracing::debug!("ingest handshake parse error: {e}");
            return;
        }
    };

    let peer = registry.get_or_create(&handshake.apprunid);
    peer.mark_running();
    notifier.notify_status_update(&handshake.apprunid);
    let guard = peer.acquire();
    let displaced = peer.begin_ingest_session();

    match handshake.mode.as_str() {
        "packet" => run_packet_mode(&mut reader, &peer, notifier, &shutdown, &displaced).await,
        "log" => run_log_mode(&mut reader, &peer, &handshake.submode, notifier, &shutdown, &displaced).await,
        other => tracing::debug!("unknown ingest mode {other:?} for {}", handshake.apprunid),
    }

    if guard.release() {
        notifier.notify_status_update(&peer.apprunid);
    }
}

async fn run_packet_mode<S>(
    reader: &mut BufReader<S>,
    peer: &Arc<AppRunPeer>,
    notifier: &dyn PeerEventNotifier,
    shutdown: &CancellationToken,
    displaced: &CancellationToken,
) where
    S: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = displaced.cancelled() => return,
            read = reader.read_line(&mut line) => read,
        };
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("ingest read error for {}: {e}", peer.apprunid);
                return;
            }
        };
        if n == 0 {
            return;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Packet>(trimmed) {
            Ok(packet) => match peer.handle_packet(packet) {
                PacketEffect::StatusChanged => notifier.notify_status_update(&peer.apprunid),
                PacketEffect::LogAppended => notifier.notify_log_update(&peer.apprunid),
                PacketEffect::None => {}
            },
            Err(e) => tracing::debug!("malformed packet from {}: {e}", peer.apprunid),
        }
    }
}

async fn run_log_mode<S>(
    reader: &mut BufReader<S>,
    peer: &Arc<AppRunPeer>,
    source: &str,
    notifier: &dyn PeerEventNotifier,
    shutdown: &CancellationToken,
    displaced: &CancellationToken,
) where
    S: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let read = tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = displaced.cancelled() => return,
            read = reader.read_until(b'\n', &mut raw) => read,
        };
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("ingest read error for {}: {e}", peer.apprunid);
                return;
            }
        };
        if n == 0 {
            return;
        }
        // Strip only the line delimiter; the spec requires the body to be
        // preserved verbatim otherwise, so no whitespace trimming here.
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        let msg = String::from_utf8_lossy(&raw).into_owned();
        peer.logs.append(now_ms(), msg, source.to_owned());
        if peer.note_raw_log_append() {
            notifier.notify_log_update(&peer.apprunid);
        }
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
