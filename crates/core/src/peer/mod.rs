// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-target-process aggregate: one [`AppRunPeer`] per `AppRunId`,
//! owning the log ring, goroutine/watch versioned maps, runtime-stats
//! history, and lifecycle status for a single run of a target program.

pub mod goroutine;
pub mod log;
pub mod registry;
pub mod stats;
pub mod watch;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::packet::Packet;
use crate::peer::goroutine::parse_goroutine_dump;
use crate::peer::log::{LogStore, MarkedLinesStore};
use crate::peer::stats::StatsStore;
use crate::versioned_map::VersionedMap;

pub use goroutine::ParsedGoRoutine;
pub use log::LogLine;
pub use stats::RuntimeStatsInfo;
pub use watch::WatchSample;

/// Opaque identifier for a single execution of a target program.
pub type AppRunId = String;

pub fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Static identifying information about a target process, overwritten
/// wholesale on each `appinfo` packet.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppInfo {
    pub appname: String,
    pub pid: u32,
    pub cwd: String,
    pub argv: Vec<String>,
    pub module: String,
    pub executable: String,
    pub start_ts: i64,
    pub hostname: String,
    pub tags: Vec<String>,
}

/// Lifecycle status of an [`AppRunPeer`]. See the state machine in the
/// query surface's documented transitions: `running -> done` on an
/// `appdone` packet, `running -> disconnected` on refcount reaching zero
/// without one, `disconnected -> running` on a fresh ingest handshake, and
/// `done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Running,
    Done,
    Disconnected,
}

/// A read-only projection of a peer's identity and status, used by
/// `ListAppRuns` and `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRunInfo {
    pub apprunid: AppRunId,
    pub appname: String,
    pub pid: u32,
    pub isrunning: bool,
    pub starttime: i64,
}

/// Per-peer substore sizing, threaded in from [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct PeerLimits {
    pub log_capacity: usize,
    pub goroutine_capacity_hint: usize,
    pub stats_capacity: usize,
}

/// Owns all per-target-process state. Each substore carries its own lock;
/// only status/refcount live behind the peer's own mutex/atomics, so a
/// reader touching logs never blocks on a writer touching goroutines.
/// Minimum spacing, in milliseconds, between `log:update` event publishes
/// for a single peer, so a fast log producer cannot flood the broker with
/// one event per line (§4.4 "publish a bounded-rate update event").
const LOG_EVENT_MIN_INTERVAL_MS: i64 = 200;

/// Outcome of [`AppRunPeer::handle_packet`], telling the caller which event
/// (if any) to publish through the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketEffect {
    None,
    /// Identity or lifecycle changed: publish `app:statusupdate`.
    StatusChanged,
    /// A new log line was appended and the bounded-rate gate allows a
    /// publish now: publish `log:update` scoped to this `apprunid`.
    LogAppended,
}

pub struct AppRunPeer {
    pub apprunid: AppRunId,
    info: Mutex<AppInfo>,
    status: Mutex<PeerStatus>,
    refcount: AtomicI64,
    last_modified_ts: AtomicI64,
    last_log_event_ts: AtomicI64,
    ingest_session: Mutex<Option<CancellationToken>>,
    pub logs: LogStore,
    pub goroutines: VersionedMap<u64, ParsedGoRoutine>,
    pub watches: VersionedMap<String, WatchSample>,
    pub stats: StatsStore,
    pub marked_lines: MarkedLinesStore,
}

impl AppRunPeer {
    pub fn new(apprunid: AppRunId, limits: PeerLimits) -> Self {
        let _ = limits.goroutine_capacity_hint;
        Self {
            apprunid,
            info: Mutex::new(AppInfo::default()),
            status: Mutex::new(PeerStatus::Running),
            refcount: AtomicI64::new(0),
            last_modified_ts: AtomicI64::new(now_ms()),
            last_log_event_ts: AtomicI64::new(i64::MIN),
            ingest_session: Mutex::new(None),
            logs: LogStore::new(limits.log_capacity),
            goroutines: VersionedMap::new(),
            watches: VersionedMap::new(),
            stats: StatsStore::new(limits.stats_capacity),
            marked_lines: MarkedLinesStore::new(),
        }
    }

    pub fn status(&self) -> PeerStatus {
        *self.status.lock()
    }

    pub fn info(&self) -> AppInfo {
        self.info.lock().clone()
    }

    pub fn last_modified_ts(&self) -> i64 {
        self.last_modified_ts.load(Ordering::Relaxed)
    }

    pub fn refcount(&self) -> i64 {
        self.refcount.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_modified_ts.store(now_ms(), Ordering::Relaxed);
    }

    /// Dispatch one inbound packet. Returns which event (if any) the caller
    /// should publish through the broker.
    pub fn handle_packet(&self, packet: Packet) -> PacketEffect {
        self.touch();
        match packet {
            Packet::Log(p) => {
                let ts = p.ts.unwrap_or_else(now_ms);
                self.logs.append(ts, p.msg, p.source);
                if self.log_event_due() { PacketEffect::LogAppended } else { PacketEffect::None }
            }
            Packet::Goroutine(p) => {
                let module = self.info.lock().module.clone();
                for g in parse_goroutine_dump(&p.dump, &module) {
                    self.goroutines.set_and_inc_version(g.go_id, g);
                }
                PacketEffect::None
            }
            Packet::Watch(w) => {
                self.watches.set_and_inc_version(w.name.clone(), w);
                PacketEffect::None
            }
            Packet::Runtimestats(s) => {
                self.stats.append(s);
                PacketEffect::None
            }
            Packet::Appinfo(info) => {
                *self.info.lock() = info;
                PacketEffect::StatusChanged
            }
            Packet::Appdone => {
                *self.status.lock() = PeerStatus::Done;
                PacketEffect::StatusChanged
            }
        }
    }

    /// Record a raw log-mode append (bypassing [`Self::handle_packet`]) and
    /// report whether the bounded-rate gate allows a `log:update` publish.
    pub fn note_raw_log_append(&self) -> bool {
        self.touch();
        self.log_event_due()
    }

    /// Bounded-rate gate: at most one `true` result per
    /// [`LOG_EVENT_MIN_INTERVAL_MS`] window.
    fn log_event_due(&self) -> bool {
        let now = now_ms();
        let last = self.last_log_event_ts.load(Ordering::Relaxed);
        if now - last < LOG_EVENT_MIN_INTERVAL_MS {
            return false;
        }
        self.last_log_event_ts.store(now, Ordering::Relaxed);
        true
    }

    /// Called when a new ingest connection establishes for this peer's
    /// `AppRunId`. Per the state machine, a `disconnected` peer returns to
    /// `running`; `done` is terminal and never reopens.
    pub fn mark_running(&self) {
        let mut status = self.status.lock();
        if *status == PeerStatus::Disconnected {
            *status = PeerStatus::Running;
        }
    }

    /// Begin a new ingest connection for this `AppRunId`, cancelling
    /// whichever connection previously held the session. At most one
    /// ingest connection is authoritative per `AppRunId`: a fresh handshake
    /// displaces a still-open prior one rather than letting both append
    /// concurrently. Returns the token the new connection's read loop
    /// watches; it fires the moment a later handshake displaces it in turn.
    pub fn begin_ingest_session(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.ingest_session.lock();
        if let Some(prev) = slot.replace(token.clone()) {
            prev.cancel();
        }
        token
    }

    /// Take a reference on this peer. The returned guard decrements the
    /// count on drop; the caller is expected to check [`AppRunPeer::status`]
    /// immediately after dropping the guard (or holding it) to learn
    /// whether the drop triggered a `running -> disconnected` transition,
    /// since the transition itself is pure state and carries no I/O.
    pub fn acquire(self: &Arc<Self>) -> PeerGuard {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        PeerGuard { peer: Arc::clone(self) }
    }

    /// Decrement the refcount; if it reaches zero while `running`, flip to
    /// `disconnected`. Returns `true` when that transition happened.
    fn release(&self) -> bool {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            let mut status = self.status.lock();
            if *status == PeerStatus::Running {
                *status = PeerStatus::Disconnected;
                return true;
            }
        }
        false
    }

    pub fn to_app_run_info(&self) -> AppRunInfo {
        let info = self.info();
        AppRunInfo {
            apprunid: self.apprunid.clone(),
            appname: info.appname,
            pid: info.pid,
            isrunning: self.status() == PeerStatus::Running,
            starttime: info.start_ts,
        }
    }
}

/// RAII reference on an [`AppRunPeer`], replacing the goroutine-`defer`
/// release pattern with a `Drop` impl. Dropping it never performs I/O; it
/// only updates the peer's refcount and status, matching the ownership
/// shape of the rest of the crate's guard types.
pub struct PeerGuard {
    peer: Arc<AppRunPeer>,
}

impl PeerGuard {
    pub fn peer(&self) -> &Arc<AppRunPeer> {
        &self.peer
    }

    /// Drop the guard and report whether doing so transitioned the peer to
    /// `disconnected`, so the caller can publish the status-update event.
    pub fn release(self) -> bool {
        let transitioned = self.peer.release();
        std::mem::forget(self);
        transitioned
    }
}

impl Drop for PeerGuard {
    fn drop(&mut self) {
        self.peer.release();
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
