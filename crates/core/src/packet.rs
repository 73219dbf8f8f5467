// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level packet types for ingest "packet mode", and the tagged-union
//! envelope the ingest handler deserializes each body line into.
//!
//! Dispatch is compile-time exhaustive: adding a packet type means adding a
//! match arm in [`crate::peer::AppRunPeer::handle_packet`], not threading a
//! new string key through a lookup table.

use serde::{Deserialize, Serialize};

use crate::peer::AppInfo;
use crate::peer::stats::RuntimeStatsInfo;
use crate::peer::watch::WatchSample;

/// Payload of a `log` packet. `ts` defaults to the ingest handler's receipt
/// time when the target does not supply one.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogPacket {
    pub msg: String,
    pub source: String,
    #[serde(default)]
    pub ts: Option<i64>,
}

/// Payload of a `goroutine` packet: the raw textual dump, possibly
/// containing more than one `goroutine N [...]:` block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoroutinePacket {
    pub dump: String,
}

/// One inbound packet, tagged by its wire `type` field. Deserializing an
/// unrecognized `type` fails, which the ingest handler surfaces as a
/// protocol error per the error handling design.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Packet {
    Log(LogPacket),
    Goroutine(GoroutinePacket),
    Watch(WatchSample),
    Runtimestats(RuntimeStatsInfo),
    Appinfo(AppInfo),
    Appdone,
}
