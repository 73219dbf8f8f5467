// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime-stats history: a ring of periodic samples plus a time-sample
//! aligner so windowed reads can be expressed in terms of the logical
//! 1-second grid instead of raw, imprecisely-spaced poll timestamps.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::aligner::{SubmitOutcome, TimeSampleAligner};
use crate::ring::CirBuf;

/// Memory allocator statistics reported alongside each runtime-stats sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MemStats {
    pub alloc: u64,
    pub total_alloc: u64,
    pub sys: u64,
    pub heap_alloc: u64,
    pub heap_inuse: u64,
    pub heap_idle: u64,
    pub stack_inuse: u64,
    pub mspan_inuse: u64,
    pub mcache_inuse: u64,
    pub gc_sys: u64,
    pub other_sys: u64,
    pub next_gc: u64,
    pub last_gc: u64,
    pub pause_total_ns: u64,
    pub num_gc: u32,
    pub alloc_rate: f64,
    pub heap_obj_rate: f64,
    pub total_heap_obj: u64,
    pub total_heap_obj_free: u64,
}

/// One runtime-stats sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeStatsInfo {
    pub ts: i64,
    pub cpu_usage: f64,
    pub goroutine_count: u32,
    pub gomaxprocs: u32,
    pub numcpu: u32,
    pub goos: String,
    pub goarch: String,
    pub go_version: String,
    pub pid: u32,
    pub cwd: String,
    pub memstats: MemStats,
}

/// One slot of the logical-grid-aligned timeseries: either a real sample
/// accepted by the aligner at this logical index, or a gap the aligner
/// filled with a synthetic, evenly-spaced timestamp (`stats: None`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignedSample {
    pub logical: u64,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RuntimeStatsInfo>,
}

/// Holds the append-only stats ring plus an aligner tracking this peer's
/// sample cadence so windowed queries can resolve "the sample nearest
/// logical index L" without re-deriving drift correction per query.
pub struct StatsStore {
    ring: CirBuf<RuntimeStatsInfo>,
    aligner: TimeSampleAligner,
    /// Real samples keyed by the logical index the aligner accepted them
    /// at, bounded the same way the aligner bounds its own grid so the two
    /// never drift apart in retained window.
    by_logical: Mutex<BTreeMap<u64, RuntimeStatsInfo>>,
    capacity: usize,
}

impl StatsStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: CirBuf::new(capacity),
            aligner: TimeSampleAligner::new(capacity),
            by_logical: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Record a new sample. The aligner tracks this sample's place on the
    /// logical grid for later windowed reads; the ring retains the sample
    /// regardless of whether the aligner accepted, dropped, or rejected it,
    /// since the ring's own "latest + bounded history" semantics are
    /// independent of alignment bookkeeping.
    pub fn append(&self, info: RuntimeStatsInfo) {
        let outcome = self.aligner.submit(info.ts);
        self.ring.write(info.clone());
        if let SubmitOutcome::Accepted(logical) = outcome {
            let mut by_logical = self.by_logical.lock();
            by_logical.insert(logical, info);
            while by_logical.len() > self.capacity {
                let Some(&oldest) = by_logical.keys().next() else { break };
                by_logical.remove(&oldest);
            }
        }
    }

    /// The most recently appended sample.
    pub fn latest(&self) -> Option<RuntimeStatsInfo> {
        self.ring.get_last()
    }

    /// All retained samples, oldest first, restricted to `[from_ts, to_ts]`.
    pub fn window(&self, from_ts: i64, to_ts: i64) -> Vec<RuntimeStatsInfo> {
        self.ring
            .filter(|sample, _| sample.ts >= from_ts && sample.ts <= to_ts)
            .into_iter()
            .map(|(sample, _)| sample)
            .collect()
    }

    /// Every retained sample, oldest first.
    pub fn snapshot(&self) -> Vec<RuntimeStatsInfo> {
        self.ring.get_all().0
    }

    /// Nearest logical grid index for timestamp `t`, per the aligner.
    pub fn get_logical(&self, t: i64) -> Option<u64> {
        self.aligner.get_logical(t)
    }

    /// The retained window as a contiguous logical-grid-aligned series:
    /// every logical index between the oldest and newest retained real
    /// sample appears once, with gaps carrying the aligner's synthetic
    /// timestamp and no `stats` payload. This is the "aligned timeseries
    /// window" the query surface reports alongside the latest sample.
    pub fn aligned_window(&self) -> Vec<AlignedSample> {
        let by_logical = self.by_logical.lock();
        let (Some(&min_l), Some(&max_l)) = (by_logical.keys().next(), by_logical.keys().next_back()) else {
            return Vec::new();
        };
        (min_l..=max_l)
            .map(|logical| AlignedSample {
                logical,
                ts: self.aligner.get_timestamp(logical).unwrap_or(0),
                stats: by_logical.get(&logical).cloned(),
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "stats_tests.rs"]
mod tests;
