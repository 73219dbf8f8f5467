// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps real timestamps onto a 1-second logical grid with drift
//! compensation, so timeseries samples collected at imprecise intervals
//! (e.g. runtime-stats polling) line up for windowed queries.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Minimum spacing, in milliseconds, between two accepted samples.
const MIN_SPACING_MS: i64 = 500;
/// Nominal spacing, in milliseconds, between logical grid slots.
const SLOT_MS: i64 = 1000;
/// Accumulated skew, in milliseconds, that triggers a slot insertion/drop.
const SKEW_THRESHOLD_MS: i64 = 1000;

struct Inner {
    /// Logical index -> real (possibly synthetic) timestamp, ms.
    samples: BTreeMap<u64, i64>,
    t0: Option<i64>,
    last_real_ts: i64,
    last_logical: u64,
    global_skew: i64,
    max_samples: usize,
}

/// Outcome of submitting a timestamp to the aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The timestamp regressed before the last real sample; rejected.
    Rejected,
    /// The timestamp arrived too soon after the last one; dropped.
    DroppedTooSoon,
    /// Skew correction required dropping this sample without advancing `L`.
    DroppedSkew,
    /// Accepted at the returned logical index.
    Accepted(u64),
}

/// Assigns a logical 1-second grid index to a stream of real timestamps.
pub struct TimeSampleAligner {
    inner: Mutex<Inner>,
}

impl TimeSampleAligner {
    pub fn new(max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: BTreeMap::new(),
                t0: None,
                last_real_ts: 0,
                last_logical: 0,
                global_skew: 0,
                max_samples,
            }),
        }
    }

    /// Submit a real timestamp (ms since epoch), returning the logical index
    /// it was placed at, or why it was rejected/dropped.
    pub fn submit(&self, t: i64) -> SubmitOutcome {
        let mut inner = self.inner.lock();

        let Some(t0) = inner.t0 else {
            inner.t0 = Some(t);
            inner.last_real_ts = t;
            inner.last_logical = 0;
            inner.samples.insert(0, t);
            self.cleanup_locked(&mut inner);
            return SubmitOutcome::Accepted(0);
        };
        let _ = t0;

        if t < inner.last_real_ts {
            return SubmitOutcome::Rejected;
        }
        if t - inner.last_real_ts < MIN_SPACING_MS {
            return SubmitOutcome::DroppedTooSoon;
        }

        let delta = t - inner.last_real_ts;
        let slots = ((delta as f64) / (SLOT_MS as f64)).round() as i64;
        let slots = slots.max(1);
        let expected = inner.last_real_ts + slots * SLOT_MS;
        let local_skew = t - expected;
        inner.global_skew += local_skew;

        // Fill any intervening gap slots with synthetic, evenly-spaced
        // timestamps before placing `t`.
        for k in 1..slots {
            let logical = inner.last_logical + k as u64;
            let synthetic = inner.last_real_ts + k * SLOT_MS;
            inner.samples.insert(logical, synthetic);
        }

        let outcome = if inner.global_skew >= SKEW_THRESHOLD_MS {
            // Insert one extra synthetic slot at the midpoint, then place `t`
            // one slot further along; relieve the accumulated skew.
            let extra_logical = inner.last_logical + slots as u64;
            let midpoint = (inner.last_real_ts + t) / 2;
            inner.samples.insert(extra_logical, midpoint);

            let new_logical = extra_logical + 1;
            inner.samples.insert(new_logical, t);
            inner.last_logical = new_logical;
            inner.last_real_ts = t;
            inner.global_skew -= SKEW_THRESHOLD_MS;
            SubmitOutcome::Accepted(new_logical)
        } else if inner.global_skew <= -SKEW_THRESHOLD_MS {
            inner.global_skew += SKEW_THRESHOLD_MS;
            SubmitOutcome::DroppedSkew
        } else {
            let new_logical = inner.last_logical + slots as u64;
            inner.samples.insert(new_logical, t);
            inner.last_logical = new_logical;
            inner.last_real_ts = t;
            SubmitOutcome::Accepted(new_logical)
        };

        self.cleanup_locked(&mut inner);
        outcome
    }

    /// Return the timestamp at logical index `l`: stored if present,
    /// otherwise computed as `t0 + l * 1000`.
    pub fn get_timestamp(&self, l: u64) -> Option<i64> {
        let inner = self.inner.lock();
        if let Some(ts) = inner.samples.get(&l) {
            return Some(*ts);
        }
        inner.t0.map(|t0| t0 + (l as i64) * SLOT_MS)
    }

    /// Binary-search for the logical index nearest timestamp `t`, within one
    /// slot of the naive `(t - t0) / 1000` estimate.
    pub fn get_logical(&self, t: i64) -> Option<u64> {
        let inner = self.inner.lock();
        let t0 = inner.t0?;
        let estimate = ((t - t0) as f64 / SLOT_MS as f64).round() as i64;
        let mut best: Option<(u64, i64)> = None;
        for cand in [estimate - 1, estimate, estimate + 1] {
            if cand < 0 {
                continue;
            }
            let cand = cand as u64;
            let ts = inner.samples.get(&cand).copied().unwrap_or(t0 + cand as i64 * SLOT_MS);
            let diff = (ts - t).abs();
            if best.map(|(_, bd)| diff < bd).unwrap_or(true) {
                best = Some((cand, diff));
            }
        }
        best.map(|(l, _)| l)
    }

    /// First observed timestamp, i.e. `t0`.
    pub fn t0(&self) -> Option<i64> {
        self.inner.lock().t0
    }

    /// Drop the oldest stored logical indices until at most `max_samples`
    /// remain, always preserving `t0` (logical index 0).
    fn cleanup_locked(&self, inner: &mut Inner) {
        while inner.samples.len() > inner.max_samples {
            let oldest = match inner.samples.keys().next().copied() {
                Some(k) if k != 0 => k,
                Some(_) => match inner.samples.keys().nth(1).copied() {
                    Some(k) => k,
                    None => break,
                },
                None => break,
            };
            inner.samples.remove(&oldest);
        }
    }
}

#[cfg(test)]
#[path = "aligner_tests.rs"]
mod tests;
