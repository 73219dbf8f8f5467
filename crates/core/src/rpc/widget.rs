// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side log search widget state: the compiled filter and the cached
//! set of matching absolute line numbers for one `LogSearchRequest` session,
//! keyed by `widgetid`. Garbage-collected independently of any single RPC
//! call's lifetime — a widget survives across many `LogSearchRequest` calls
//! as the UI pages through results, and is dropped only by an explicit
//! `drop`, or after 30s without a `keepalive` (§4.8, §9 Design Notes).

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::peer::{AppRunId, now_ms};
use crate::peer::log::SearchFilter;

const KEEPALIVE_TIMEOUT_MS: i64 = 30_000;

struct WidgetState {
    apprunid: AppRunId,
    searchterm: String,
    filter: SearchFilter,
    /// Matching absolute line numbers, ascending, as of the last recompute.
    filtered_line_nums: Vec<u64>,
    /// The peer's `total_count` the cache was built against; a search is
    /// recomputed from scratch when this is stale, since the ring's filter
    /// scan is cheap relative to the correctness risk of an incremental
    /// diff against an evicting ring.
    cached_against_total: u64,
    last_keepalive_ts: i64,
}

/// Process-wide registry of log search widgets.
#[derive(Default)]
pub struct WidgetStore {
    widgets: Mutex<HashMap<String, WidgetState>>,
}

impl WidgetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating if needed) the widget's compiled filter, recompiling
    /// it when `searchterm` or `apprunid` changed since the last call.
    pub fn ensure_filter(&self, widgetid: &str, apprunid: &str, searchterm: &str) -> SearchFilter {
        let mut widgets = self.widgets.lock();
        let needs_new = match widgets.get(widgetid) {
            Some(w) => w.apprunid != apprunid || w.searchterm != searchterm,
            None => true,
        };
        if needs_new {
            let filter = SearchFilter::compile(searchterm);
            widgets.insert(
                widgetid.to_owned(),
                WidgetState {
                    apprunid: apprunid.to_owned(),
                    searchterm: searchterm.to_owned(),
                    filter: filter.clone(),
                    filtered_line_nums: Vec::new(),
                    cached_against_total: 0,
                    last_keepalive_ts: now_ms(),
                },
            );
            filter
        } else {
            widgets.get(widgetid).map(|w| w.filter.clone()).unwrap_or_default()
        }
    }

    /// Replace the cached filtered-index set for `widgetid`, recording the
    /// ring `total_count` it was computed against.
    pub fn store_filtered(&self, widgetid: &str, line_nums: Vec<u64>, total_count: u64) {
        if let Some(w) = self.widgets.lock().get_mut(widgetid) {
            w.filtered_line_nums = line_nums;
            w.cached_against_total = total_count;
        }
    }

    /// Return the cached filtered-index set if it is still fresh against
    /// `total_count` (no lines have been appended since the last compute).
    pub fn cached_filtered(&self, widgetid: &str, total_count: u64) -> Option<Vec<u64>> {
        let widgets = self.widgets.lock();
        let w = widgets.get(widgetid)?;
        (w.cached_against_total == total_count).then(|| w.filtered_line_nums.clone())
    }

    /// Reset a widget's keepalive clock. Must be called at least every 30s
    /// or the widget becomes eligible for garbage collection.
    pub fn keepalive(&self, widgetid: &str) {
        if let Some(w) = self.widgets.lock().get_mut(widgetid) {
            w.last_keepalive_ts = now_ms();
        }
    }

    /// Explicitly drop a widget's state.
    pub fn drop_widget(&self, widgetid: &str) {
        self.widgets.lock().remove(widgetid);
    }

    /// Remove every widget whose keepalive has lapsed. Intended to be
    /// called periodically by a background task, not per-request.
    pub fn collect_expired(&self) -> usize {
        let now = now_ms();
        let mut widgets = self.widgets.lock();
        let before = widgets.len();
        widgets.retain(|_, w| now - w.last_keepalive_ts < KEEPALIVE_TIMEOUT_MS);
        before - widgets.len()
    }

    /// The `apprunid` a widget was last bound to by `ensure_filter`, used by
    /// methods that only carry a `widgetid` (`LogUpdateMarkedLines`,
    /// `LogGetMarkedLines`, `LogWidgetAdmin`) to resolve the owning peer.
    pub fn apprunid_of(&self, widgetid: &str) -> Option<AppRunId> {
        self.widgets.lock().get(widgetid).map(|w| w.apprunid.clone())
    }

    pub fn len(&self) -> usize {
        self.widgets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "widget_tests.rs"]
mod tests;
