// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watched-value storage: the target reports named values on its own poll
//! cadence, and the peer keeps only the latest sample per name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The latest reported value for one watch name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSample {
    pub name: String,
    pub value: Value,
    #[serde(rename = "type")]
    pub type_name: String,
    pub poll_ts: i64,
    pub active: bool,
}
