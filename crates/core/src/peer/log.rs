// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-peer log line storage and the search filter grammar from the query
//! surface's `LogSearchRequest`.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ring::CirBuf;

/// A single ingested log line. `line_num` is assigned by the owning peer and
/// never reused, even once the backing ring evicts the line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub line_num: u64,
    pub ts: i64,
    pub msg: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Ring-backed log store. `line_num` tracks the ring's `total_count` exactly,
/// since every append is sequential and the ring never skips an index on a
/// plain `write`.
pub struct LogStore {
    ring: CirBuf<LogLine>,
}

impl LogStore {
    pub fn new(capacity: usize) -> Self {
        Self { ring: CirBuf::new(capacity) }
    }

    /// Append a new line, assigning it the next `line_num`.
    pub fn append(&self, ts: i64, msg: String, source: String) -> LogLine {
        let line_num = self.ring.total_count();
        let line = LogLine { line_num, ts, msg, source, file: None, line: None };
        self.ring.write(line.clone());
        line
    }

    /// Full ring snapshot, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.ring.get_all().0
    }

    pub fn head_offset(&self) -> u64 {
        self.ring.head_offset()
    }

    /// Fetch a single retained line by its absolute `line_num`.
    pub fn get_line(&self, line_num: u64) -> Option<LogLine> {
        self.ring.get_at(line_num)
    }

    pub fn total_count(&self) -> u64 {
        self.ring.total_count()
    }

    /// Apply `filter` to the retained window, returning matches with their
    /// absolute line numbers in ascending order.
    pub fn search(&self, filter: &SearchFilter) -> Vec<LogLine> {
        self.ring
            .filter(|line, _| filter.matches(line))
            .into_iter()
            .map(|(line, _)| line)
            .collect()
    }
}

/// A single compiled search token.
#[derive(Debug, Clone)]
enum Token {
    /// Case-insensitive substring match on `msg`.
    Substring(String),
    /// `source:<tag>` restricts by exact source match.
    Source(String),
}

/// A compiled `searchterm` expression: whitespace-separated tokens, AND
/// combined, with `-` negation and `source:<tag>` scoping.
///
/// Malformed input never errors; an expression that fails to tokenize
/// meaningfully degrades to `Invalid`, which matches nothing.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    positive: Vec<Token>,
    negative: Vec<Token>,
    invalid: bool,
}

impl SearchFilter {
    /// Compile a raw `searchterm` string. An empty or all-whitespace term
    /// matches everything.
    pub fn compile(searchterm: &str) -> Self {
        let mut filter = SearchFilter::default();
        for raw in searchterm.split_whitespace() {
            let (negate, body) = match raw.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            if body.is_empty() {
                filter.invalid = true;
                continue;
            }
            let token = match body.strip_prefix("source:") {
                Some(tag) if !tag.is_empty() => Token::Source(tag.to_owned()),
                Some(_) => {
                    filter.invalid = true;
                    continue;
                }
                None => Token::Substring(body.to_lowercase()),
            };
            if negate {
                filter.negative.push(token);
            } else {
                filter.positive.push(token);
            }
        }
        filter
    }

    pub fn is_valid(&self) -> bool {
        !self.invalid
    }

    pub fn matches(&self, line: &LogLine) -> bool {
        if self.invalid {
            return false;
        }
        let lowered_msg = line.msg.to_lowercase();
        let token_matches = |token: &Token| -> bool {
            match token {
                Token::Substring(needle) => lowered_msg.contains(needle.as_str()),
                Token::Source(tag) => line.source == *tag,
            }
        };
        self.positive.iter().all(&token_matches) && self.negative.iter().all(|t| !token_matches(t))
    }
}

/// Per-widget set of marked absolute line numbers.
#[derive(Default)]
pub struct MarkedLinesStore {
    by_widget: Mutex<HashMap<String, HashSet<u64>>>,
}

impl MarkedLinesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an additive diff of `line_num -> marked` to `widgetid`'s set,
    /// optionally clearing it first.
    pub fn update(&self, widgetid: &str, diff: &HashMap<u64, bool>, clear: bool) {
        let mut by_widget = self.by_widget.lock();
        let set = by_widget.entry(widgetid.to_owned()).or_default();
        if clear {
            set.clear();
        }
        for (&line_num, &marked) in diff {
            if marked {
                set.insert(line_num);
            } else {
                set.remove(&line_num);
            }
        }
    }

    /// Snapshot the marked line numbers for `widgetid`.
    pub fn get(&self, widgetid: &str) -> HashSet<u64> {
        self.by_widget.lock().get(widgetid).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
