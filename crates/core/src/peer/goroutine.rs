// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parses a Go-style goroutine stack dump into structured frames, annotating
//! each frame as "important" (target code) or "sys" (stdlib/runtime).

use serde::{Deserialize, Serialize};

/// One stack frame within a parsed goroutine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackFrame {
    pub package: String,
    pub func_name: String,
    pub func_args: String,
    pub file_path: String,
    pub line_number: u32,
    pub pc_offset: String,
    pub is_important: bool,
    pub is_sys: bool,
}

/// A fully parsed goroutine, as reported by one `goroutine` packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedGoRoutine {
    pub go_id: u64,
    pub raw_state: String,
    pub primary_state: String,
    pub state_duration_ms: Option<u64>,
    pub extra_states: Vec<String>,
    pub parsed_frames: Vec<StackFrame>,
    pub created_by_frame: Option<StackFrame>,
    pub created_by_go_id: Option<u64>,
}

/// Parse every `goroutine N [...]:` block in `dump`, annotating frames using
/// `module_prefix` (the target's own module path) to decide importance.
pub fn parse_goroutine_dump(dump: &str, module_prefix: &str) -> Vec<ParsedGoRoutine> {
    let mut out = Vec::new();
    let mut block = Vec::new();
    for raw_line in dump.lines() {
        if raw_line.starts_with("goroutine ") && raw_line.trim_end().ends_with(':') && !block.is_empty() {
            if let Some(g) = parse_block(&block, module_prefix) {
                out.push(g);
            }
            block.clear();
        }
        if !raw_line.trim().is_empty() || !block.is_empty() {
            block.push(raw_line.to_owned());
        }
    }
    if let Some(g) = parse_block(&block, module_prefix) {
        out.push(g);
    }
    out
}

fn parse_block(lines: &[String], module_prefix: &str) -> Option<ParsedGoRoutine> {
    let header = lines.first()?;
    let (go_id, raw_state) = parse_header(header)?;
    let (primary_state, state_duration_ms, extra_states) = split_raw_state(&raw_state);

    let mut parsed_frames = Vec::new();
    let mut created_by_frame = None;
    let mut created_by_go_id = None;

    let mut i = 1;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        if let Some(rest) = line.strip_prefix("created by ") {
            let (creator, goid) = split_created_by(rest);
            created_by_go_id = goid;
            if i + 1 < lines.len() {
                if let Some(frame) = parse_frame(&creator, lines[i + 1].trim(), module_prefix) {
                    created_by_frame = Some(frame);
                }
            }
            i += 2;
            continue;
        }
        if i + 1 < lines.len() {
            if let Some(frame) = parse_frame(line, lines[i + 1].trim(), module_prefix) {
                parsed_frames.push(frame);
            }
        }
        i += 2;
    }

    Some(ParsedGoRoutine {
        go_id,
        raw_state,
        primary_state,
        state_duration_ms,
        extra_states,
        parsed_frames,
        created_by_frame,
        created_by_go_id,
    })
}

/// Parse `goroutine 7 [chan receive, 5 minutes]:` into `(7, "chan receive, 5 minutes")`.
fn parse_header(header: &str) -> Option<(u64, String)> {
    let rest = header.strip_prefix("goroutine ")?;
    let bracket_start = rest.find('[')?;
    let go_id: u64 = rest[..bracket_start].trim().parse().ok()?;
    let bracket_end = rest.rfind(']')?;
    if bracket_end <= bracket_start {
        return None;
    }
    Some((go_id, rest[bracket_start + 1..bracket_end].to_owned()))
}

fn split_raw_state(raw_state: &str) -> (String, Option<u64>, Vec<String>) {
    let mut parts = raw_state.split(',').map(str::trim);
    let primary_state = parts.next().unwrap_or_default().to_owned();
    let mut duration_ms = None;
    let mut extra_states = Vec::new();
    for part in parts {
        if duration_ms.is_none() {
            if let Some(ms) = parse_duration_ms(part) {
                duration_ms = Some(ms);
                continue;
            }
        }
        extra_states.push(part.to_owned());
    }
    (primary_state, duration_ms, extra_states)
}

/// Parse a duration token like `"101 minutes"`, `"45 seconds"`, `"12 ms"`.
fn parse_duration_ms(token: &str) -> Option<u64> {
    let mut iter = token.splitn(2, char::is_whitespace);
    let num = iter.next()?;
    let unit = iter.next()?.trim();
    let value: f64 = num.parse().ok()?;
    let ms = match unit {
        "ns" => value / 1_000_000.0,
        "us" | "µs" => value / 1_000.0,
        "ms" => value,
        "seconds" | "second" => value * 1_000.0,
        "minutes" | "minute" => value * 60_000.0,
        "hours" | "hour" => value * 3_600_000.0,
        "days" | "day" => value * 86_400_000.0,
        _ => return None,
    };
    Some(ms.round().max(0.0) as u64)
}

/// Strip `" in goroutine N"` from a created-by line, returning the creator
/// call text and the parent goroutine id.
fn split_created_by(rest: &str) -> (String, Option<u64>) {
    if let Some(idx) = rest.rfind(" in goroutine ") {
        let creator = rest[..idx].to_owned();
        let goid = rest[idx + " in goroutine ".len()..].trim().parse().ok();
        (creator, goid)
    } else {
        (rest.to_owned(), None)
    }
}

/// Parse a `(call line, file line)` pair into a [`StackFrame`].
fn parse_frame(call_line: &str, file_line: &str, module_prefix: &str) -> Option<StackFrame> {
    let call_line = call_line.trim();
    let (func_full, func_args) = match call_line.rfind('(') {
        Some(open) if call_line.ends_with(')') => {
            (call_line[..open].to_owned(), call_line[open + 1..call_line.len() - 1].to_owned())
        }
        _ => (call_line.to_owned(), String::new()),
    };

    let (package, func_name) = split_package(&func_full);

    let file_line = file_line.trim();
    let (file_part, pc_offset) = match file_line.rsplit_once(' ') {
        Some((path, off)) if off.starts_with("+0x") => (path.trim(), off.to_owned()),
        _ => (file_line, String::new()),
    };
    let (file_path, line_number) = match file_part.rsplit_once(':') {
        Some((path, n)) => (path.to_owned(), n.parse().unwrap_or(0)),
        None => (file_part.to_owned(), 0),
    };

    let is_important =
        (package.starts_with(module_prefix) && !package.contains("/vendor/")) || package == "main";
    let is_sys = first_segment_has_no_dot(&package) || package.starts_with("golang.org/x/");

    Some(StackFrame { package, func_name, func_args, file_path, line_number, pc_offset, is_important, is_sys })
}

/// Split `pkg/path.Func` or `pkg/path.(*Type).Method` into `(package, func_name)`
/// using the last `/` then the first `.` after it, so the receiver stays part
/// of the function name.
fn split_package(func_full: &str) -> (String, String) {
    let search_from = func_full.rfind('/').map(|i| i + 1).unwrap_or(0);
    match func_full[search_from..].find('.') {
        Some(rel_dot) => {
            let dot = search_from + rel_dot;
            (func_full[..dot].to_owned(), func_full[dot + 1..].to_owned())
        }
        None => (String::new(), func_full.to_owned()),
    }
}

fn first_segment_has_no_dot(package: &str) -> bool {
    match package.split('/').next() {
        Some(seg) => !seg.is_empty() && !seg.contains('.'),
        None => true,
    }
}

#[cfg(test)]
#[path = "goroutine_tests.rs"]
mod tests;
