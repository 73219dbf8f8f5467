// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample(ts: i64, goroutine_count: u32) -> RuntimeStatsInfo {
    RuntimeStatsInfo {
        ts,
        cpu_usage: 0.0,
        goroutine_count,
        gomaxprocs: 4,
        numcpu: 4,
        goos: "linux".into(),
        goarch: "amd64".into(),
        go_version: "go1.22".into(),
        pid: 1234,
        cwd: "/tmp".into(),
        memstats: MemStats::default(),
    }
}

#[test]
fn append_and_latest() {
    let store = StatsStore::new(10);
    store.append(sample(1000, 5));
    store.append(sample(2000, 6));
    assert_eq!(store.latest().unwrap().goroutine_count, 6);
}

#[test]
fn window_filters_by_timestamp_range() {
    let store = StatsStore::new(10);
    for i in 0..5 {
        store.append(sample(i * 1000, i as u32));
    }
    let window = store.window(1000, 3000);
    assert_eq!(window.iter().map(|s| s.ts).collect::<Vec<_>>(), vec![1000, 2000, 3000]);
}

#[test]
fn ring_retains_samples_independent_of_aligner_outcome() {
    let store = StatsStore::new(3);
    // First two arrive too close together for the aligner (<500ms) but both
    // must still be retained in the ring.
    store.append(sample(0, 1));
    store.append(sample(100, 2));
    store.append(sample(200, 3));
    assert_eq!(store.snapshot().len(), 3);
}

#[test]
fn get_logical_resolves_nearest_grid_index() {
    let store = StatsStore::new(10);
    store.append(sample(0, 1));
    store.append(sample(1000, 2));
    assert_eq!(store.get_logical(1050), Some(1));
}

#[test]
fn aligned_window_fills_gaps_with_synthetic_slots() {
    let store = StatsStore::new(10);
    store.append(sample(0, 1));
    // A 3s real gap: logical 1 and 2 are synthetic, logical 3 carries the
    // real sample.
    store.append(sample(3000, 2));

    let aligned = store.aligned_window();
    assert_eq!(aligned.len(), 4);
    assert_eq!(aligned[0].logical, 0);
    assert!(aligned[0].stats.is_some());
    assert_eq!(aligned[1].logical, 1);
    assert!(aligned[1].stats.is_none());
    assert_eq!(aligned[1].ts, 1000);
    assert_eq!(aligned[2].logical, 2);
    assert!(aligned[2].stats.is_none());
    assert_eq!(aligned[2].ts, 2000);
    assert_eq!(aligned[3].logical, 3);
    assert_eq!(aligned[3].stats.as_ref().unwrap().goroutine_count, 2);
}
