// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

#[test]
fn get_since_zero_returns_everything() {
    let map: VersionedMap<&str, i32> = VersionedMap::new();
    map.set_and_inc_version("a", 1);
    map.set_and_inc_version("b", 2);
    map.set_and_inc_version("c", 3);

    let (delta, v1) = map.get_since(0);
    assert_eq!(delta.len(), 3);
    assert!(v1 > 0);

    let (delta, v2) = map.get_since(v1);
    assert!(delta.is_empty());
    assert_eq!(v2, v1);
}

#[test]
fn updating_one_key_only_reports_that_key() {
    let map: VersionedMap<&str, i32> = VersionedMap::new();
    map.set_and_inc_version("a", 1);
    map.set_and_inc_version("b", 2);
    map.set_and_inc_version("c", 3);
    let (_, v1) = map.get_since(0);

    let v2 = map.set_and_inc_version("b", 20);
    assert!(v2 > v1);

    let (delta, reported) = map.get_since(v1);
    assert_eq!(delta, vec![("b", 20)]);
    assert_eq!(reported, v2);
}

#[test]
fn set_without_inc_does_not_advance_version() {
    let map: VersionedMap<&str, i32> = VersionedMap::new();
    let v0 = map.version();
    map.set("a", 1);
    assert_eq!(map.version(), v0);
}

proptest! {
    /// For a sequence of `set_and_inc_version` calls on distinct keys with
    /// strictly increasing versions, `get_since(v)` returns exactly the keys
    /// written after `v`, and reports `new_version` as the latest version.
    #[test]
    fn prop_get_since_exact_delta(n in 1usize..40, cut in 0usize..40) {
        let map: VersionedMap<usize, usize> = VersionedMap::new();
        let mut versions = Vec::new();
        for i in 0..n {
            let v = map.set_and_inc_version(i, i);
            versions.push(v);
        }
        let cut = cut.min(n.saturating_sub(1));
        let cutoff_version = if n == 0 { 0 } else { versions[cut] };

        let (delta, reported) = map.get_since(cutoff_version);
        let mut expected: Vec<usize> = (0..n).filter(|&i| versions[i] > cutoff_version).collect();
        let mut got: Vec<usize> = delta.iter().map(|(k, _)| *k).collect();
        expected.sort_unstable();
        got.sort_unstable();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(reported, *versions.last().unwrap_or(&0));
    }
}
