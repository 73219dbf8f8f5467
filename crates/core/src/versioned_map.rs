// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed store where every entry carries a monotonic version, enabling
//! incremental delta reads. Backs the per-peer goroutine snapshot and watch
//! value stores so the UI can poll with `since_version` instead of refetching
//! the whole map.

use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;

struct Inner<K, V> {
    entries: HashMap<K, Versioned<V>>,
    next_version: u64,
}

#[derive(Clone)]
struct Versioned<V> {
    value: V,
    version: u64,
}

/// A map from `K` to `V` where every write is tagged with a strictly
/// increasing version number.
pub struct VersionedMap<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> VersionedMap<K, V> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { entries: HashMap::new(), next_version: 1 }) }
    }

    /// Store `value` at the map's current version without advancing it.
    /// Used when multiple keys should appear to have changed atomically at
    /// the same version (e.g. a bulk snapshot load).
    pub fn set(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let version = inner.next_version;
        inner.entries.insert(key, Versioned { value, version });
    }

    /// Advance the map's version, then store `value` at the new version.
    /// This is the normal write path: every mutating packet bumps the
    /// version so readers can detect the change.
    pub fn set_and_inc_version(&self, key: K, value: V) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_version += 1;
        let version = inner.next_version;
        inner.entries.insert(key, Versioned { value, version });
        version
    }

    /// Current version snapshot (the highest version assigned so far).
    pub fn version(&self) -> u64 {
        self.inner.lock().next_version
    }

    /// Fetch a single value by key, ignoring version.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).map(|v| v.value.clone())
    }

    /// Return every entry with `version > since`, plus the map's current
    /// version snapshot taken atomically with the read.
    pub fn get_since(&self, since: u64) -> (Vec<(K, V)>, u64) {
        let inner = self.inner.lock();
        let delta = inner
            .entries
            .iter()
            .filter(|(_, v)| v.version > since)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect();
        (delta, inner.next_version)
    }

    /// Iterate every entry under the lock.
    pub fn for_each<F: FnMut(&K, &V, u64)>(&self, mut f: F) {
        let inner = self.inner.lock();
        for (k, v) in inner.entries.iter() {
            f(k, &v.value, v.version);
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot all values, discarding version information.
    pub fn values(&self) -> Vec<V> {
        self.inner.lock().entries.values().map(|v| v.value.clone()).collect()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for VersionedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "versioned_map_tests.rs"]
mod tests;
