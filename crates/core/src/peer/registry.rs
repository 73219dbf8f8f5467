// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide registry of [`AppRunPeer`]s, keyed by `AppRunId`. Peers are
//! created lazily on first reference (ingest handshake or query for an
//! unknown id) and retained for the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::peer::{AppRunId, AppRunPeer, PeerLimits};

/// Owns every live [`AppRunPeer`]. Readers take a read lock to clone an
/// `Arc`; only peer creation takes the write lock.
pub struct PeerRegistry {
    peers: RwLock<HashMap<AppRunId, Arc<AppRunPeer>>>,
    limits: PeerLimits,
}

impl PeerRegistry {
    pub fn new(limits: PeerLimits) -> Self {
        Self { peers: RwLock::new(HashMap::new()), limits }
    }

    /// Fetch the peer for `apprunid`, creating it if this is the first
    /// reference. The ingest handler and any query path share this path,
    /// per the spec's lazy-creation lifecycle rule.
    pub fn get_or_create(&self, apprunid: &str) -> Arc<AppRunPeer> {
        if let Some(peer) = self.peers.read().get(apprunid) {
            return Arc::clone(peer);
        }
        let mut peers = self.peers.write();
        if let Some(peer) = peers.get(apprunid) {
            return Arc::clone(peer);
        }
        let peer = Arc::new(AppRunPeer::new(apprunid.to_owned(), self.limits));
        peers.insert(apprunid.to_owned(), Arc::clone(&peer));
        peer
    }

    /// Fetch the peer for `apprunid` without creating one. Query paths that
    /// must treat an unknown id as `NotFound` use this instead of
    /// [`Self::get_or_create`].
    pub fn get(&self, apprunid: &str) -> Option<Arc<AppRunPeer>> {
        self.peers.read().get(apprunid).cloned()
    }

    /// Snapshot of every known peer, in no particular order; callers
    /// sort by whatever field the query needs (e.g. `start_ts desc` for
    /// `ListAppRuns`).
    pub fn list(&self) -> Vec<Arc<AppRunPeer>> {
        self.peers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
