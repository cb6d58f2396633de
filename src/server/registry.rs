// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer registry: the authoritative in-memory state of the relay server.
//!
//! Two indices are kept in lockstep: the peer table (peer id -> record)
//! and the session index (session code -> set of peer ids). Both are
//! guarded by the single lock the caller (the server) wraps this registry
//! in; every method here assumes exclusive access for writes.

use super::wire::Frame;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Coarse NAT classification derived from EXTERNAL_ADDR agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    Unknown,
    Cone,
    Symmetric,
}

/// One registered, currently connected peer.
pub struct PeerRecord {
    pub peer_id: String,
    pub session_code: String,
    /// Write capability on the peer's connection. The owning connection
    /// handler drains the paired receiver and writes frames to its TCP
    /// stream in order, so writes from other handlers never interleave.
    pub outbound: mpsc::Sender<Frame>,
    pub public_endpoint: SocketAddr,
    pub private_endpoint: Option<SocketAddr>,
    pub connected_at: u64,
    pub last_heartbeat: u64,
    pub nat_type: NatType,
    pub relayed_bytes: u64,
}

/// A read-only snapshot of a peer record, safe to hand out after the
/// registry lock is released.
#[derive(Clone)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub session_code: String,
    pub outbound: mpsc::Sender<Frame>,
    pub public_endpoint: SocketAddr,
    pub private_endpoint: Option<SocketAddr>,
}

impl From<&PeerRecord> for PeerSnapshot {
    fn from(r: &PeerRecord) -> Self {
        Self {
            peer_id: r.peer_id.clone(),
            session_code: r.session_code.clone(),
            outbound: r.outbound.clone(),
            public_endpoint: r.public_endpoint,
            private_endpoint: r.private_endpoint,
        }
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Authoritative peer table + session index.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerRecord>,
    sessions: HashMap<String, HashSet<String>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, displacing any prior record under the same id.
    ///
    /// If `peer_id` is already present, it is first removed from its old
    /// session's set (no notification is sent for this displacement; see
    /// the open question in the spec about re-registration).
    pub fn register(
        &mut self,
        peer_id: String,
        session_code: String,
        public_endpoint: SocketAddr,
        private_endpoint: Option<SocketAddr>,
        outbound: mpsc::Sender<Frame>,
    ) {
        if let Some(old) = self.peers.remove(&peer_id) {
            if let Some(set) = self.sessions.get_mut(&old.session_code) {
                set.remove(&peer_id);
                if set.is_empty() {
                    self.sessions.remove(&old.session_code);
                }
            }
        }

        let now = now_secs();
        let record = PeerRecord {
            peer_id: peer_id.clone(),
            session_code: session_code.clone(),
            outbound,
            public_endpoint,
            private_endpoint,
            connected_at: now,
            last_heartbeat: now,
            nat_type: NatType::Unknown,
            relayed_bytes: 0,
        };

        self.sessions
            .entry(session_code)
            .or_default()
            .insert(peer_id.clone());
        self.peers.insert(peer_id, record);
    }

    /// Remove a peer from both indices. Returns the session mates that
    /// remain, for the caller to notify (outside the registry lock).
    pub fn remove(&mut self, peer_id: &str) -> Option<Vec<PeerSnapshot>> {
        let record = self.peers.remove(peer_id)?;

        let mates = if let Some(set) = self.sessions.get_mut(&record.session_code) {
            set.remove(peer_id);
            let mates: Vec<PeerSnapshot> = set
                .iter()
                .filter_map(|id| self.peers.get(id))
                .map(PeerSnapshot::from)
                .collect();
            if set.is_empty() {
                self.sessions.remove(&record.session_code);
            }
            mates
        } else {
            Vec::new()
        };

        Some(mates)
    }

    /// Snapshot of every peer sharing the requester's session, excluding
    /// the requester itself.
    pub fn session_mates(&self, peer_id: &str) -> Vec<PeerSnapshot> {
        let Some(record) = self.peers.get(peer_id) else {
            return Vec::new();
        };
        let Some(set) = self.sessions.get(&record.session_code) else {
            return Vec::new();
        };
        set.iter()
            .filter(|id| id.as_str() != peer_id)
            .filter_map(|id| self.peers.get(id))
            .map(PeerSnapshot::from)
            .collect()
    }

    pub fn find(&self, peer_id: &str) -> Option<PeerSnapshot> {
        self.peers.get(peer_id).map(PeerSnapshot::from)
    }

    pub fn same_session(&self, a: &str, b: &str) -> bool {
        match (self.peers.get(a), self.peers.get(b)) {
            (Some(pa), Some(pb)) => pa.session_code == pb.session_code,
            _ => false,
        }
    }

    pub fn touch_heartbeat(&mut self, peer_id: &str) {
        if let Some(record) = self.peers.get_mut(peer_id) {
            record.last_heartbeat = now_secs();
        }
    }

    pub fn set_nat_type(&mut self, peer_id: &str, nat_type: NatType) {
        if let Some(record) = self.peers.get_mut(peer_id) {
            record.nat_type = nat_type;
        }
    }

    /// Add to a peer's cumulative relayed byte counter. Returns the new
    /// total, or `None` if the peer is gone.
    pub fn add_relayed(&mut self, peer_id: &str, n: u64) -> Option<u64> {
        let record = self.peers.get_mut(peer_id)?;
        record.relayed_bytes += n;
        Some(record.relayed_bytes)
    }

    /// Scan for peers whose heartbeat is older than `stale_after_secs`
    /// and remove them. Returns, for each evicted peer, its id and the
    /// session mates that should be notified.
    pub fn remove_expired(&mut self, stale_after_secs: u64) -> Vec<(String, Vec<PeerSnapshot>)> {
        let now = now_secs();
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, r)| now.saturating_sub(r.last_heartbeat) > stale_after_secs)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| {
                let mates = self.remove(&id)?;
                Some((id, mates))
            })
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Test-only hook to simulate a peer going silent without sleeping
    /// for real wall-clock time.
    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&mut self, peer_id: &str, secs_ago: u64) {
        if let Some(record) = self.peers.get_mut(peer_id) {
            record.last_heartbeat = now_secs().saturating_sub(secs_ago);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn channel() -> mpsc::Sender<Frame> {
        mpsc::channel(8).0
    }

    #[test]
    fn test_register_creates_session() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        assert_eq!(reg.peer_count(), 1);
        assert_eq!(reg.session_count(), 1);
        assert!(reg.find("a").is_some());
    }

    #[test]
    fn test_session_mates_excludes_requester() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.register("b".into(), "xyz".into(), addr(2), None, channel());

        let mates = reg.session_mates("a");
        assert_eq!(mates.len(), 1);
        assert_eq!(mates[0].peer_id, "b");
    }

    #[test]
    fn test_single_peer_session_has_no_mates() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        assert!(reg.session_mates("a").is_empty());
    }

    #[test]
    fn test_remove_drops_empty_session() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        let mates = reg.remove("a").unwrap();
        assert!(mates.is_empty());
        assert_eq!(reg.peer_count(), 0);
        assert_eq!(reg.session_count(), 0);
    }

    #[test]
    fn test_remove_notifies_mates() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.register("b".into(), "xyz".into(), addr(2), None, channel());

        let mates = reg.remove("a").unwrap();
        assert_eq!(mates.len(), 1);
        assert_eq!(mates[0].peer_id, "b");
        assert_eq!(reg.peer_count(), 1);
        assert_eq!(reg.session_count(), 1);
    }

    #[test]
    fn test_reregister_same_id_moves_session() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "s1".into(), addr(1), None, channel());
        reg.register("a".into(), "s2".into(), addr(2), None, channel());

        assert_eq!(reg.peer_count(), 1);
        assert_eq!(reg.find("a").unwrap().session_code, "s2");
        // s1 must have no trace of "a" left.
        assert!(!reg
            .session_mates("a")
            .iter()
            .any(|p| p.session_code == "s1"));
    }

    #[test]
    fn test_reregister_same_peer_session_is_idempotent() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        assert_eq!(reg.peer_count(), 1);
        assert_eq!(reg.session_count(), 1);
    }

    #[test]
    fn test_touch_heartbeat_updates_timestamp() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.backdate_heartbeat("a", 200);
        reg.touch_heartbeat("a");
        // With last_heartbeat reset to now, a 90s threshold must not evict it.
        assert!(reg.remove_expired(90).is_empty());
        assert!(reg.find("a").is_some());
    }

    #[test]
    fn test_remove_expired_evicts_stale_peers() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        if let Some(r) = reg.peers.get_mut("a") {
            r.last_heartbeat = now_secs().saturating_sub(200);
        }
        reg.register("b".into(), "xyz".into(), addr(2), None, channel());

        let expired = reg.remove_expired(90);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "a");
        assert_eq!(reg.peer_count(), 1);
    }

    #[test]
    fn test_add_relayed_accumulates() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.add_relayed("a", 10);
        let total = reg.add_relayed("a", 5).unwrap();
        assert_eq!(total, 15);
    }

    #[test]
    fn test_set_nat_type() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.set_nat_type("a", NatType::Symmetric);
        assert_eq!(reg.peers.get("a").unwrap().nat_type, NatType::Symmetric);
    }

    #[test]
    fn test_same_session() {
        let mut reg = PeerRegistry::new();
        reg.register("a".into(), "xyz".into(), addr(1), None, channel());
        reg.register("b".into(), "xyz".into(), addr(2), None, channel());
        reg.register("c".into(), "other".into(), addr(3), None, channel());
        assert!(reg.same_session("a", "b"));
        assert!(!reg.same_session("a", "c"));
    }
}
