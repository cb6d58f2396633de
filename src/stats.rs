// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic operational counters, observable independent of the registry.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counters. Cheap atomic increments; no lock needed.
#[derive(Default)]
pub struct Stats {
    total_connections: AtomicU64,
    total_bytes_relayed: AtomicU64,
    total_introductions: AtomicU64,
}

/// A point-in-time view of [`Stats`] plus registry-derived gauges.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub total_bytes_relayed: u64,
    pub total_introductions: u64,
    pub active_sessions: usize,
    pub active_peers: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed_bytes(&self, n: u64) {
        self.total_bytes_relayed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_introduction(&self) {
        self.total_introductions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_sessions: usize, active_peers: usize) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_bytes_relayed: self.total_bytes_relayed.load(Ordering::Relaxed),
            total_introductions: self.total_introductions.load(Ordering::Relaxed),
            active_sessions,
            active_peers,
        }
    }
}
