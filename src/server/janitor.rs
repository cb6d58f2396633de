// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic staleness sweep.
//!
//! Runs on a fixed cadence, evicts peers whose last heartbeat is older
//! than the configured threshold via the registry's standard remove
//! path, and notifies the departed peer's session mates.

use super::protocol::build_disconnect;
use super::registry::PeerRegistry;
use super::wire::{Frame, MessageType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub fn spawn(
    registry: Arc<RwLock<PeerRegistry>>,
    janitor_interval: Duration,
    stale_after: Duration,
    shutdown: Arc<tokio::sync::Notify>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(janitor_interval) => {
                    let evicted = {
                        let mut reg = registry.write().await;
                        reg.remove_expired(stale_after.as_secs())
                    };

                    if !evicted.is_empty() {
                        info!("janitor evicted {} stale peer(s)", evicted.len());
                    }

                    for (peer_id, mates) in evicted {
                        debug!("  - {}", peer_id);
                        let frame = Frame::new(MessageType::Disconnect, build_disconnect(&peer_id));
                        for mate in mates {
                            let _ = mate.outbound.send(frame.clone()).await;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    debug!("janitor shutting down");
                    break;
                }
            }
        }
    });
}
