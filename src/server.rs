// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay server core implementation.

use crate::config::ServerConfig;
use crate::stats::{Stats, StatsSnapshot};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod connection;
pub mod janitor;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use connection::{ConnectionError, PeerConnection};
use protocol::{
    build_disconnect, build_peer_list, build_punch_sync, build_relayed_data, parse_data,
    parse_external_addr, parse_register, parse_target_id, EndpointDescriptor,
};
pub use registry::{NatType, PeerRegistry};
use wire::{Frame, MessageType};

/// Rendezvous and relay server.
#[derive(Clone)]
pub struct RelayServer {
    config: Arc<ServerConfig>,
    registry: Arc<RwLock<PeerRegistry>>,
    stats: Arc<Stats>,
    shutdown: Arc<tokio::sync::Notify>,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(RwLock::new(PeerRegistry::new())),
            stats: Arc::new(Stats::new()),
            shutdown: Arc::new(tokio::sync::Notify::new()),
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    /// Run the relay server until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        use std::sync::atomic::Ordering;
        use tokio::net::TcpListener;

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        info!("relay server listening on {}", addr);

        janitor::spawn(
            self.registry.clone(),
            self.config.janitor_interval(),
            self.config.stale_after(),
            self.shutdown.clone(),
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("new connection from {}", peer_addr);
                            self.stats.record_connection();

                            let registry = self.registry.clone();
                            let stats = self.stats.clone();
                            let shutdown = self.shutdown.clone();
                            let max_frame_size = self.config.max_frame_size;

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    peer_addr,
                                    registry,
                                    stats,
                                    shutdown,
                                    max_frame_size,
                                )
                                .await
                                {
                                    warn!("connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<RwLock<PeerRegistry>>,
        stats: Arc<Stats>,
        shutdown: Arc<tokio::sync::Notify>,
        max_frame_size: usize,
    ) -> Result<(), ServerError> {
        let mut conn = PeerConnection::new(stream, peer_addr, max_frame_size);
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<Frame>(100);

        loop {
            tokio::select! {
                result = conn.read_frame() => {
                    match result {
                        Ok(Some(frame)) => {
                            Self::process_frame(&mut conn, frame, &registry, &stats, outbound_tx.clone()).await;
                        }
                        Ok(None) => {
                            debug!("connection closed: {}", peer_addr);
                            break;
                        }
                        Err(e) => {
                            warn!("frame error from {}: {}", peer_addr, e);
                            break;
                        }
                    }
                }
                Some(out) = outbound_rx.recv() => {
                    if let Err(e) = conn.write_frame(&out).await {
                        warn!("failed to write to {}: {}", peer_addr, e);
                        break;
                    }
                }
                _ = shutdown.notified() => {
                    debug!("connection handler shutting down: {}", peer_addr);
                    break;
                }
            }
        }

        if let Some(peer_id) = conn.peer_id() {
            let mates = {
                let mut reg = registry.write().await;
                reg.remove(peer_id)
            };
            if let Some(mates) = mates {
                info!("removed peer {} on disconnect", peer_id);
                let frame = Frame::new(MessageType::Disconnect, build_disconnect(peer_id));
                for mate in mates {
                    let _ = mate.outbound.send(frame.clone()).await;
                }
            }
        }

        Ok(())
    }

    /// Dispatch one decoded frame per the connection's current state.
    async fn process_frame(
        conn: &mut PeerConnection,
        frame: Frame,
        registry: &Arc<RwLock<PeerRegistry>>,
        stats: &Arc<Stats>,
        outbound_tx: tokio::sync::mpsc::Sender<Frame>,
    ) {
        // AwaitingRegister: only REGISTER is acted on; everything else is
        // ignored without reply until the peer has registered.
        if conn.peer_id().is_none() {
            if matches!(frame.msg_type, MessageType::Register) {
                Self::handle_register(conn, &frame.payload, registry, outbound_tx).await;
            }
            return;
        }

        // A second REGISTER on an already-bound connection is ignored;
        // the first REGISTER is binding (see the spec's open question).
        match frame.msg_type {
            MessageType::Register => {}
            MessageType::PeerList => Self::handle_peer_list(conn, registry).await,
            MessageType::Connect => {
                Self::handle_connect(conn, &frame.payload, registry, stats).await
            }
            MessageType::PunchRequest => {
                Self::handle_punch_request(conn, &frame.payload, registry).await
            }
            MessageType::Data => {
                Self::handle_data(conn, &frame.payload, registry, stats).await
            }
            MessageType::Heartbeat => Self::handle_heartbeat(conn, registry).await,
            MessageType::ExternalAddr => {
                Self::handle_external_addr(conn, &frame.payload, registry).await
            }
            // Server-originated-only or client-is-never-expected-to-send
            // types: no defined action, just noted for diagnosis.
            MessageType::RegisterAck
            | MessageType::ConnectAck
            | MessageType::PunchSync
            | MessageType::Disconnect
            | MessageType::Error => {
                debug!("unexpected {:?} received from a client", frame.msg_type);
            }
            MessageType::Unknown(code) => {
                debug!("ignoring unknown message type 0x{:02x}", code);
            }
        }
    }

    async fn handle_register(
        conn: &mut PeerConnection,
        payload: &[u8],
        registry: &Arc<RwLock<PeerRegistry>>,
        outbound_tx: tokio::sync::mpsc::Sender<Frame>,
    ) {
        let req = match parse_register(payload) {
            Ok(req) => req,
            Err(e) => {
                let _ = conn
                    .write_frame(&Frame::new(
                        MessageType::Error,
                        e.to_string().into_bytes(),
                    ))
                    .await;
                return;
            }
        };

        let public_endpoint = conn.peer_addr();
        let peer_id = req.peer_id.clone();

        {
            let mut reg = registry.write().await;
            reg.register(
                req.peer_id,
                req.session_code.clone(),
                public_endpoint,
                req.private_endpoint,
                outbound_tx,
            );
        }

        conn.set_peer_id(peer_id.clone());

        if conn
            .write_frame(&Frame::new(MessageType::RegisterAck, b"OK".to_vec()))
            .await
            .is_err()
        {
            return;
        }

        let mates = {
            let reg = registry.read().await;
            reg.session_mates(&peer_id)
        };
        let notify = Frame::new(
            MessageType::PeerList,
            build_peer_list(&[(peer_id.as_str(), public_endpoint)]),
        );
        for mate in mates {
            let _ = mate.outbound.send(notify.clone()).await;
        }

        info!("registered peer {} in session {}", peer_id, req.session_code);
    }

    async fn handle_peer_list(conn: &mut PeerConnection, registry: &Arc<RwLock<PeerRegistry>>) {
        let peer_id = conn.peer_id().expect("registered").to_string();
        let mates = {
            let reg = registry.read().await;
            if reg.find(&peer_id).is_none() {
                None
            } else {
                Some(reg.session_mates(&peer_id))
            }
        };
        let Some(mates) = mates else {
            let _ = send_error(conn, "Not registered").await;
            return;
        };
        let entries: Vec<(&str, SocketAddr)> = mates
            .iter()
            .map(|m| (m.peer_id.as_str(), m.public_endpoint))
            .collect();
        let frame = Frame::new(MessageType::PeerList, build_peer_list(&entries));
        let _ = conn.write_frame(&frame).await;
    }

    async fn handle_connect(
        conn: &mut PeerConnection,
        payload: &[u8],
        registry: &Arc<RwLock<PeerRegistry>>,
        stats: &Arc<Stats>,
    ) {
        let target_id = match parse_target_id(payload) {
            Ok(id) => id,
            Err(e) => {
                let _ = send_error(conn, &e.to_string()).await;
                return;
            }
        };
        let self_id = conn.peer_id().expect("registered").to_string();

        let (target, requester) = {
            let reg = registry.read().await;
            (reg.find(&target_id), reg.find(&self_id))
        };

        let Some(target) = target else {
            let _ = send_error(conn, "Peer not found").await;
            return;
        };
        let Some(requester) = requester else {
            let _ = send_error(conn, "Not registered").await;
            return;
        };
        if requester.session_code != target.session_code {
            let _ = send_error(conn, "Session mismatch").await;
            return;
        }

        let requester_desc = EndpointDescriptor {
            peer_id: &self_id,
            public: requester.public_endpoint,
            private: requester.private_endpoint,
        };
        let connect_frame = Frame::new(MessageType::Connect, requester_desc.encode());
        let _ = target.outbound.send(connect_frame).await;

        let target_desc = EndpointDescriptor {
            peer_id: &target_id,
            public: target.public_endpoint,
            private: target.private_endpoint,
        };
        let _ = conn
            .write_frame(&Frame::new(MessageType::ConnectAck, target_desc.encode()))
            .await;

        stats.record_introduction();
    }

    async fn handle_punch_request(
        conn: &mut PeerConnection,
        payload: &[u8],
        registry: &Arc<RwLock<PeerRegistry>>,
    ) {
        let target_id = match parse_target_id(payload) {
            Ok(id) => id,
            Err(e) => {
                let _ = send_error(conn, &e.to_string()).await;
                return;
            }
        };
        let self_id = conn.peer_id().expect("registered").to_string();

        let (target, requester) = {
            let reg = registry.read().await;
            (reg.find(&target_id), reg.find(&self_id))
        };

        let Some(target) = target else {
            let _ = send_error(conn, "Peer not found").await;
            return;
        };
        let Some(requester) = requester else {
            let _ = send_error(conn, "Not registered").await;
            return;
        };

        let punch_time_ms = now_ms() + 500;

        let to_target = build_punch_sync(punch_time_ms, requester.public_endpoint);
        let _ = target
            .outbound
            .send(Frame::new(MessageType::PunchSync, to_target))
            .await;

        let to_requester = build_punch_sync(punch_time_ms, target.public_endpoint);
        let _ = conn
            .write_frame(&Frame::new(MessageType::PunchSync, to_requester))
            .await;
    }

    async fn handle_data(
        conn: &mut PeerConnection,
        payload: &[u8],
        registry: &Arc<RwLock<PeerRegistry>>,
        stats: &Arc<Stats>,
    ) {
        let req = match parse_data(payload) {
            Ok(req) => req,
            Err(e) => {
                debug!("malformed DATA payload: {}", e);
                return;
            }
        };
        let self_id = conn.peer_id().expect("registered").to_string();

        let target = {
            let reg = registry.read().await;
            if !reg.same_session(&self_id, &req.target_id) {
                None
            } else {
                reg.find(&req.target_id)
            }
        };

        let Some(target) = target else {
            warn!(
                "dropping DATA from {} to {}: not found or session mismatch",
                self_id, req.target_id
            );
            return;
        };

        let relay_frame = Frame::new(
            MessageType::Data,
            build_relayed_data(&self_id, &req.opaque),
        );

        if target.outbound.send(relay_frame).await.is_ok() {
            let n = req.opaque.len() as u64;
            stats.record_relayed_bytes(n);
            let mut reg = registry.write().await;
            reg.add_relayed(&self_id, n);
        } else {
            debug!("relay write to {} failed, dropping silently", req.target_id);
        }
    }

    async fn handle_heartbeat(conn: &mut PeerConnection, registry: &Arc<RwLock<PeerRegistry>>) {
        let self_id = conn.peer_id().expect("registered").to_string();
        {
            let mut reg = registry.write().await;
            reg.touch_heartbeat(&self_id);
        }
        let _ = conn
            .write_frame(&Frame::new(MessageType::Heartbeat, Vec::new()))
            .await;
    }

    async fn handle_external_addr(
        conn: &mut PeerConnection,
        payload: &[u8],
        registry: &Arc<RwLock<PeerRegistry>>,
    ) {
        let reported = match parse_external_addr(payload) {
            Ok(addr) => addr,
            Err(e) => {
                debug!("malformed EXTERNAL_ADDR payload: {}", e);
                return;
            }
        };
        let self_id = conn.peer_id().expect("registered").to_string();

        let mut reg = registry.write().await;
        if let Some(record) = reg.find(&self_id) {
            let nat_type = if reported.ip() != record.public_endpoint.ip() {
                NatType::Symmetric
            } else {
                NatType::Cone
            };
            reg.set_nat_type(&self_id, nat_type);
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn stats_snapshot(&self) -> StatsSnapshot {
        let reg = self.registry.read().await;
        self.stats.snapshot(reg.session_count(), reg.peer_count())
    }
}

async fn send_error(conn: &mut PeerConnection, message: &str) -> Result<(), ConnectionError> {
    conn.write_frame(&Frame::new(
        MessageType::Error,
        message.as_bytes().to_vec(),
    ))
    .await
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Bind(String),
    AlreadyRunning,
    Io(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "configuration error: {}", s),
            Self::Bind(s) => write!(f, "bind error: {}", s),
            Self::AlreadyRunning => write!(f, "server already running"),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<ConnectionError> for ServerError {
    fn from(e: ConnectionError) -> Self {
        Self::Io(e.to_string())
    }
}
