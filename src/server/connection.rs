// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client connection handling for the relay server.

use super::wire::{Frame, MessageType, WireError, MAX_PAYLOAD_LEN};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A connected peer's socket, plus the framing state needed to read and
/// write messages on it.
pub struct PeerConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    peer_id: Option<String>,
    read_buffer: Vec<u8>,
}

impl PeerConnection {
    /// `max_frame_size` is the configured oversize cutoff; it is clamped
    /// to [`MAX_PAYLOAD_LEN`] by [`crate::config::ServerConfig::validate`],
    /// so it can only ever tighten the protocol's hard cap, never loosen it.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer_addr,
            max_frame_size,
            peer_id: None,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    /// Address observed by the server on accept; this is the peer's
    /// public endpoint.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The peer id bound to this connection after a successful REGISTER.
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn set_peer_id(&mut self, peer_id: String) {
        self.peer_id = Some(peer_id);
    }

    /// Read the next frame from the socket.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames (graceful close).
    /// An EOF in the middle of a frame is reported as [`ConnectionError::Io`].
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let mut header = [0u8; 5];
        match self.stream.read_exact(&mut header[..1]).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ConnectionError::Io(e.to_string())),
        }
        self.stream
            .read_exact(&mut header[1..5])
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        let msg_type = MessageType::from_code(header[0]);
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

        if len as usize > self.max_frame_size {
            return Err(ConnectionError::Wire(WireError::Oversize(len)));
        }

        self.read_buffer.clear();
        self.read_buffer.resize(len as usize, 0);
        if len > 0 {
            self.stream
                .read_exact(&mut self.read_buffer)
                .await
                .map_err(|e| ConnectionError::Io(e.to_string()))?;
        }

        Ok(Some(Frame::new(msg_type, self.read_buffer.clone())))
    }

    /// Write a frame to the socket.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        self.stream
            .write_all(&frame.encode())
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))
    }
}

/// Connection error types.
#[derive(Debug)]
pub enum ConnectionError {
    Io(String),
    Wire(WireError),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {}", s),
            Self::Wire(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<WireError> for ConnectionError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_write_then_read_frame() {
        let (client, server) = pair().await;
        let addr = server.peer_addr().unwrap();
        let mut writer_conn = PeerConnection::new(client, addr, MAX_PAYLOAD_LEN);
        let mut reader_conn = PeerConnection::new(server, addr, MAX_PAYLOAD_LEN);

        writer_conn
            .write_frame(&Frame::new(MessageType::Heartbeat, vec![]))
            .await
            .unwrap();

        let frame = reader_conn.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.msg_type.code(), MessageType::Heartbeat.code());
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_eof_returns_none() {
        let (client, server) = pair().await;
        let addr = server.peer_addr().unwrap();
        drop(client);
        let mut conn = PeerConnection::new(server, addr, MAX_PAYLOAD_LEN);
        let result = conn.read_frame().await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let (mut client, server) = pair().await;
        let addr = server.peer_addr().unwrap();
        let mut conn = PeerConnection::new(server, addr, MAX_PAYLOAD_LEN);

        let mut header = vec![0x06u8];
        header.extend_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_be_bytes());
        client.write_all(&header).await.unwrap();

        let result = conn.read_frame().await;
        assert!(matches!(result, Err(ConnectionError::Wire(WireError::Oversize(_)))));
    }

    #[tokio::test]
    async fn test_configured_max_frame_size_below_protocol_cap_is_enforced() {
        let (mut client, server) = pair().await;
        let addr = server.peer_addr().unwrap();
        let mut conn = PeerConnection::new(server, addr, 16);

        let mut header = vec![0x06u8];
        header.extend_from_slice(&17u32.to_be_bytes());
        client.write_all(&header).await.unwrap();

        let result = conn.read_frame().await;
        assert!(matches!(result, Err(ConnectionError::Wire(WireError::Oversize(_)))));
    }
}
