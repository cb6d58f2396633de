// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay protocol message payloads.
//!
//! All length prefixes for identifiers, IPs, and session codes are a
//! single unsigned byte (max 255 bytes each); multi-byte integers are
//! big-endian. This module only encodes/decodes payload bytes — the
//! handlers in `server.rs` decide what to do with the decoded values.

use std::net::{IpAddr, SocketAddr};

/// A peer endpoint as carried on the wire: `id_len | id | ip_len | ip |
/// port(2B)`, with an optional trailing private endpoint.
pub struct EndpointDescriptor<'a> {
    pub peer_id: &'a str,
    pub public: SocketAddr,
    pub private: Option<SocketAddr>,
}

impl<'a> EndpointDescriptor<'a> {
    /// Encode without the peer id prefix (used by PEER_LIST entries,
    /// which carry the id separately as part of the repeated block).
    fn encode_endpoint(buf: &mut Vec<u8>, addr: SocketAddr) {
        let ip = addr.ip().to_string();
        buf.push(ip.len() as u8);
        buf.extend_from_slice(ip.as_bytes());
        buf.extend_from_slice(&addr.port().to_be_bytes());
    }

    /// `id_len | id | ip_len | ip | port(2B) [ | priv_ip_len | priv_ip | priv_port(2B) ]?`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(self.peer_id.len() as u8);
        buf.extend_from_slice(self.peer_id.as_bytes());
        Self::encode_endpoint(&mut buf, self.public);
        if let Some(private) = self.private {
            Self::encode_endpoint(&mut buf, private);
        }
        buf
    }
}

/// Parsed REGISTER payload.
pub struct RegisterRequest {
    pub peer_id: String,
    pub session_code: String,
    pub private_endpoint: Option<SocketAddr>,
}

/// `peer_id_len | peer_id | session_code_len | session_code [ | priv_ip_len | priv_ip | priv_port(2B) ]?`
pub fn parse_register(payload: &[u8]) -> Result<RegisterRequest, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let peer_id = cursor.read_str()?;
    let session_code = cursor.read_str()?;

    let private_endpoint = if cursor.remaining() > 0 {
        let priv_ip = cursor.read_str()?;
        let priv_port = cursor.read_u16()?;
        let ip: IpAddr = priv_ip
            .parse()
            .map_err(|_| ProtocolError::Malformed("invalid private IP"))?;
        Some(SocketAddr::new(ip, priv_port))
    } else {
        None
    };

    if peer_id.is_empty() || session_code.is_empty() {
        return Err(ProtocolError::Malformed("empty peer_id or session_code"));
    }

    Ok(RegisterRequest {
        peer_id,
        session_code,
        private_endpoint,
    })
}

/// `target_id_len | target_id` — shared by CONNECT and PUNCH_REQUEST.
pub fn parse_target_id(payload: &[u8]) -> Result<String, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    cursor.read_str()
}

/// `target_id_len | target_id | opaque_bytes`
pub struct DataRequest {
    pub target_id: String,
    pub opaque: Vec<u8>,
}

pub fn parse_data(payload: &[u8]) -> Result<DataRequest, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let target_id = cursor.read_str()?;
    let opaque = cursor.read_rest().to_vec();
    Ok(DataRequest { target_id, opaque })
}

/// `ip_len | ip | port(2B, BE)` — the EXTERNAL_ADDR payload.
pub fn parse_external_addr(payload: &[u8]) -> Result<SocketAddr, ProtocolError> {
    let mut cursor = Cursor::new(payload);
    let ip_str = cursor.read_str()?;
    let port = cursor.read_u16()?;
    let ip: IpAddr = ip_str
        .parse()
        .map_err(|_| ProtocolError::Malformed("invalid IP in EXTERNAL_ADDR"))?;
    Ok(SocketAddr::new(ip, port))
}

/// `count(1B) || [ peer_id_len | peer_id | ip_len | ip | port(2B) ] x count`
pub fn build_peer_list(entries: &[(&str, SocketAddr)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(entries.len() as u8);
    for (peer_id, addr) in entries {
        buf.push(peer_id.len() as u8);
        buf.extend_from_slice(peer_id.as_bytes());
        let ip = addr.ip().to_string();
        buf.push(ip.len() as u8);
        buf.extend_from_slice(ip.as_bytes());
        buf.extend_from_slice(&addr.port().to_be_bytes());
    }
    buf
}

/// `from_id_len | from_id | opaque_bytes` — the relayed DATA frame body.
pub fn build_relayed_data(from_id: &str, opaque: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + from_id.len() + opaque.len());
    buf.push(from_id.len() as u8);
    buf.extend_from_slice(from_id.as_bytes());
    buf.extend_from_slice(opaque);
    buf
}

/// `T(8B, BE) || ip_len | ip | port(2B)` — the PUNCH_SYNC payload.
pub fn build_punch_sync(punch_time_ms: u64, target_addr: SocketAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 3 + 16);
    buf.extend_from_slice(&punch_time_ms.to_be_bytes());
    let ip = target_addr.ip().to_string();
    buf.push(ip.len() as u8);
    buf.extend_from_slice(ip.as_bytes());
    buf.extend_from_slice(&target_addr.port().to_be_bytes());
    buf
}

/// `peer_id_len | peer_id` — the DISCONNECT payload.
pub fn build_disconnect(peer_id: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + peer_id.len());
    buf.push(peer_id.len() as u8);
    buf.extend_from_slice(peer_id.as_bytes());
    buf
}

/// A minimal byte cursor for the one-byte-length-prefixed fields this
/// protocol uses throughout.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(ProtocolError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        if self.remaining() < 2 {
            return Err(ProtocolError::Truncated);
        }
        let bytes = [self.buf[self.pos], self.buf[self.pos + 1]];
        self.pos += 2;
        Ok(u16::from_be_bytes(bytes))
    }

    fn read_str(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_byte()? as usize;
        if self.remaining() < len {
            return Err(ProtocolError::Truncated);
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Malformed("invalid UTF-8"))
    }

    fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Protocol payload error types.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    /// Payload ended before a declared field could be read.
    Truncated,
    /// A field's bytes could not be interpreted (e.g. bad UTF-8 or IP).
    Malformed(&'static str),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "payload truncated"),
            Self::Malformed(what) => write!(f, "malformed payload: {}", what),
        }
    }
}

impl std::error::Error for ProtocolError {}
