// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame codec for the relay wire protocol.
//!
//! Every message on the wire:
//!
//! ```text
//! +-----------+------------------+-------------------+
//! | type (1B) | length (4B BE)   | payload (length B) |
//! +-----------+------------------+-------------------+
//! ```
//!
//! `length` may be zero. A length greater than [`MAX_PAYLOAD_LEN`] is a
//! fatal framing error: the connection is dropped without a reply.

/// Hard cap on a single frame's payload, per the protocol.
pub const MAX_PAYLOAD_LEN: usize = 10 * 1024 * 1024;

/// Known message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Register,
    RegisterAck,
    PeerList,
    Connect,
    ConnectAck,
    Data,
    Heartbeat,
    Disconnect,
    PunchRequest,
    PunchSync,
    ExternalAddr,
    Error,
    /// Any code not in the known table. Frames carrying this type are
    /// parsed far enough to skip their payload and are then ignored.
    Unknown(u8),
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            Self::Register => 0x01,
            Self::RegisterAck => 0x02,
            Self::PeerList => 0x03,
            Self::Connect => 0x04,
            Self::ConnectAck => 0x05,
            Self::Data => 0x06,
            Self::Heartbeat => 0x07,
            Self::Disconnect => 0x08,
            Self::PunchRequest => 0x10,
            Self::PunchSync => 0x11,
            Self::ExternalAddr => 0x12,
            Self::Error => 0xFF,
            Self::Unknown(c) => c,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Register,
            0x02 => Self::RegisterAck,
            0x03 => Self::PeerList,
            0x04 => Self::Connect,
            0x05 => Self::ConnectAck,
            0x06 => Self::Data,
            0x07 => Self::Heartbeat,
            0x08 => Self::Disconnect,
            0x10 => Self::PunchRequest,
            0x11 => Self::PunchSync,
            0x12 => Self::ExternalAddr,
            0xFF => Self::Error,
            other => Self::Unknown(other),
        }
    }
}

/// A decoded or to-be-encoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// Serialize this frame to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.payload.len());
        out.push(self.msg_type.code());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Framing error types.
#[derive(Debug, Clone)]
pub enum WireError {
    /// Payload length exceeded [`MAX_PAYLOAD_LEN`]; fatal to the connection.
    Oversize(u32),
    Io(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversize(len) => write!(f, "frame of {} bytes exceeds the 10 MiB cap", len),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for WireError {}
