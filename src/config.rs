// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay server configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 9000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds without a heartbeat before the janitor evicts a peer.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Cadence of the janitor's staleness scan.
    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    /// Maximum frame payload size (bytes). Hard-capped at 10 MiB by the
    /// wire format regardless of this setting.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    9000
}

fn default_stale_after() -> u64 {
    90
}

fn default_janitor_interval() -> u64 {
    60
}

fn default_max_frame_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            stale_after_secs: default_stale_after(),
            janitor_interval_secs: default_janitor_interval(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.stale_after_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "stale_after_secs cannot be 0".into(),
            ));
        }
        if self.janitor_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "janitor_interval_secs cannot be 0".into(),
            ));
        }
        if self.max_frame_size > 10 * 1024 * 1024 {
            return Err(ConfigError::InvalidValue(
                "max_frame_size cannot exceed the 10 MiB protocol cap".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
