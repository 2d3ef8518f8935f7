//! Engine configuration
//!
//! This module contains all configuration options for the engine.

use crate::error::{EngineError, Result};
use crate::net::PortSequence;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for `peer_handshake_timeout_secs` (one day)
pub const MAX_PEER_HANDSHAKE_TIMEOUT_SECS: u64 = 86_400;

/// Main configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory to save downloads
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Candidate ports for incoming peer connections, e.g. "6881-6999"
    /// or "6881,6885-6889"
    #[serde(default = "default_listen_port")]
    pub listen_port: String,

    /// Local address the peer listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// What to do when no candidate port can be bound
    #[serde(default)]
    pub on_bind_exhausted: BindExhaustedPolicy,

    /// Scheduler tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Time an inbound peer gets to complete its handshake, in seconds
    #[serde(default = "default_peer_handshake_timeout_secs")]
    pub peer_handshake_timeout_secs: u64,

    /// Handed-off connections a single download may hold
    #[serde(default = "default_max_inbound_peers")]
    pub max_inbound_peers: usize,

    /// Capacity of the engine event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// Behaviour when every candidate listen port fails to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindExhaustedPolicy {
    /// Fail engine startup
    #[default]
    Abort,
    /// Keep running without inbound peers (outbound connections only)
    Continue,
}

impl std::fmt::Display for BindExhaustedPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

impl std::str::FromStr for BindExhaustedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" | "fatal" => Ok(Self::Abort),
            "continue" | "outbound-only" => Ok(Self::Continue),
            _ => Err(format!("Invalid bind exhaustion policy: {}", s)),
        }
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_listen_port() -> String {
    "6881-6999".to_string()
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_peer_handshake_timeout_secs() -> u64 {
    30
}

fn default_max_inbound_peers() -> usize {
    55
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            listen_port: default_listen_port(),
            bind_address: default_bind_address(),
            on_bind_exhausted: BindExhaustedPolicy::Abort,
            tick_interval_ms: default_tick_interval_ms(),
            peer_handshake_timeout_secs: default_peer_handshake_timeout_secs(),
            max_inbound_peers: default_max_inbound_peers(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the download directory
    pub fn download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    /// Set the candidate listen port expression
    pub fn listen_port(mut self, ports: impl Into<String>) -> Self {
        self.listen_port = ports.into();
        self
    }

    /// Set the local bind address
    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Set the bind exhaustion policy
    pub fn on_bind_exhausted(mut self, policy: BindExhaustedPolicy) -> Self {
        self.on_bind_exhausted = policy;
        self
    }

    /// Set the scheduler tick interval
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Set the inbound handshake timeout
    pub fn peer_handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.peer_handshake_timeout_secs = secs;
        self
    }

    /// Set the per-download cap on handed-off connections
    pub fn max_inbound_peers(mut self, max: usize) -> Self {
        self.max_inbound_peers = max;
        self
    }

    /// Tick interval as a `Duration`
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Handshake timeout as a `Duration`
    pub fn peer_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_handshake_timeout_secs)
    }

    /// Materialize a fresh candidate port sequence from `listen_port`
    pub fn listen_ports(&self) -> Result<PortSequence> {
        PortSequence::parse(&self.listen_port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.download_dir.exists() {
            return Err(EngineError::invalid_input(
                "download_dir",
                format!("Directory does not exist: {:?}", self.download_dir),
            ));
        }

        if !self.download_dir.is_dir() {
            return Err(EngineError::invalid_input(
                "download_dir",
                format!("Path is not a directory: {:?}", self.download_dir),
            ));
        }

        if self.listen_ports()?.is_empty() {
            return Err(EngineError::invalid_input(
                "listen_port",
                "At least one candidate port is required",
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(EngineError::invalid_input(
                "tick_interval_ms",
                "Must be at least 1",
            ));
        }

        if self.peer_handshake_timeout_secs == 0 {
            return Err(EngineError::invalid_input(
                "peer_handshake_timeout_secs",
                "Must be at least 1",
            ));
        }

        if self.peer_handshake_timeout_secs > MAX_PEER_HANDSHAKE_TIMEOUT_SECS {
            return Err(EngineError::invalid_input(
                "peer_handshake_timeout_secs",
                format!("Must be at most {}", MAX_PEER_HANDSHAKE_TIMEOUT_SECS),
            ));
        }

        if self.max_inbound_peers == 0 {
            return Err(EngineError::invalid_input(
                "max_inbound_peers",
                "Must be at least 1",
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err(EngineError::invalid_input(
                "event_channel_capacity",
                "Must be at least 1",
            ));
        }

        Ok(())
    }
}
