//! Configuration for the vex-bridge daemon
//!
//! Loaded from `vex-bridge.toml` in the working directory when present.
//! Every field has a default so a partial file (or none at all) is valid.

use crate::error::Result;
use crate::protocol::constants::{DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// File name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "vex-bridge.toml";

/// Listener of the alternate half-duplex variant
pub const HALF_DUPLEX_BIND_ADDRESS: &str = "0.0.0.0:10002";

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

/// Serial leg settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    /// Explicit port path; absent means USB auto-discovery
    #[serde(default)]
    pub port: Option<String>,

    /// Initial line rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Blocking read bound in milliseconds (default: 100)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// TCP leg settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Listener address (default: 0.0.0.0:10001)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Delay between reconnection attempts in milliseconds (default: 1000)
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Socket receive timeout in milliseconds (default: 1000)
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_ms: u64,

    /// Decoded frames buffered toward the TCP client (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Session machine settings for the serial leg
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    /// This endpoint's station id; lower wins token contention (default: 0)
    #[serde(default)]
    pub station_id: u8,

    /// Robot station id (default: 1)
    #[serde(default = "default_peer_station_id")]
    pub peer_station_id: u8,

    /// Initial ACK timeout in milliseconds (default: 500)
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Whether the bridge holds the transmit token at link start (default: false)
    #[serde(default)]
    pub starts_with_token: bool,

    /// Outbound frames queued toward the robot (default: 64)
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout() -> u64 {
    100
}

fn default_bind_address() -> String {
    "0.0.0.0:10001".to_string()
}

fn default_reconnect_interval() -> u64 {
    1000
}

fn default_recv_timeout() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_peer_station_id() -> u8 {
    1
}

fn default_ack_timeout() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_max_pending() -> usize {
    64
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            reconnect_interval_ms: default_reconnect_interval(),
            recv_timeout_ms: default_recv_timeout(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            station_id: 0,
            peer_station_id: default_peer_station_id(),
            ack_timeout_ms: default_ack_timeout(),
            starts_with_token: false,
            max_pending: default_max_pending(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// `vex-bridge.toml` from the working directory, or defaults when absent
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE_NAME);
        if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            log::info!("No {} found, using defaults", CONFIG_FILE_NAME);
            Ok(Self::default())
        }
    }

    /// Defaults with the listener on the alternate half-duplex port 10002
    pub fn half_duplex_alternate() -> Self {
        Self::default().with_half_duplex_listener()
    }

    /// Move the listener to the half-duplex port, keeping everything else
    pub fn with_half_duplex_listener(mut self) -> Self {
        self.network.bind_address = HALF_DUPLEX_BIND_ADDRESS.to_string();
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.network.reconnect_interval_ms)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.network.recv_timeout_ms)
    }

    /// Session machine settings for the serial leg
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            station_id: self.session.station_id,
            peer_station_id: self.session.peer_station_id,
            ack_timeout: Duration::from_millis(self.session.ack_timeout_ms),
            baud_rate: self.serial.baud_rate,
            starts_with_token: self.session.starts_with_token,
            max_pending: self.session.max_pending,
        }
    }
}
