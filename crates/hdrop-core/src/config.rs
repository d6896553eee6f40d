use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HdropError, HdropResult};

/// Top-level configuration (loaded from hdrop.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HdropConfig {
    pub discovery: DiscoveryConfig,
    pub transfer: TransferConfig,
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// UDP port beacons are sent to and received on (default: 65433)
    pub discovery_port: u16,
    /// Seconds between presence broadcasts (default: 5)
    pub broadcast_interval_secs: u64,
    /// Peers not heard from within this window are dropped (default: 30)
    pub peer_ttl_secs: u64,
    /// Destination address for beacons (default: limited broadcast)
    pub broadcast_addr: IpAddr,
    /// Throwaway target used to learn the outbound-facing local address.
    /// Nothing is ever sent to it.
    pub probe_addr: SocketAddr,
    /// Name announced to peers (defaults to hostname)
    pub device_name: Option<String>,
    /// Local address to filter out of the peer table (defaults to probing)
    pub self_address: Option<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// TCP port the receiver listens on (default: 65432)
    pub service_port: u16,
    /// Plaintext bytes per chunk (default: 4096)
    pub chunk_size: usize,
    /// Directory received files are written to
    pub save_dir: PathBuf,
    /// Connect timeout in seconds (0 = wait forever)
    pub connect_timeout_secs: u64,
    /// Per-read timeout in seconds (0 = wait forever)
    pub read_timeout_secs: u64,
    /// Keep a failed transfer's bytes as `<name>.partial`
    pub keep_partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Raw 32-byte key file
    pub key_file: PathBuf,
    /// Encrypt outgoing transfers when a key is available
    pub encrypt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            broadcast_interval_secs: 5,
            peer_ttl_secs: 30,
            broadcast_addr: IpAddr::from([255, 255, 255, 255]),
            probe_addr: SocketAddr::from(([8, 8, 8, 8], 80)),
            device_name: None,
            self_address: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            service_port: crate::DEFAULT_SERVICE_PORT,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            save_dir: PathBuf::from("received_files"),
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            keep_partial: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("encryption.key"),
            encrypt: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl HdropConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> HdropResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| HdropError::Config(format!("reading {}: {e}", path.display())))?;
            toml::from_str(&content)
                .map_err(|e| HdropError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            HdropConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HdropResult<()> {
        if self.transfer.chunk_size == 0 {
            return Err(HdropError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.transfer.chunk_size > crate::MAX_CHUNK_SIZE {
            return Err(HdropError::Config(format!(
                "transfer.chunk_size must be <= {}",
                crate::MAX_CHUNK_SIZE
            )));
        }
        // Peers drop beacons with an empty name, so the device would never show up.
        if let Some(name) = &self.discovery.device_name {
            if name.trim().is_empty() {
                return Err(HdropError::Config("discovery.device_name must not be empty".into()));
            }
        }
        if self.discovery.peer_ttl_secs == 0 {
            return Err(HdropError::Config("discovery.peer_ttl_secs must be > 0".into()));
        }
        if self.discovery.broadcast_interval_secs == 0 {
            return Err(HdropError::Config(
                "discovery.broadcast_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl DiscoveryConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }

    /// Configured device name, or the hostname
    pub fn device_name(&self) -> String {
        self.device_name.clone().unwrap_or_else(default_device_name)
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Get the default hostname for device naming
pub fn default_device_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-device".into())
}
