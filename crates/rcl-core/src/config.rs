use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rcl_protocol::wire::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_BULK_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level configuration, loaded from rcl.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RclConfig {
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent clients
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
    /// Chunk size announced before every bulk transfer
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// First port tried for non-blocking read side channels
    #[serde(default = "default_transfer_base_port")]
    pub transfer_base_port: u16,
    /// Number of ports tried above `transfer_base_port`
    #[serde(default = "default_transfer_port_range")]
    pub transfer_port_range: u16,
    /// Largest accepted message frame
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u64,
    /// Largest accepted bulk upload
    #[serde(default = "default_max_bulk_size")]
    pub max_bulk_size: u64,
    /// Idle poll interval of a connection loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Which compute driver backs the server
    #[serde(default)]
    pub driver: DriverKind,
    /// Explicit path to the OpenCL library (None = system loader)
    pub library_path: Option<String>,
    /// Release everything a client leaked when it disconnects
    #[serde(default = "default_true")]
    pub release_on_disconnect: bool,
    /// Prefix platform names with the server's address
    #[serde(default = "default_true")]
    pub platform_tag: bool,
}

/// Compute driver selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DriverKind {
    /// The system OpenCL ICD loader, falling back to the simulated driver
    #[default]
    #[serde(rename = "system")]
    System,
    /// In-process simulated device
    #[serde(rename = "simulated")]
    Simulated,
}

impl std::str::FromStr for DriverKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(DriverKind::System),
            "simulated" | "sim" => Ok(DriverKind::Simulated),
            other => Err(CoreError::ConfigError(format!("unknown driver: {}", other))),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_clients: default_max_clients(),
            chunk_size: default_chunk_size(),
            transfer_base_port: default_transfer_base_port(),
            transfer_port_range: default_transfer_port_range(),
            max_message_size: default_max_message_size(),
            max_bulk_size: default_max_bulk_size(),
            poll_interval_ms: default_poll_interval_ms(),
            driver: DriverKind::default(),
            library_path: None,
            release_on_disconnect: true,
            platform_tag: true,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<IpAddr, CoreError> {
        self.bind
            .parse()
            .map_err(|e| {
                CoreError::ConfigError(format!("invalid bind address {:?}: {}", self.bind, e))
            })
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.bind_addr()?;
        if self.chunk_size == 0 {
            return Err(CoreError::ConfigError("chunk_size must be positive".into()));
        }
        if self.max_clients == 0 {
            return Err(CoreError::ConfigError("max_clients must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(CoreError::ConfigError("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

impl RclConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: RclConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

/// Returns the default config file path.
/// Search order:
/// 1. System-wide config: `%PROGRAMDATA%\rcl\rcl.toml` (Windows) or `/etc/rcl/rcl.toml`
/// 2. Local fallback: `./rcl.toml`
pub fn default_config_path() -> PathBuf {
    #[cfg(windows)]
    {
        let programdata = std::env::var("PROGRAMDATA")
            .unwrap_or_else(|_| r"C:\ProgramData".to_string());
        let system_path = PathBuf::from(programdata).join("rcl").join("rcl.toml");
        if system_path.exists() {
            return system_path;
        }
    }
    #[cfg(not(windows))]
    {
        let system_path = PathBuf::from("/etc/rcl/rcl.toml");
        if system_path.exists() {
            return system_path;
        }
    }
    PathBuf::from("rcl.toml")
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    51000
}

fn default_max_clients() -> u32 {
    16
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_transfer_base_port() -> u16 {
    51001
}

fn default_transfer_port_range() -> u16 {
    1000
}

fn default_max_message_size() -> u64 {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_bulk_size() -> u64 {
    DEFAULT_MAX_BULK_SIZE
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: RclConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 51000);
        assert_eq!(config.server.transfer_base_port, 51001);
        assert_eq!(config.server.chunk_size, 1024);
        assert_eq!(config.server.driver, DriverKind::System);
        assert!(config.server.release_on_disconnect);
        config.server.validate().unwrap();
    }

    #[test]
    fn partial_server_section() {
        let config: RclConfig = toml::from_str(
            r#"
            [server]
            port = 6000
            driver = "simulated"
            chunk_size = 4096
            platform_tag = false
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.driver, DriverKind::Simulated);
        assert_eq!(config.server.chunk_size, 4096);
        assert!(!config.server.platform_tag);
        assert_eq!(config.server.max_clients, 16);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut server = ServerConfig::default();
        server.chunk_size = 0;
        assert!(server.validate().is_err());

        let mut server = ServerConfig::default();
        server.bind = "not-an-address".into();
        assert!(server.validate().is_err());
    }

    #[test]
    fn driver_kind_from_str() {
        assert_eq!("simulated".parse::<DriverKind>().unwrap(), DriverKind::Simulated);
        assert_eq!("system".parse::<DriverKind>().unwrap(), DriverKind::System);
        assert!("cuda".parse::<DriverKind>().is_err());
    }
}
