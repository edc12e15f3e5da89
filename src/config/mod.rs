//! Configuration module
//!
//! Handles loading and saving dcmanifest configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::manifest::DuplicatePolicy;
use crate::network::NetworkConfig as NetConfig;
use crate::protocol::{PeerInfo, DEFAULT_PORT};
use crate::schema::Role;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub network: NetworkConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Unique peer identifier (random per run if not set)
    pub peer_id: Option<String>,
    /// Human-readable name announced in the handshake
    #[serde(default = "default_name")]
    pub name: String,
    /// Log filter used when --verbose is not given
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Schema configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Schema sources, in load order
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Generated manifest to load instead of compiling the schema
    pub manifest: Option<PathBuf>,
    /// Which projection of the schema this process imports
    #[serde(default)]
    pub role: Role,
    /// How a symbol imported twice is treated
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Connection and handshake timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Expected heartbeat interval in ms; silent peers are dropped after a few
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_heartbeat_interval() -> u64 {
    1000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            connect_timeout_ms: default_connect_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
        }
    }
}

impl NetworkConfig {
    /// Runtime network settings, with `port` overriding the configured one
    pub fn to_runtime(&self, port: u16) -> NetConfig {
        let mut config = NetConfig::new(port);
        if let Some(address) = &self.bind_address {
            config.bind_address = address.clone();
        }
        config.connect_timeout_ms = self.connect_timeout_ms;
        config.heartbeat_interval_ms = self.heartbeat_interval_ms;
        config
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("dcmanifest/config.toml")),
            Some(PathBuf::from("./dcmanifest.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the peer id, generating one if not set
    pub fn peer_id(&self) -> String {
        self.general
            .peer_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Identity announced in the handshake
    pub fn peer_info(&self, role: Role) -> PeerInfo {
        PeerInfo::new(self.peer_id(), self.general.name.clone(), role)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            peer_id: Some("district-1".to_string()),
            name: "Toontown Central".to_string(),
            log_level: default_log_level(),
        },
        schema: SchemaConfig {
            files: vec![PathBuf::from("otp.dc"), PathBuf::from("toon.dc")],
            manifest: None,
            role: Role::Ai,
            duplicate_policy: DuplicatePolicy::Reject,
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.schema.role, Role::Client);
        assert_eq!(config.schema.duplicate_policy, DuplicatePolicy::Reject);
        assert!(config.schema.files.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.schema.role = Role::Uberdog;
        config.schema.duplicate_policy = DuplicatePolicy::Shadow;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.network.port, config.network.port);
        assert_eq!(loaded.schema.role, Role::Uberdog);
        assert_eq!(loaded.schema.duplicate_policy, DuplicatePolicy::Shadow);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.name, "Toontown Central");
        assert_eq!(parsed.schema.role, Role::Ai);
        assert_eq!(parsed.schema.files.len(), 2);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str("[schema]\nfiles = [\"game.dc\"]\nrole = \"ai\"\n").unwrap();
        assert_eq!(config.schema.role, Role::Ai);
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn test_runtime_network_config() {
        let mut config = NetworkConfig::default();
        config.bind_address = Some("127.0.0.1".to_string());
        config.connect_timeout_ms = 250;

        let runtime = config.to_runtime(9000);
        assert_eq!(runtime.port, 9000);
        assert_eq!(runtime.bind_address, "127.0.0.1");
        assert_eq!(runtime.connect_timeout_ms, 250);
    }

    #[test]
    fn test_peer_id_fallback() {
        let mut config = Config::default();
        assert_ne!(config.peer_id(), config.peer_id());

        config.general.peer_id = Some("fixed".to_string());
        assert_eq!(config.peer_info(Role::Ai).peer_id, "fixed");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/dcmanifest.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
