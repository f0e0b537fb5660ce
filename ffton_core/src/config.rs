use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::transfer::constants::{CHECKPOINT_INTERVAL, CHUNK_SIZE};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "ffton";
const APP_NAME: &str = "ffton";
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "FFTON_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Byte order of the 8-byte length prefix on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    /// Host order, for peers that never converted the prefix
    Native,
}

impl ByteOrder {
    pub fn encode(self, value: i64) -> [u8; 8] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Native => value.to_ne_bytes(),
        }
    }

    pub fn decode(self, bytes: [u8; 8]) -> i64 {
        match self {
            ByteOrder::Little => i64::from_le_bytes(bytes),
            ByteOrder::Native => i64::from_ne_bytes(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of the working buffer used to stream file bodies
    pub chunk_size: usize,
    /// Progress is reported each time the byte counter passes the last
    /// checkpoint by more than this many bytes
    pub checkpoint_interval: u64,
    pub prefix_byte_order: ByteOrder,
    /// Log a BLAKE3 digest of every completed file
    pub verify_checksum: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            prefix_byte_order: ByteOrder::default(),
            verify_checksum: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub handshake_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub linger_timeout_secs: u64,
    pub listen_backlog: u32,
    pub punch_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 30,
            idle_timeout_secs: 60,
            keep_alive_secs: 2,
            linger_timeout_secs: 0,
            listen_backlog: 10,
            punch_interval_ms: 250,
        }
    }
}

impl ConnectionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Upper bound on waiting for delivery at close; `None` waits while the connection lives
    pub fn linger_timeout(&self) -> Option<Duration> {
        (self.linger_timeout_secs > 0).then(|| Duration::from_secs(self.linger_timeout_secs))
    }

    pub fn punch_interval(&self) -> Duration {
        Duration::from_millis(self.punch_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transfer: TransferConfig,
    pub connection: ConnectionConfig,
}

impl Config {
    /// Default config file path, `FFTON_CONFIG` wins over the platform location
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load a config file that must exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the default config file, falling back to defaults when it is absent
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size must be positive".into()));
        }
        if self.transfer.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "transfer.checkpoint_interval must be positive".into(),
            ));
        }
        if self.connection.listen_backlog == 0 {
            return Err(ConfigError::Invalid(
                "connection.listen_backlog must be positive".into(),
            ));
        }
        if self.connection.punch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection.punch_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
