//! Configuration for the SFTP gateway
//!
//! Built once at startup (file, then environment, then CLI) and shared
//! read-only by every connection.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the root directory
pub const ROOT_ENV: &str = "SFTP_ROOT";

/// Environment variable overriding the listening port
pub const PORT_ENV: &str = "SFTP_PORT";

/// Host key location, relative to the root directory
const HOST_KEY_RELATIVE: [&str; 2] = ["ssh", "id_rsa_mockapi"];

/// Smallest SFTP packet the router must accept: a 32 KiB write plus header
const MIN_PACKET_SIZE: u32 = 34_000;

/// SFTP gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory every peer path is resolved under
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Largest SFTP packet (length prefix excluded) a channel accepts
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            max_packet_size: default_max_packet_size(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Overlay `SFTP_ROOT` and `SFTP_PORT` from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `SFTP_PORT` is not a port number.
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay environment values obtained through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the port value is not a port number.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ROOT_ENV).filter(|v| !v.is_empty()) {
            self.root_dir = PathBuf::from(root);
        }

        if let Some(port) = lookup(PORT_ENV).filter(|v| !v.is_empty()) {
            self.port = port
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid {PORT_ENV} {port:?}: {e}")))?;
        }

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the root is missing or not a
    /// directory, or if the packet limit is too small for a 32 KiB write.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.root_dir.exists() {
            return Err(crate::Error::Config(format!(
                "Root directory does not exist: {}",
                self.root_dir.display()
            )));
        }

        if !self.root_dir.is_dir() {
            return Err(crate::Error::Config(format!(
                "Root path is not a directory: {}",
                self.root_dir.display()
            )));
        }

        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(crate::Error::Config(format!(
                "max_packet_size must be at least {MIN_PACKET_SIZE} bytes"
            )));
        }

        Ok(())
    }

    /// Absolute, symlink-free form of the root directory
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the root cannot be resolved.
    pub fn canonical_root(&self) -> crate::Result<PathBuf> {
        std::fs::canonicalize(&self.root_dir).map_err(|e| {
            crate::Error::Config(format!(
                "Cannot resolve root directory {}: {e}",
                self.root_dir.display()
            ))
        })
    }

    /// Fixed host key path under the root directory
    pub fn host_key_path(&self) -> PathBuf {
        HOST_KEY_RELATIVE
            .iter()
            .fold(self.root_dir.clone(), |path, part| path.join(part))
    }

    /// `bind_address:port` listener address
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    2022
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/srv/sftp")
}

const fn default_max_packet_size() -> u32 {
    262_144
}
