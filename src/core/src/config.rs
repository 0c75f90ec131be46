use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BoxcallError, Result};

/// Boxcall configuration
///
/// Loaded from `~/.boxcall/config.yaml`; every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxcallConfig {
    /// Build daemon connection
    pub daemon: DaemonConfig,

    /// Image provisioning defaults
    pub provision: ProvisionConfig,

    /// Ship function/type source text with each call
    pub send_source: bool,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for BoxcallConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            provision: ProvisionConfig::default(),
            send_source: true,
            log_level: LogLevel::Warn,
        }
    }
}

impl BoxcallConfig {
    /// Default config location (`~/.boxcall/config.yaml`).
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            BoxcallError::ConfigError("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(".boxcall").join("config.yaml"))
    }

    /// Load configuration from a YAML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            BoxcallError::ConfigError(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Load configuration from the default location.
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }
}

/// Build daemon configuration
///
/// Mirrors the `DOCKER_HOST` / `DOCKER_TLS_VERIFY` / `DOCKER_CERT_PATH`
/// environment convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Daemon URL (e.g. `tcp://192.168.99.100:2376`); environment if unset
    pub host: Option<String>,

    /// Verify the daemon's certificate against `ca.pem`
    pub tls_verify: bool,

    /// Directory holding `ca.pem`, `cert.pem`, `key.pem`
    pub cert_path: Option<PathBuf>,

    /// Check that the certificate matches the daemon host name
    pub assert_hostname: bool,
}

/// Image provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Base image for provisioned images
    pub base_image: String,

    /// Directory inside the image that receives job inputs
    pub workdir: String,

    /// Always pull the base image before building
    pub pull: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            base_image: "debian:bookworm-slim".to_string(),
            workdir: "/opt/boxcall".to_string(),
            pull: false,
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
