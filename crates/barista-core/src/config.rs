//! Configuration for the Barista session layer.
//!
//! Resolution order:
//! 1. Built-in defaults
//! 2. Optional JSON settings file
//! 3. Environment variables (`BARISTA_*`, highest priority below CLI)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default vendor cloud host, shared by REST and WebSocket endpoints.
pub const DEFAULT_CLOUD_HOST: &str = "lion.lamarzocco.io";

/// Complete session-layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub machine: MachineConfig,
}

/// Vendor cloud connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Cloud host for both the REST API and the WebSocket endpoint.
    pub host: String,
    /// Account username (email) for sign-in.
    pub username: String,
    /// Account password for sign-in.
    pub password: String,
    /// Refresh the access token when it expires within this margin.
    pub refresh_margin_secs: u64,
    /// Minimum interval between WebSocket reconnect attempts.
    pub reconnect_interval_secs: u64,
    /// Minimum interval between statistics refresh requests.
    pub stats_min_interval_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CLOUD_HOST.to_string(),
            username: String::new(),
            password: String::new(),
            refresh_margin_secs: 10 * 60,
            reconnect_interval_secs: 30,
            stats_min_interval_secs: 60,
        }
    }
}

/// Per-appliance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Machine serial number, used in REST paths and the telemetry topic.
    pub serial_number: String,
    /// Path to the persisted installation identity record.
    pub identity_path: Option<PathBuf>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            serial_number: String::new(),
            identity_path: None,
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration from an optional settings file plus env overrides.
pub fn load_config(settings_path: Option<&Path>) -> Result<Config> {
    let mut config = match settings_path {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Default location of the identity record (XDG-style on Linux).
pub fn default_identity_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".barista").join("identity.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/barista/identity.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
            .map(|p| p.join("barista").join("identity.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("BARISTA_CLOUD_HOST") {
        config.cloud.host = val;
    }
    if let Ok(val) = std::env::var("BARISTA_USERNAME") {
        config.cloud.username = val;
    }
    if let Ok(val) = std::env::var("BARISTA_PASSWORD") {
        config.cloud.password = val;
    }
    if let Ok(val) = std::env::var("BARISTA_SERIAL_NUMBER") {
        config.machine.serial_number = val;
    }
    if let Ok(val) = std::env::var("BARISTA_LOG_LEVEL") {
        config.machine.log_level = val;
    }
}
