//! Service configuration.
//!
//! Sources, in priority order:
//! 1. Environment variables (override individual fields)
//! 2. An explicit TOML file, or `printguard.toml` in the working directory
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::eventbus::DEFAULT_CHANNEL_CAPACITY;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "printguard.toml";

/// Environment variable names.
pub mod env_vars {
    pub const DATA_PATH: &str = "PRINTGUARD_DATA_PATH";
    pub const ENABLE_HISTORY: &str = "PRINTGUARD_ENABLE_HISTORY";
    pub const TELEMETRY_TTL_SECS: &str = "PRINTGUARD_TELEMETRY_TTL_SECS";
    pub const LOG_JSON: &str = "PRINTGUARD_LOG_JSON";
}

/// Record store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the redb database file.
    pub path: PathBuf,
    /// Create missing parent directories on open.
    pub create_dirs: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/printguard.redb"),
            create_dirs: true,
        }
    }
}

/// Printer history (audit log) settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
}

/// Live telemetry cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Entries older than this read as absent.
    pub ttl_secs: u64,
    /// Maximum number of devices kept per snapshot kind.
    pub max_devices: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_devices: 10_000,
        }
    }
}

/// Event bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintGuardConfig {
    pub storage: StorageConfig,
    pub history: HistoryConfig,
    pub telemetry: TelemetryConfig,
    pub events: EventsConfig,
}

impl PrintGuardConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Configuration(format!("invalid TOML: {}", e)))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` (or the default file when present), apply environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(category = "config", path = %path.display(), "Loading config file");
                Self::from_file(path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!(category = "config", path = DEFAULT_CONFIG_FILE, "Loading config file");
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => {
                info!(category = "config", "No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(env_vars::DATA_PATH) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(flag) = lookup(env_vars::ENABLE_HISTORY) {
            self.history.enabled = parse_bool(&flag).ok_or_else(|| {
                Error::Configuration(format!(
                    "{} must be true or false, got '{}'",
                    env_vars::ENABLE_HISTORY,
                    flag
                ))
            })?;
        }
        if let Some(ttl) = lookup(env_vars::TELEMETRY_TTL_SECS) {
            self.telemetry.ttl_secs = ttl.trim().parse().map_err(|_| {
                Error::Configuration(format!(
                    "{} must be a number of seconds, got '{}'",
                    env_vars::TELEMETRY_TTL_SECS,
                    ttl
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.path.as_os_str().is_empty() {
            return Err(Error::Configuration("storage.path must not be empty".to_string()));
        }
        if self.telemetry.ttl_secs == 0 {
            return Err(Error::Configuration(
                "telemetry.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.telemetry.max_devices == 0 {
            return Err(Error::Configuration(
                "telemetry.max_devices must be greater than zero".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(Error::Configuration(
                "events.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
