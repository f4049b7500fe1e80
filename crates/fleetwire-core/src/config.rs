//! Configuration loading for fleetwire.
//!
//! Configuration is read from a TOML file where every field has a default,
//! then overridden from environment variables and validated.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    /// Bounded inbound queue size
    pub const QUEUE_CAPACITY: usize = 10_000;
    /// Fixed worker pool size
    pub const WORKER_COUNT: usize = 100;
    pub const MONITORING_INTERVAL_SECS: u64 = 5;
    pub const ASSIGNMENT_CACHE_CAPACITY: u64 = 1_000;
}

/// Environment variable names.
pub mod env_vars {
    pub const QUEUE_CAPACITY: &str = "FLEETWIRE_QUEUE_CAPACITY";
    pub const WORKER_COUNT: &str = "FLEETWIRE_WORKER_COUNT";
    pub const ENABLE_MONITORING: &str = "FLEETWIRE_ENABLE_MONITORING";
    pub const ALLOW_NEW_DEVICES: &str = "FLEETWIRE_ALLOW_NEW_DEVICES";
    pub const AUTO_ASSIGN_SITE: &str = "FLEETWIRE_AUTO_ASSIGN_SITE";
    pub const STORAGE_PATH: &str = "FLEETWIRE_STORAGE_PATH";
    pub const LOG_JSON: &str = "FLEETWIRE_LOG_JSON";
}

/// Inbound processing strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
    /// Emit a periodic metrics snapshot
    pub enable_monitoring: bool,
    pub monitoring_interval_secs: u64,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::QUEUE_CAPACITY,
            worker_count: defaults::WORKER_COUNT,
            enable_monitoring: false,
            monitoring_interval_secs: defaults::MONITORING_INTERVAL_SECS,
        }
    }
}

impl InboundConfig {
    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs)
    }
}

/// Registration manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub allow_new_devices: bool,
    /// Assign a site to devices that register without one
    pub auto_assign_site: bool,
    /// Site used for auto-assignment; the first site is used when unset
    pub auto_assign_site_token: Option<String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            allow_new_devices: true,
            auto_assign_site: true,
            auto_assign_site_token: None,
        }
    }
}

/// Command routing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Destination for specifications without an explicit mapping.
    /// Without one (and without mappings) commands are logged and dropped.
    pub default_destination: Option<String>,
    /// Specification token -> destination id
    pub specification_mappings: HashMap<String, String>,
}

impl RoutingConfig {
    /// Whether any real destination is configured.
    pub fn is_configured(&self) -> bool {
        self.default_destination.is_some() || !self.specification_mappings.is_empty()
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; in-memory store when unset
    pub path: Option<String>,
    /// Assignment cache capacity; 0 disables the cache
    pub assignment_cache_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            assignment_cache_capacity: defaults::ASSIGNMENT_CACHE_CAPACITY,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetwireConfig {
    pub inbound: InboundConfig,
    pub registration: RegistrationConfig,
    pub routing: RoutingConfig,
    pub storage: StorageConfig,
}

impl FleetwireConfig {
    /// Load configuration from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without env overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Override fields from `FLEETWIRE_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse(env_vars::QUEUE_CAPACITY) {
            self.inbound.queue_capacity = v;
        }
        if let Some(v) = env_parse(env_vars::WORKER_COUNT) {
            self.inbound.worker_count = v;
        }
        if let Some(v) = env_parse(env_vars::ENABLE_MONITORING) {
            self.inbound.enable_monitoring = v;
        }
        if let Some(v) = env_parse(env_vars::ALLOW_NEW_DEVICES) {
            self.registration.allow_new_devices = v;
        }
        if let Some(v) = env_parse(env_vars::AUTO_ASSIGN_SITE) {
            self.registration.auto_assign_site = v;
        }
        if let Ok(path) = std::env::var(env_vars::STORAGE_PATH) {
            if !path.is_empty() {
                self.storage.path = Some(path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.inbound.queue_capacity == 0 {
            return Err(Error::Config("inbound.queue_capacity must be > 0".into()));
        }
        if self.inbound.worker_count == 0 {
            return Err(Error::Config("inbound.worker_count must be > 0".into()));
        }
        if self.inbound.monitoring_interval_secs == 0 {
            return Err(Error::Config(
                "inbound.monitoring_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
