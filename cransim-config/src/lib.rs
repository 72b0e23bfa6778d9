//! # Cransim Configuration System
//!
//! Layered configuration for the archive replay server.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across server, hub and archive
//! - **Validation**: Runtime validation of every parameter before anything starts
//! - **Environment Awareness**: Per-environment YAML overrides and `CRANSIM_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod archive;
mod error;
mod hub;
mod server;
mod telemetry;
mod validation;

pub use archive::ArchiveConfig;
pub use archive::MaintenanceConfig;
pub use error::ConfigError;
pub use hub::HubConfig;
pub use server::ServerConfig;
pub use telemetry::TelemetryConfig;

const BASE_CONFIG: &str = "config/cransim.yaml";
const ENV_PREFIX: &str = "CRANSIM_";

/// Top‑level configuration container for all cransim components.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct CransimConfig {
    /// TCP listener and subscriber delivery.
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Archive directory and virtual clock offset.
    #[serde(default)]
    #[validate(nested)]
    pub archive: ArchiveConfig,

    /// Broadcast hub sizing.
    #[serde(default)]
    #[validate(nested)]
    pub hub: HubConfig,

    /// Pruning and fetching of day files.
    #[serde(default)]
    #[validate(nested)]
    pub maintenance: MaintenanceConfig,

    /// Logging and statistics.
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl CransimConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/cransim.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<CRANSIM_ENV>.yaml` - Environment‑specific overrides.
    /// 4. `CRANSIM_*` environment variables (`__` separates sections).
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(CransimConfig::default()));

        if Path::new(BASE_CONFIG).exists() {
            figment = figment.merge(Yaml::file(BASE_CONFIG));
        }

        let env = std::env::var("CRANSIM_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from a specific YAML file layered over defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(CransimConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Re-checks a configuration after programmatic overrides.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(Self::validated)
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

impl ArchiveConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
