//! Minimal configuration loading for the cocaine node runtime.
//!
//! This crate provides configuration loading with minimal dependencies,
//! designed to be imported by both the overseer and node crates without
//! causing circular dependency issues.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): Things that physically cannot change
//!   at runtime - paths, bind addresses, telemetry endpoints.
//!
//! - **Profiles** (`ProfilesConfig`): Named policy presets (pool limits,
//!   timeouts, isolate settings) that seed a new app's Overseer. Once an
//!   app is running, the Overseer owns its own copy of the profile.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cocaine_config::CocaineConfig;
//!
//! let config = CocaineConfig::load().expect("failed to load config");
//!
//! println!("runtime dir: {}", config.infra.paths.runtime_dir.display());
//! println!("bind addr: {}", config.infra.bind.tcp_addr);
//!
//! let profile = config.profiles.resolve(Some("default"));
//! println!("pool limit: {}", profile.pool_limit);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/cocaine/config.toml` (system)
//! 2. `~/.config/cocaine/config.toml` (user)
//! 3. `./cocaine.toml` (local override)
//! 4. Environment variables (`COCAINE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! runtime_dir = "~/.local/share/cocaine/run"
//! manifest_dir = "~/.config/cocaine/apps"
//!
//! [bind]
//! tcp_addr = "0.0.0.0:10053"
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [profiles.default]
//! pool_limit = 4
//! concurrency = 10
//! ```

pub mod defaults;
pub mod loader;
pub mod runtime;

pub use defaults::{IsolateConfig, ProfileConfig, ProfilesConfig, TimeoutsConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use runtime::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete node runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocaineConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Named profiles that seed new apps.
    #[serde(default)]
    pub profiles: ProfilesConfig,
}

impl Default for CocaineConfig {
    fn default() -> Self {
        Self {
            infra: InfraConfig::default(),
            profiles: ProfilesConfig::default(),
        }
    }
}

impl CocaineConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/cocaine/config.toml`
    /// 3. `~/.config/cocaine/config.toml`
    /// 4. `./cocaine.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./cocaine.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = CocaineConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CocaineConfig::default();
        assert_eq!(config.infra.bind.tcp_addr, "0.0.0.0:10053");
        assert!(config.profiles.named.contains_key("default"));
    }

    #[test]
    fn test_load_defaults() {
        let config = CocaineConfig::load().unwrap();
        assert_eq!(config.infra.bind.tcp_addr, "0.0.0.0:10053");
    }
}
