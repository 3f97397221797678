//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for node runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding per-app worker Unix sockets, named
    /// `{app_name}.{pid}` underneath it.
    /// Default: ~/.local/share/cocaine/run
    #[serde(default = "PathsConfig::default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Directory app manifests and profiles are loaded from.
    /// Default: ~/.config/cocaine/apps
    #[serde(default = "PathsConfig::default_manifest_dir")]
    pub manifest_dir: PathBuf,
}

impl PathsConfig {
    fn default_runtime_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/cocaine/run"))
            .unwrap_or_else(|| PathBuf::from(".local/share/cocaine/run"))
    }

    fn default_manifest_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("cocaine/apps"))
            .unwrap_or_else(|| PathBuf::from(".config/cocaine/apps"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            runtime_dir: Self::default_runtime_dir(),
            manifest_dir: Self::default_manifest_dir(),
        }
    }
}

/// Network bind address for the node service's client-facing RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// TCP address the node service listens on.
    /// Default: 0.0.0.0:10053
    #[serde(default = "BindConfig::default_tcp_addr")]
    pub tcp_addr: String,
}

impl BindConfig {
    fn default_tcp_addr() -> String {
        "0.0.0.0:10053".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            tcp_addr: Self::default_tcp_addr(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry traces.
    /// Default: 127.0.0.1:4317
    #[serde(default = "TelemetryConfig::default_otlp_endpoint")]
    pub otlp_endpoint: String,

    /// Log level (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_otlp_endpoint() -> String {
        "127.0.0.1:4317".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: Self::default_otlp_endpoint(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Infrastructure configuration - cannot change at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Network bind address.
    #[serde(default)]
    pub bind: BindConfig,

    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_defaults() {
        let paths = PathsConfig::default();
        assert!(paths.runtime_dir.to_string_lossy().contains("cocaine"));
        assert!(paths.manifest_dir.to_string_lossy().contains("cocaine"));
    }

    #[test]
    fn test_bind_defaults() {
        let bind = BindConfig::default();
        assert_eq!(bind.tcp_addr, "0.0.0.0:10053");
    }

    #[test]
    fn test_telemetry_defaults() {
        let telemetry = TelemetryConfig::default();
        assert_eq!(telemetry.otlp_endpoint, "127.0.0.1:4317");
        assert_eq!(telemetry.log_level, "info");
    }
}
