//! Config file discovery, loading, and environment variable overlay.

use crate::defaults::{IsolateConfig, ProfileConfig, ProfilesConfig, TimeoutsConfig};
use crate::runtime::{BindConfig, InfraConfig, TelemetryConfig};
use crate::{CocaineConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/cocaine/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cocaine/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("cocaine.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<CocaineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<CocaineConfig, ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut infra = InfraConfig::default();

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("runtime_dir").and_then(|v| v.as_str()) {
            infra.paths.runtime_dir = expand_path(v);
        }
        if let Some(v) = paths.get("manifest_dir").and_then(|v| v.as_str()) {
            infra.paths.manifest_dir = expand_path(v);
        }
    }

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("tcp_addr").and_then(|v| v.as_str()) {
            infra.bind.tcp_addr = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    let mut profiles = ProfilesConfig::default();
    if let Some(profiles_table) = table.get("profiles").and_then(|v| v.as_table()) {
        for (name, value) in profiles_table {
            if let Some(profile_table) = value.as_table() {
                let mut profile = ProfileConfig::default();
                if let Some(v) = profile_table.get("pool_limit").and_then(|v| v.as_integer()) {
                    profile.pool_limit = v as usize;
                }
                if let Some(v) = profile_table.get("concurrency").and_then(|v| v.as_integer()) {
                    profile.concurrency = v as usize;
                }
                if let Some(v) = profile_table.get("grow_threshold").and_then(|v| v.as_float()) {
                    profile.grow_threshold = v;
                }
                if let Some(v) = profile_table.get("queue_limit").and_then(|v| v.as_integer()) {
                    profile.queue_limit = v as usize;
                }
                if let Some(v) = profile_table
                    .get("crashlog_limit")
                    .and_then(|v| v.as_integer())
                {
                    profile.crashlog_limit = v as usize;
                }
                if let Some(timeouts) = profile_table.get("timeouts").and_then(|v| v.as_table()) {
                    profile.timeouts = parse_timeouts(timeouts, TimeoutsConfig::default());
                }
                if let Some(isolate) = profile_table.get("isolate").and_then(|v| v.as_table()) {
                    let mut isolate_cfg = IsolateConfig::default();
                    if let Some(v) = isolate.get("ty").and_then(|v| v.as_str()) {
                        isolate_cfg.ty = v.to_string();
                    }
                    if let Some(args) = isolate.get("args").and_then(|v| v.as_table()) {
                        for (k, v) in args {
                            if let Some(s) = v.as_str() {
                                isolate_cfg.args.insert(k.clone(), s.to_string());
                            }
                        }
                    }
                    profile.isolate = isolate_cfg;
                }
                profiles.named.insert(name.clone(), profile);
            }
        }
    }

    Ok(CocaineConfig { infra, profiles })
}

fn parse_timeouts(table: &toml::Table, base: TimeoutsConfig) -> TimeoutsConfig {
    let mut timeouts = base;
    if let Some(v) = table.get("startup_ms").and_then(|v| v.as_integer()) {
        timeouts.startup_ms = v as u64;
    }
    if let Some(v) = table.get("heartbeat_ms").and_then(|v| v.as_integer()) {
        timeouts.heartbeat_ms = v as u64;
    }
    if let Some(v) = table.get("idle_ms").and_then(|v| v.as_integer()) {
        timeouts.idle_ms = v as u64;
    }
    if let Some(v) = table.get("termination_ms").and_then(|v| v.as_integer()) {
        timeouts.termination_ms = v as u64;
    }
    timeouts
}

/// Merge two configs, with `overlay` taking precedence field-by-field.
/// Profiles named in `overlay` replace the same-named entry in `base`
/// wholesale; profiles only present in `base` are kept untouched.
pub fn merge_configs(base: CocaineConfig, overlay: CocaineConfig) -> CocaineConfig {
    let default_infra = InfraConfig::default();

    let runtime_dir = if overlay.infra.paths.runtime_dir != default_infra.paths.runtime_dir {
        overlay.infra.paths.runtime_dir
    } else {
        base.infra.paths.runtime_dir
    };
    let manifest_dir = if overlay.infra.paths.manifest_dir != default_infra.paths.manifest_dir {
        overlay.infra.paths.manifest_dir
    } else {
        base.infra.paths.manifest_dir
    };

    let tcp_addr = if overlay.infra.bind.tcp_addr != default_infra.bind.tcp_addr {
        overlay.infra.bind.tcp_addr
    } else {
        base.infra.bind.tcp_addr
    };

    let otlp_endpoint = if overlay.infra.telemetry.otlp_endpoint
        != default_infra.telemetry.otlp_endpoint
    {
        overlay.infra.telemetry.otlp_endpoint
    } else {
        base.infra.telemetry.otlp_endpoint
    };
    let log_level = if overlay.infra.telemetry.log_level != default_infra.telemetry.log_level {
        overlay.infra.telemetry.log_level
    } else {
        base.infra.telemetry.log_level
    };

    let mut profiles = base.profiles;
    for (name, profile) in overlay.profiles.named {
        profiles.named.insert(name, profile);
    }

    CocaineConfig {
        infra: InfraConfig {
            paths: crate::runtime::PathsConfig {
                runtime_dir,
                manifest_dir,
            },
            bind: BindConfig { tcp_addr },
            telemetry: TelemetryConfig {
                otlp_endpoint,
                log_level,
            },
        },
        profiles,
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut CocaineConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("COCAINE_RUNTIME_DIR") {
        config.infra.paths.runtime_dir = expand_path(&v);
        sources.env_overrides.push("COCAINE_RUNTIME_DIR".to_string());
    }
    if let Ok(v) = env::var("COCAINE_MANIFEST_DIR") {
        config.infra.paths.manifest_dir = expand_path(&v);
        sources
            .env_overrides
            .push("COCAINE_MANIFEST_DIR".to_string());
    }

    if let Ok(v) = env::var("COCAINE_BIND_ADDR") {
        config.infra.bind.tcp_addr = v;
        sources.env_overrides.push("COCAINE_BIND_ADDR".to_string());
    }

    if let Ok(v) = env::var("COCAINE_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources
            .env_overrides
            .push("COCAINE_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
        sources
            .env_overrides
            .push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Ok(v) = env::var("COCAINE_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("COCAINE_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            return if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            };
        }
        return env::var(stripped)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(path));
    }

    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[paths]
runtime_dir = "/custom/run"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(
            config.infra.paths.runtime_dir,
            PathBuf::from("/custom/run")
        );
        assert_eq!(config.infra.bind.tcp_addr, "0.0.0.0:10053");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[paths]
runtime_dir = "/data/cocaine/run"
manifest_dir = "/data/cocaine/apps"

[bind]
tcp_addr = "0.0.0.0:9000"

[telemetry]
log_level = "debug"

[profiles.default]
pool_limit = 4
concurrency = 20
queue_limit = 200

[profiles.default.timeouts]
heartbeat_ms = 5000

[profiles.default.isolate]
ty = "docker"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(
            config.infra.paths.runtime_dir,
            PathBuf::from("/data/cocaine/run")
        );
        assert_eq!(config.infra.bind.tcp_addr, "0.0.0.0:9000");
        assert_eq!(config.infra.telemetry.log_level, "debug");

        let default_profile = config.profiles.named.get("default").unwrap();
        assert_eq!(default_profile.pool_limit, 4);
        assert_eq!(default_profile.concurrency, 20);
        assert_eq!(default_profile.queue_limit, 200);
        assert_eq!(default_profile.timeouts.heartbeat_ms, 5000);
        assert_eq!(default_profile.isolate.ty, "docker");
    }
}
