//! Profile defaults - seed a new app's runtime policy, then the running
//! Overseer owns its own copy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a worker process is started: the isolate component and its
/// arguments (image reference, working directory, env, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsolateConfig {
    /// Isolate component name, e.g. "process" or "docker".
    #[serde(default = "IsolateConfig::default_ty")]
    pub ty: String,

    /// Component-specific arguments, passed through verbatim.
    #[serde(default)]
    pub args: HashMap<String, String>,
}

impl IsolateConfig {
    fn default_ty() -> String {
        "process".to_string()
    }
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            ty: Self::default_ty(),
            args: HashMap::new(),
        }
    }
}

/// Per-profile timeouts, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutsConfig {
    /// How long a freshly spawned slave has to complete handshake.
    /// Default: 10000
    #[serde(default = "TimeoutsConfig::default_startup")]
    pub startup_ms: u64,

    /// Maximum gap between heartbeats before a slave is considered dead.
    /// Default: 30000
    #[serde(default = "TimeoutsConfig::default_heartbeat")]
    pub heartbeat_ms: u64,

    /// How long an active-but-idle slave may sit with no channels before
    /// it is sealed.
    /// Default: 120000
    #[serde(default = "TimeoutsConfig::default_idle")]
    pub idle_ms: u64,

    /// How long a sealed slave has to exit after `terminate` before it is
    /// killed outright.
    /// Default: 5000
    #[serde(default = "TimeoutsConfig::default_termination")]
    pub termination_ms: u64,
}

impl TimeoutsConfig {
    fn default_startup() -> u64 {
        10_000
    }

    fn default_heartbeat() -> u64 {
        30_000
    }

    fn default_idle() -> u64 {
        120_000
    }

    fn default_termination() -> u64 {
        5_000
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            startup_ms: Self::default_startup(),
            heartbeat_ms: Self::default_heartbeat(),
            idle_ms: Self::default_idle(),
            termination_ms: Self::default_termination(),
        }
    }
}

/// Profile: the policy an Overseer enforces for one app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    /// Hard ceiling on the number of simultaneously running slaves.
    /// Default: 1
    #[serde(default = "ProfileConfig::default_pool_limit")]
    pub pool_limit: usize,

    /// Maximum number of channels one slave may be juggling at once.
    /// Default: 10
    #[serde(default = "ProfileConfig::default_concurrency")]
    pub concurrency: usize,

    /// Fraction of `concurrency` at which the balancer asks for another
    /// slave rather than queuing further.
    /// Default: 0.7
    #[serde(default = "ProfileConfig::default_grow_threshold")]
    pub grow_threshold: f64,

    /// Maximum number of channels the pending queue may hold before new
    /// enqueue calls are rejected with a resource error.
    /// Default: 100
    #[serde(default = "ProfileConfig::default_queue_limit")]
    pub queue_limit: usize,

    /// Size of the bounded crash log ring kept per app.
    /// Default: 20
    #[serde(default = "ProfileConfig::default_crashlog_limit")]
    pub crashlog_limit: usize,

    /// Lifecycle timeouts.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// How worker processes are spawned.
    #[serde(default)]
    pub isolate: IsolateConfig,
}

impl ProfileConfig {
    fn default_pool_limit() -> usize {
        1
    }

    fn default_concurrency() -> usize {
        10
    }

    fn default_grow_threshold() -> f64 {
        0.7
    }

    fn default_queue_limit() -> usize {
        100
    }

    fn default_crashlog_limit() -> usize {
        20
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            pool_limit: Self::default_pool_limit(),
            concurrency: Self::default_concurrency(),
            grow_threshold: Self::default_grow_threshold(),
            queue_limit: Self::default_queue_limit(),
            crashlog_limit: Self::default_crashlog_limit(),
            timeouts: TimeoutsConfig::default(),
            isolate: IsolateConfig::default(),
        }
    }
}

/// Named profiles available at bootstrap. Apps not otherwise configured
/// use `default`; the Overseer copies its settings at `start_app` time
/// and owns that copy for the rest of the app's life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    #[serde(flatten)]
    pub named: HashMap<String, ProfileConfig>,
}

impl ProfilesConfig {
    /// Resolve a named profile, falling back to the compiled-in default
    /// when the name is absent or `None`.
    pub fn resolve(&self, name: Option<&str>) -> ProfileConfig {
        match name {
            Some(name) => self.named.get(name).cloned().unwrap_or_default(),
            None => self.named.get("default").cloned().unwrap_or_default(),
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        let mut named = HashMap::new();
        named.insert("default".to_string(), ProfileConfig::default());
        Self { named }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_defaults() {
        let profile = ProfileConfig::default();
        assert_eq!(profile.pool_limit, 1);
        assert_eq!(profile.concurrency, 10);
        assert_eq!(profile.queue_limit, 100);
        assert_eq!(profile.crashlog_limit, 20);
        assert!((profile.grow_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timeouts_defaults() {
        let timeouts = TimeoutsConfig::default();
        assert_eq!(timeouts.startup_ms, 10_000);
        assert_eq!(timeouts.heartbeat_ms, 30_000);
        assert_eq!(timeouts.idle_ms, 120_000);
        assert_eq!(timeouts.termination_ms, 5_000);
    }

    #[test]
    fn test_isolate_defaults() {
        let isolate = IsolateConfig::default();
        assert_eq!(isolate.ty, "process");
        assert!(isolate.args.is_empty());
    }

    #[test]
    fn test_resolve_profile_falls_back_to_default() {
        let profiles = ProfilesConfig::default();
        let resolved = profiles.resolve(Some("nonexistent"));
        assert_eq!(resolved, ProfileConfig::default());

        let resolved_none = profiles.resolve(None);
        assert_eq!(resolved_none, ProfileConfig::default());
    }
}
