//! The immutable per-app description. Created at `start_app`, destroyed
//! with the app; nothing here changes for the app's lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Immutable per-app configuration.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub name: String,
    pub executable: String,
    pub environment: HashMap<String, String>,
    /// Unix-socket path workers connect back to:
    /// `{runtime_path}/{app_name}.{pid}`.
    pub endpoint: PathBuf,
}

impl Manifest {
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<String>,
        runtime_dir: &Path,
        node_pid: u32,
    ) -> Self {
        let name = name.into();
        let endpoint = runtime_dir.join(format!("{name}.{node_pid}"));
        Self {
            name,
            executable: executable.into(),
            environment: HashMap::new(),
            endpoint,
        }
    }

    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    /// Environment handed to every spawned worker process, seeded with
    /// `COCAINE_APP_NAME`/`COCAINE_APP_UUID`/`COCAINE_APP_ENDPOINT` and
    /// overlaid with the manifest's own `environment`.
    pub fn worker_env(&self, uuid: uuid::Uuid) -> HashMap<String, String> {
        let mut env = self.environment.clone();
        env.insert("COCAINE_APP_NAME".to_string(), self.name.clone());
        env.insert("COCAINE_APP_UUID".to_string(), uuid.to_string());
        env.insert(
            "COCAINE_APP_ENDPOINT".to_string(),
            self.endpoint.to_string_lossy().into_owned(),
        );
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_follows_runtime_path_convention() {
        let manifest = Manifest::new("echo", "/bin/echo-worker", Path::new("/run/cocaine"), 4242);
        assert_eq!(manifest.endpoint, PathBuf::from("/run/cocaine/echo.4242"));
    }

    #[test]
    fn worker_env_carries_required_variables() {
        let manifest = Manifest::new("echo", "/bin/echo-worker", Path::new("/run/cocaine"), 1);
        let uuid = uuid::Uuid::new_v4();
        let env = manifest.worker_env(uuid);
        assert_eq!(env.get("COCAINE_APP_NAME"), Some(&"echo".to_string()));
        assert_eq!(env.get("COCAINE_APP_UUID"), Some(&uuid.to_string()));
        assert!(env.contains_key("COCAINE_APP_ENDPOINT"));
    }
}
