//! cocaine-node — the node service façade: multiplexes
//! `start_app`/`pause_app`/`list`/`enqueue` over a registry of running
//! Overseers, one per app name.
//!
//! Socket acceptance and wire framing live outside this crate; `Node`
//! is the thing an RPC layer calls into once it has decoded a service
//! or app-tag request.

pub mod error;
pub mod isolate;
pub mod telemetry;

pub use error::NodeError;
pub use isolate::ProcessIsolate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cocaine_config::{CocaineConfig, ProfileConfig};
use cocaine_overseer::{
    ClientUpstream, HandshakeRegistry, Isolate, LoadBalancer, Manifest, OverseerHandle, WorkerChannelIo,
};
use cocaine_proto::{AppInfo, Event, WorkerMessage};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Default period for each Overseer's timeout/idle/growth sweep.
const TICK_PERIOD: Duration = Duration::from_millis(250);

struct AppEntry {
    handle: OverseerHandle,
    manifest: Manifest,
    handshake: Arc<HandshakeRegistry>,
}

/// The node service's registry of running apps.
pub struct Node {
    config: CocaineConfig,
    node_pid: u32,
    isolate: Arc<dyn Isolate>,
    apps: RwLock<HashMap<String, AppEntry>>,
}

impl Node {
    pub fn new(config: CocaineConfig) -> Self {
        Self::with_isolate(config, Arc::new(ProcessIsolate))
    }

    pub fn with_isolate(config: CocaineConfig, isolate: Arc<dyn Isolate>) -> Self {
        Self {
            config,
            node_pid: std::process::id(),
            isolate,
            apps: RwLock::new(HashMap::new()),
        }
    }

    /// Validates the manifest, instantiates an Overseer, and registers
    /// the app under `name`. Fails `already_running` if an
    /// Overseer with this name is already live.
    pub async fn start_app(
        &self,
        name: impl Into<String>,
        executable: impl Into<String>,
        profile_override: Option<ProfileConfig>,
    ) -> Result<(), NodeError> {
        let name = name.into();
        let executable = executable.into();
        if name.trim().is_empty() {
            return Err(NodeError::InvalidManifest {
                reason: "app name must not be empty".to_string(),
            });
        }
        if executable.trim().is_empty() {
            return Err(NodeError::InvalidManifest {
                reason: format!("{name}: executable path must not be empty"),
            });
        }

        let mut apps = self.apps.write().await;
        if apps.contains_key(&name) {
            return Err(NodeError::AlreadyRunning { name });
        }

        let profile = profile_override.unwrap_or_else(|| self.config.profiles.resolve(Some(&name)));
        let manifest = Manifest::new(
            name.clone(),
            executable,
            &self.config.infra.paths.runtime_dir,
            self.node_pid,
        );

        let handshake = Arc::new(HandshakeRegistry::new());
        let handle = OverseerHandle::spawn(
            manifest.clone(),
            profile,
            self.isolate.clone(),
            Box::new(LoadBalancer),
            handshake.clone(),
            TICK_PERIOD,
        );

        info!(app = %name, endpoint = %manifest.endpoint.display(), "app started");
        apps.insert(name, AppEntry { handle, manifest, handshake });
        Ok(())
    }

    /// Stops admitting new requests to `name`'s Overseer.
    /// Already-running channels drain normally.
    pub async fn pause_app(&self, name: &str) -> Result<(), NodeError> {
        let apps = self.apps.read().await;
        let entry = apps.get(name).ok_or_else(|| NodeError::UnknownApp { name: name.to_string() })?;
        entry.handle.pause();
        Ok(())
    }

    pub async fn list(&self) -> Vec<String> {
        self.apps.read().await.keys().cloned().collect()
    }

    /// Finds `app`'s Overseer and forwards the event and
    /// client-side stream onto it.
    pub async fn enqueue(&self, app: &str, event: Event, client: ClientUpstream) -> Result<(), NodeError> {
        let apps = self.apps.read().await;
        let entry = apps.get(app).ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })?;
        entry.handle.enqueue(event, client);
        Ok(())
    }

    pub async fn info(&self, app: &str) -> Result<AppInfo, NodeError> {
        let apps = self.apps.read().await;
        let entry = apps.get(app).ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })?;
        entry
            .handle
            .info()
            .await
            .ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })
    }

    /// Waits for `app`'s Overseer to have published `uuid` as a legitimate
    /// handshake target, bounded by `startup_timeout`. The acceptor calls
    /// this for a worker's first control-socket connect, then forwards
    /// the handshake with `worker_handshake` once it resolves.
    pub async fn wait_for_worker_bind(
        &self,
        app: &str,
        uuid: Uuid,
        startup_timeout: std::time::Duration,
    ) -> Result<(), NodeError> {
        let handshake = {
            let apps = self.apps.read().await;
            let entry = apps.get(app).ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })?;
            entry.handshake.clone()
        };
        handshake
            .wait_for_bind(uuid, startup_timeout)
            .await
            .map_err(|_| NodeError::UnknownApp { name: app.to_string() })
    }

    /// Forwards a worker's control-socket handshake to its Overseer.
    pub async fn worker_handshake(
        &self,
        app: &str,
        uuid: Uuid,
        control_tx: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Result<(), NodeError> {
        let apps = self.apps.read().await;
        let entry = apps.get(app).ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })?;
        entry.handle.worker_handshake(uuid, control_tx);
        Ok(())
    }

    /// Forwards a worker's control-socket heartbeat to its Overseer.
    pub async fn worker_heartbeat(&self, app: &str, uuid: Uuid) -> Result<(), NodeError> {
        let apps = self.apps.read().await;
        let entry = apps.get(app).ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })?;
        entry.handle.worker_heartbeat(uuid);
        Ok(())
    }

    /// Claims the worker-side io for a dispatched channel once the
    /// acceptor has identified which channel an inbound worker frame
    /// names.
    pub async fn take_worker_channel(
        &self,
        app: &str,
        uuid: Uuid,
        channel_id: u64,
    ) -> Result<Option<WorkerChannelIo>, NodeError> {
        let apps = self.apps.read().await;
        let entry = apps.get(app).ok_or_else(|| NodeError::UnknownApp { name: app.to_string() })?;
        Ok(entry.handle.take_worker_channel(uuid, channel_id).await)
    }

    /// Tears down an app entirely: pauses new enqueues and signals the
    /// Overseer's strand to shut down (sealing every live slave first).
    pub async fn stop_app(&self, name: &str) -> Result<(), NodeError> {
        let mut apps = self.apps.write().await;
        let entry = apps.remove(name).ok_or_else(|| NodeError::UnknownApp { name: name.to_string() })?;
        entry.handle.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cocaine_overseer::ProcessHandle;

    /// A local stand-in isolate: `cocaine-overseer`'s own test stub is
    /// `#[cfg(test)]`-gated and invisible to downstream crates, so this
    /// crate keeps its own.
    struct NeverSpawns;

    #[async_trait]
    impl Isolate for NeverSpawns {
        async fn spawn(
            &self,
            _uuid: uuid::Uuid,
            _executable: &str,
            _env: HashMap<String, String>,
        ) -> Result<Box<dyn ProcessHandle>, String> {
            Err("test isolate never actually spawns".to_string())
        }
    }

    fn test_node() -> Node {
        Node::with_isolate(CocaineConfig::default(), Arc::new(NeverSpawns))
    }

    #[tokio::test]
    async fn start_app_registers_and_lists() {
        let node = test_node();
        node.start_app("echo", "/bin/echo-worker", None).await.unwrap();
        assert_eq!(node.list().await, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn start_app_with_empty_name_is_an_invalid_manifest() {
        let node = test_node();
        let err = node.start_app("", "/bin/echo-worker", None).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn start_app_with_empty_executable_is_an_invalid_manifest() {
        let node = test_node();
        let err = node.start_app("echo", "", None).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidManifest { .. }));
        assert!(node.list().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_start_app_rejected() {
        let node = test_node();
        node.start_app("echo", "/bin/echo-worker", None).await.unwrap();
        let err = node.start_app("echo", "/bin/echo-worker", None).await.unwrap_err();
        assert!(matches!(err, NodeError::AlreadyRunning { name } if name == "echo"));
    }

    #[tokio::test]
    async fn enqueue_on_unknown_app_fails() {
        let node = test_node();
        let (upstream, _client) = ClientUpstream::new_test_pair();
        let err = node.enqueue("ghost", Event::new("noop"), upstream).await.unwrap_err();
        assert!(matches!(err, NodeError::UnknownApp { name } if name == "ghost"));
    }

    #[tokio::test]
    async fn info_reports_zero_pool_right_after_start() {
        let node = test_node();
        node.start_app("echo", "/bin/echo-worker", None).await.unwrap();
        let info = node.info("echo").await.unwrap();
        assert_eq!(info.pool.len(), 0);
        assert_eq!(info.spawned, 0);
    }

    #[tokio::test]
    async fn stop_app_removes_it_from_the_registry() {
        let node = test_node();
        node.start_app("echo", "/bin/echo-worker", None).await.unwrap();
        node.stop_app("echo").await.unwrap();
        assert!(node.list().await.is_empty());
    }

    #[tokio::test]
    async fn wait_for_worker_bind_times_out_for_an_unpublished_uuid() {
        let node = test_node();
        node.start_app("echo", "/bin/echo-worker", None).await.unwrap();
        let err = node
            .wait_for_worker_bind("echo", Uuid::new_v4(), std::time::Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownApp { name } if name == "echo"));
    }

    #[tokio::test]
    async fn worker_handshake_on_unknown_app_fails() {
        let node = test_node();
        let (control_tx, _control_rx) = mpsc::unbounded_channel();
        let err = node.worker_handshake("ghost", Uuid::new_v4(), control_tx).await.unwrap_err();
        assert!(matches!(err, NodeError::UnknownApp { name } if name == "ghost"));
    }

    #[tokio::test]
    async fn take_worker_channel_with_no_dispatch_yet_is_none() {
        let node = test_node();
        node.start_app("echo", "/bin/echo-worker", None).await.unwrap();
        let result = node.take_worker_channel("echo", Uuid::new_v4(), 1).await.unwrap();
        assert!(result.is_none());
    }
}
