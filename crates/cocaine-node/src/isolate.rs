//! The default "process" isolate: spawns the worker as a plain child
//! process. Container/cgroup-backed isolates are a separate collaborator
//! entirely and are not this crate's concern — this is the minimal
//! backend needed to run a worker at all.

use std::collections::HashMap;

use async_trait::async_trait;
use cocaine_overseer::{Isolate, ProcessHandle};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

pub struct ProcessHandleImpl {
    child: Mutex<Child>,
}

#[async_trait]
impl ProcessHandle for ProcessHandleImpl {
    async fn is_alive(&self) -> bool {
        match self.child.lock().await.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => false,
        }
    }

    async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(err) = child.kill().await {
            warn!(%err, "failed to kill worker process (already exited?)");
        }
    }
}

#[derive(Default)]
pub struct ProcessIsolate;

#[async_trait]
impl Isolate for ProcessIsolate {
    async fn spawn(
        &self,
        uuid: Uuid,
        executable: &str,
        env: HashMap<String, String>,
    ) -> Result<Box<dyn ProcessHandle>, String> {
        let mut command = Command::new(executable);
        command.envs(env).kill_on_drop(false);
        let child = command
            .spawn()
            .map_err(|err| format!("failed to spawn worker for {uuid}: {err}"))?;
        Ok(Box::new(ProcessHandleImpl {
            child: Mutex::new(child),
        }))
    }
}
