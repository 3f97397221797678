//! The isolate sandbox: an external collaborator this crate only calls
//! through, never implements. Production deployments back it with an OS
//! process spawner, a container runtime, or similar; tests use an
//! in-memory stub.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

/// A handle to one spawned worker process. Dropping it must not kill the
/// process — only an explicit `kill()` does that; the Overseer is
/// responsible for calling `kill()` on every exit path, including
/// abnormal ones.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// True if the process has exited on its own.
    async fn is_alive(&self) -> bool;

    /// Forcibly terminates the process. Idempotent.
    async fn kill(&self);
}

/// The sandbox that spawns and destroys worker processes.
#[async_trait]
pub trait Isolate: Send + Sync {
    /// Spawns one worker process for `uuid`, setting `env` (at minimum
    /// `COCAINE_APP_NAME`, `COCAINE_APP_UUID`, `COCAINE_APP_ENDPOINT`)
    /// in its environment. May block briefly; callers run it on a
    /// blocking-friendly executor so the Overseer strand is never
    /// stalled.
    async fn spawn(
        &self,
        uuid: Uuid,
        executable: &str,
        env: HashMap<String, String>,
    ) -> Result<Box<dyn ProcessHandle>, String>;
}

#[cfg(test)]
pub mod stub {
    //! An in-memory `Isolate` used by Overseer tests: `spawn` always
    //! succeeds and returns a handle that reports alive until `kill()`.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub struct StubHandle {
        alive: Arc<AtomicBool>,
    }

    impl StubHandle {
        pub fn new() -> Self {
            Self {
                alive: Arc::new(AtomicBool::new(true)),
            }
        }
    }

    impl Default for StubHandle {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessHandle for StubHandle {
        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn kill(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct StubIsolate;

    #[async_trait]
    impl Isolate for StubIsolate {
        async fn spawn(
            &self,
            _uuid: Uuid,
            _executable: &str,
            _env: HashMap<String, String>,
        ) -> Result<Box<dyn ProcessHandle>, String> {
            Ok(Box::new(StubHandle {
                alive: Arc::new(AtomicBool::new(true)),
            }))
        }
    }
}
