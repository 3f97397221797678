//! The handshaker rendezvous.
//!
//! The worker's first frame on its control socket names a UUID the
//! Overseer may not have published a `Slave` record for yet — the
//! isolate's `spawn()` and the worker's own TCP connect race each other.
//! `HandshakeRegistry` makes both orderings correct: whichever of
//! `bind()` / `wait_for_bind()` arrives first leaves a marker for the
//! other, bounded by `startup_timeout`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// No `bind()` arrived within `startup_timeout`; the connection is
    /// dropped.
    UnknownActivate,
}

enum Slot {
    /// The Overseer already called `bind()`; the next `wait_for_bind`
    /// for this UUID returns immediately.
    Bound,
    /// A dispatch is waiting on this UUID; resolved by `bind()`.
    Waiting(oneshot::Sender<()>),
}

#[derive(Default)]
pub struct HandshakeRegistry {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl HandshakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the Overseer once it has inserted a `Spawning` slave
    /// into its pool, publishing that `uuid` is now a legitimate
    /// handshake target.
    pub fn bind(&self, uuid: Uuid) {
        let mut slots = self.slots.lock().unwrap();
        match slots.remove(&uuid) {
            Some(Slot::Waiting(tx)) => {
                let _ = tx.send(());
            }
            _ => {
                slots.insert(uuid, Slot::Bound);
            }
        }
    }

    /// Called by the acceptor's handshake dispatch. Resolves once `bind`
    /// has been (or is) called for `uuid`, or fails after
    /// `startup_timeout` with `UnknownActivate`.
    pub async fn wait_for_bind(&self, uuid: Uuid, startup_timeout: Duration) -> Result<(), HandshakeError> {
        let rx = {
            let mut slots = self.slots.lock().unwrap();
            match slots.remove(&uuid) {
                Some(Slot::Bound) => return Ok(()),
                _ => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(uuid, Slot::Waiting(tx));
                    rx
                }
            }
        };

        match tokio::time::timeout(startup_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.slots.lock().unwrap().remove(&uuid);
                Err(HandshakeError::UnknownActivate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn bind_before_wait_resolves_immediately() {
        let registry = Arc::new(HandshakeRegistry::new());
        let uuid = Uuid::new_v4();
        registry.bind(uuid);
        let result = registry.wait_for_bind(uuid, Duration::from_millis(50)).await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn wait_before_bind_resolves_once_bound() {
        let registry = Arc::new(HandshakeRegistry::new());
        let uuid = Uuid::new_v4();

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move {
            registry2.wait_for_bind(uuid, Duration::from_millis(200)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.bind(uuid);

        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn unbound_uuid_times_out() {
        let registry = HandshakeRegistry::new();
        let uuid = Uuid::new_v4();
        let result = registry.wait_for_bind(uuid, Duration::from_millis(20)).await;
        assert_eq!(result, Err(HandshakeError::UnknownActivate));
    }
}
