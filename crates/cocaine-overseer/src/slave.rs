//! The per-worker lifecycle.
//!
//! A `Slave` is plain data: every method here is called exclusively from
//! the owning Overseer's single-threaded strand (see `overseer.rs`), so
//! no internal locking is needed on the struct itself. The `Channel`s it
//! hands out are `Arc`-shared with the bridge tasks and lock internally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cocaine_proto::{ErrorCode, SlaveError, WorkerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::Channel;
use crate::isolate::ProcessHandle;

/// Tagged lifecycle state: spawning → handshaking → active → sealing →
/// terminating, with `Broken` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Spawning,
    Unauthenticated,
    Handshaking,
    Active,
    Sealing,
    Terminating,
    Broken(SlaveError),
}

impl SlaveState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SlaveState::Broken(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlaveState::Spawning => "spawning",
            SlaveState::Unauthenticated => "unauthenticated",
            SlaveState::Handshaking => "handshaking",
            SlaveState::Active => "active",
            SlaveState::Sealing => "sealing",
            SlaveState::Terminating => "terminating",
            SlaveState::Broken(_) => "broken",
        }
    }
}

/// Why `inject` or another operation could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveOpError {
    InvalidState,
    AtCapacity,
}

pub struct Slave {
    pub uuid: Uuid,
    pub birthstamp: DateTime<Utc>,
    state: SlaveState,
    process: Option<Box<dyn ProcessHandle>>,
    control_tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
    channels: HashMap<u64, Arc<Channel>>,
    next_channel_id: u64,
    concurrency: usize,

    startup_timeout: Duration,
    heartbeat_timeout: Duration,
    termination_timeout: Duration,

    startup_deadline: Option<Instant>,
    heartbeat_deadline: Option<Instant>,
    termination_deadline: Option<Instant>,

    /// Set to `Instant::now()` whenever `channels` becomes empty while
    /// `Active`; cleared the moment a new channel is injected. The
    /// balancer's idle-seal check reads this.
    idle_since: Option<Instant>,
}

impl Slave {
    pub fn new(
        uuid: Uuid,
        concurrency: usize,
        startup_timeout: Duration,
        heartbeat_timeout: Duration,
        termination_timeout: Duration,
    ) -> Self {
        Self {
            uuid,
            birthstamp: Utc::now(),
            state: SlaveState::Spawning,
            process: None,
            control_tx: None,
            channels: HashMap::new(),
            next_channel_id: 1,
            concurrency,
            startup_timeout,
            heartbeat_timeout,
            termination_timeout,
            startup_deadline: Some(Instant::now() + startup_timeout),
            heartbeat_deadline: None,
            termination_deadline: None,
            idle_since: None,
        }
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.state == SlaveState::Active && self.channels.len() < self.concurrency
    }

    /// Records that the isolate finished spawning the process and the
    /// worker connected on the control socket, awaiting its first
    /// heartbeat. Called once the handshaker rendezvous resolves.
    pub fn on_spawned(&mut self, process: Box<dyn ProcessHandle>) {
        self.process = Some(process);
        self.state = SlaveState::Unauthenticated;
    }

    /// handshake(uuid) arrived: control socket is live, move to
    /// Handshaking and wait for the first heartbeat.
    pub fn on_handshake(&mut self, control_tx: mpsc::UnboundedSender<WorkerMessage>) {
        self.control_tx = Some(control_tx);
        self.state = SlaveState::Handshaking;
        self.startup_deadline = None;
    }

    /// `activate`: the first heartbeat after handshake binds the slave
    /// into the active pool.
    pub fn activate(&mut self) -> Result<(), SlaveOpError> {
        if self.state != SlaveState::Handshaking {
            return Err(SlaveOpError::InvalidState);
        }
        self.state = SlaveState::Active;
        self.idle_since = Some(Instant::now());
        self.heartbeat_deadline = Some(Instant::now() + self.heartbeat_timeout);
        Ok(())
    }

    /// Allocates a channel and wires it to the control stream's invoke
    /// slot. Fails if the slave isn't `Active` or is already at
    /// `concurrency`.
    pub fn inject(&mut self) -> Result<Arc<Channel>, SlaveOpError> {
        if self.state != SlaveState::Active {
            return Err(SlaveOpError::InvalidState);
        }
        if self.channels.len() >= self.concurrency {
            return Err(SlaveOpError::AtCapacity);
        }
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        let channel = Arc::new(Channel::new(id));
        self.channels.insert(id, channel.clone());
        self.idle_since = None;
        Ok(channel)
    }

    pub fn control_sender(&self) -> Option<mpsc::UnboundedSender<WorkerMessage>> {
        self.control_tx.clone()
    }

    /// Stops admitting new channels; existing ones continue draining.
    pub fn seal(&mut self) -> Result<(), SlaveOpError> {
        if self.state != SlaveState::Active {
            return Err(SlaveOpError::InvalidState);
        }
        self.state = SlaveState::Sealing;
        if self.channels.is_empty() {
            self.state = SlaveState::Terminating;
            self.termination_deadline = Some(Instant::now() + self.termination_timeout);
        }
        Ok(())
    }

    /// Sends `terminate` on the control stream and arms the termination
    /// timeout. Idempotent: calling it on an already-terminal slave does
    /// nothing.
    pub fn terminate(&mut self, code: u32, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(tx) = &self.control_tx {
            let _ = tx.send(WorkerMessage::Terminate { code, reason });
        }
        self.state = SlaveState::Terminating;
        self.termination_deadline = Some(Instant::now() + self.termination_timeout);
    }

    /// Re-arms the heartbeat timer. Silent no-op on a terminal slave.
    pub fn on_heartbeat(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.heartbeat_deadline = Some(Instant::now() + self.heartbeat_timeout);
    }

    /// Erases a closed channel, decrementing load. If `Sealing` and this
    /// was the last channel, advances to `Terminating`.
    pub fn on_channel_close(&mut self, channel_id: u64) {
        self.channels.remove(&channel_id);
        if self.channels.is_empty() {
            match self.state {
                SlaveState::Sealing => {
                    self.state = SlaveState::Terminating;
                    self.termination_deadline = Some(Instant::now() + self.termination_timeout);
                }
                SlaveState::Active => self.idle_since = Some(Instant::now()),
                _ => {}
            }
        }
    }

    pub fn idle_for(&self) -> Option<Duration> {
        self.idle_since.map(|since| since.elapsed())
    }

    /// Forces the slave into a terminal state, aborting every open
    /// channel with `connection_aborted`-equivalent `error_code`.
    pub fn break_with(&mut self, error: SlaveError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SlaveState::Broken(error);
        for channel in self.channels.values() {
            channel.close_both(ErrorCode::Server);
        }
    }

    /// Checks the armed timers against `now`, returning the
    /// `SlaveError` that should break this slave, if any deadline has
    /// passed. Does not mutate state; the caller applies `break_with`.
    pub fn expired_timeout(&self) -> Option<SlaveError> {
        let now = Instant::now();
        if matches!(self.state, SlaveState::Spawning | SlaveState::Unauthenticated) {
            if let Some(deadline) = self.startup_deadline {
                if now >= deadline {
                    return Some(SlaveError::SpawnTimeout);
                }
            }
        }
        if self.state == SlaveState::Handshaking {
            if let Some(deadline) = self.startup_deadline.or(self.heartbeat_deadline) {
                if now >= deadline {
                    return Some(SlaveError::ActivateTimeout);
                }
            }
        }
        if matches!(self.state, SlaveState::Active | SlaveState::Sealing) {
            if let Some(deadline) = self.heartbeat_deadline {
                if now >= deadline {
                    return Some(SlaveError::HeartbeatTimeout);
                }
            }
        }
        if self.state == SlaveState::Terminating {
            if let Some(deadline) = self.termination_deadline {
                if now >= deadline {
                    return Some(SlaveError::TerminateTimeout);
                }
            }
        }
        None
    }

    pub async fn kill(&self) {
        if let Some(process) = &self.process {
            process.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_slave() -> Slave {
        Slave::new(
            Uuid::new_v4(),
            2,
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn happy_path_through_active() {
        let mut slave = new_slave();
        assert_eq!(slave.state(), SlaveState::Spawning);

        slave.on_spawned(Box::new(crate::isolate::stub::StubHandle::new()));
        assert_eq!(slave.state(), SlaveState::Unauthenticated);

        let (tx, _rx) = mpsc::unbounded_channel();
        slave.on_handshake(tx);
        assert_eq!(slave.state(), SlaveState::Handshaking);

        slave.activate().unwrap();
        assert_eq!(slave.state(), SlaveState::Active);
        assert!(slave.has_capacity());
    }

    #[test]
    fn inject_rejects_over_concurrency() {
        let mut slave = new_slave();
        let (tx, _rx) = mpsc::unbounded_channel();
        slave.on_spawned(Box::new(crate::isolate::stub::StubHandle::new()));
        slave.on_handshake(tx);
        slave.activate().unwrap();

        slave.inject().unwrap();
        slave.inject().unwrap();
        assert_eq!(slave.inject(), Err(SlaveOpError::AtCapacity));
    }

    #[test]
    fn seal_with_no_channels_goes_straight_to_terminating() {
        let mut slave = new_slave();
        let (tx, _rx) = mpsc::unbounded_channel();
        slave.on_spawned(Box::new(crate::isolate::stub::StubHandle::new()));
        slave.on_handshake(tx);
        slave.activate().unwrap();

        slave.seal().unwrap();
        assert_eq!(slave.state(), SlaveState::Terminating);
    }

    #[test]
    fn seal_with_channels_waits_for_drain() {
        let mut slave = new_slave();
        let (tx, _rx) = mpsc::unbounded_channel();
        slave.on_spawned(Box::new(crate::isolate::stub::StubHandle::new()));
        slave.on_handshake(tx);
        slave.activate().unwrap();
        let channel = slave.inject().unwrap();

        slave.seal().unwrap();
        assert_eq!(slave.state(), SlaveState::Sealing);

        slave.on_channel_close(channel.id);
        assert_eq!(slave.state(), SlaveState::Terminating);
    }

    #[test]
    fn break_with_aborts_open_channels() {
        let mut slave = new_slave();
        let (tx, _rx) = mpsc::unbounded_channel();
        slave.on_spawned(Box::new(crate::isolate::stub::StubHandle::new()));
        slave.on_handshake(tx);
        slave.activate().unwrap();
        let channel = slave.inject().unwrap();

        slave.break_with(SlaveError::HeartbeatTimeout);
        assert!(matches!(slave.state(), SlaveState::Broken(SlaveError::HeartbeatTimeout)));
        assert!(channel.is_tx_closed());
        assert!(channel.is_rx_closed());
    }

    #[test]
    fn heartbeat_timeout_detected_once_elapsed() {
        let mut slave = new_slave();
        let (tx, _rx) = mpsc::unbounded_channel();
        slave.on_spawned(Box::new(crate::isolate::stub::StubHandle::new()));
        slave.on_handshake(tx);
        slave.activate().unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(slave.expired_timeout(), Some(SlaveError::HeartbeatTimeout));
    }

    #[test]
    fn on_heartbeat_is_silent_once_terminal() {
        let mut slave = new_slave();
        slave.break_with(SlaveError::ControlIpcError);
        slave.on_heartbeat(); // must not panic
        assert!(matches!(slave.state(), SlaveState::Broken(_)));
    }
}
