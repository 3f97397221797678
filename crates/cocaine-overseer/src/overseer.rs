//! Glues pool, queue, balancer, manifest, and isolate together.
//! `Overseer` itself is plain data; `OverseerHandle` runs it as a
//! single-threaded strand: one task owns every pool/queue/balancer
//! mutation, and anything that happens off-strand (a bridge task
//! closing a channel, a timer firing) gets back onto it by sending a
//! `Command`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cocaine_config::ProfileConfig;
use cocaine_proto::{AppInfo, CrashLogEntry, ErrorCode, Event, SlaveError, SlaveInfo, StreamFrame, WorkerMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::balancer::{Balancer, BalancerAction, PoolCounts, SlaveSnapshot};
use crate::bridge::{self, ClientUpstream, WorkerChannelIo};
use crate::handshake::HandshakeRegistry;
use crate::isolate::Isolate;
use crate::manifest::Manifest;
use crate::queue::{Load, Queue};
use crate::slave::{Slave, SlaveState};

/// How the Overseer should destroy a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DespawnPolicy {
    /// Stop admitting new channels, wait for in-flight ones to drain.
    Graceful,
    /// Abort every in-flight channel immediately, then kill.
    Force,
}

/// Messages dispatched onto the Overseer's strand. Every pool/queue/
/// balancer mutation happens inside `run_loop`'s handling of one of
/// these — nothing outside this module ever touches `pool` or `queue`
/// directly.
enum Command {
    Enqueue {
        event: Event,
        client: ClientUpstream,
    },
    Info(oneshot::Sender<AppInfo>),
    Pause,
    Despawn {
        uuid: Uuid,
        policy: DespawnPolicy,
    },
    /// The worker on `uuid`'s control socket sent `handshake`.
    WorkerHandshake {
        uuid: Uuid,
        control_tx: mpsc::UnboundedSender<WorkerMessage>,
    },
    WorkerHeartbeat {
        uuid: Uuid,
    },
    /// Posted back by a bridge's `Channel::watch` callback once both
    /// halves of one channel are closed.
    ChannelClosed {
        uuid: Uuid,
        channel_id: u64,
    },
    /// The isolate finished spawning `uuid`'s worker process.
    WorkerProcessReady(Uuid, Box<dyn crate::isolate::ProcessHandle>),
    /// The isolate failed to spawn `uuid`'s worker process at all.
    WorkerSpawnFailed(Uuid, String),
    TakeWorkerChannel {
        uuid: Uuid,
        channel_id: u64,
        reply: oneshot::Sender<Option<WorkerChannelIo>>,
    },
    Shutdown,
}

/// The façade handed to the App/node service layer; cloneable, cheap,
/// and safe to call from any thread. Every method round-trips through
/// the strand task via `cmd_tx`.
#[derive(Clone)]
pub struct OverseerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl OverseerHandle {
    /// Spawns the strand task and returns a handle to it. `tick_period`
    /// drives the periodic timeout/idle/growth sweep; production callers
    /// pass something well under the smallest configured timeout (a few
    /// hundred milliseconds is typical).
    pub fn spawn(
        manifest: Manifest,
        profile: ProfileConfig,
        isolate: Arc<dyn Isolate>,
        balancer: Box<dyn Balancer + Send>,
        handshake: Arc<HandshakeRegistry>,
        tick_period: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let overseer = Overseer::new(manifest, profile, isolate, balancer, handshake, cmd_tx.clone());
        tokio::spawn(overseer.run_loop(cmd_rx, tick_period));
        Self { cmd_tx }
    }

    pub fn enqueue(&self, event: Event, client: ClientUpstream) {
        let _ = self.cmd_tx.send(Command::Enqueue { event, client });
    }

    pub async fn info(&self) -> Option<AppInfo> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Info(tx)).ok()?;
        rx.await.ok()
    }

    pub fn pause(&self) {
        let _ = self.cmd_tx.send(Command::Pause);
    }

    pub fn despawn(&self, uuid: Uuid, policy: DespawnPolicy) {
        let _ = self.cmd_tx.send(Command::Despawn { uuid, policy });
    }

    pub fn worker_handshake(&self, uuid: Uuid, control_tx: mpsc::UnboundedSender<WorkerMessage>) {
        let _ = self.cmd_tx.send(Command::WorkerHandshake { uuid, control_tx });
    }

    pub fn worker_heartbeat(&self, uuid: Uuid) {
        let _ = self.cmd_tx.send(Command::WorkerHeartbeat { uuid });
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }

    /// Pulls the worker-side io for a dispatched channel, once the RPC
    /// layer has identified which channel an inbound worker frame names.
    /// Returns `None` once already taken, or if the channel never
    /// existed or has since closed.
    pub async fn take_worker_channel(&self, uuid: Uuid, channel_id: u64) -> Option<WorkerChannelIo> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::TakeWorkerChannel { uuid, channel_id, reply: tx })
            .ok()?;
        rx.await.ok()?
    }
}

/// Owns the slave pool, pending queue, and balancer for one app. The
/// worker-side io for each dispatched channel is held in
/// `pending_worker_channels` until the RPC layer claims it with
/// `OverseerHandle::take_worker_channel`.
pub struct Overseer {
    manifest: Manifest,
    profile: ProfileConfig,
    isolate: Arc<dyn Isolate>,
    balancer: Box<dyn Balancer + Send>,
    handshake: Arc<HandshakeRegistry>,
    self_tx: mpsc::UnboundedSender<Command>,

    pool: HashMap<Uuid, Slave>,
    queue: Queue,
    paused: bool,

    spawned: u64,
    crashed: u64,
    requests_total: u64,
    requests_rejected: u64,
    crashlog: VecDeque<CrashLogEntry>,

    /// Worker-side io handed off to the RPC layer once a channel is
    /// dispatched, keyed by `(slave uuid, channel id)`.
    pending_worker_channels: HashMap<(Uuid, u64), WorkerChannelIo>,

    /// A clone of each dispatched channel's client-facing sender, kept
    /// around so `evict` can push a terminal error frame to the client
    /// even though the original sender was moved into the
    /// `run_worker_to_client` bridge task.
    channel_client_tx: HashMap<(Uuid, u64), mpsc::UnboundedSender<StreamFrame>>,
}

impl Overseer {
    fn new(
        manifest: Manifest,
        profile: ProfileConfig,
        isolate: Arc<dyn Isolate>,
        balancer: Box<dyn Balancer + Send>,
        handshake: Arc<HandshakeRegistry>,
        self_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let queue_limit = profile.queue_limit;
        Self {
            manifest,
            profile,
            isolate,
            balancer,
            handshake,
            self_tx,
            pool: HashMap::new(),
            queue: Queue::new(queue_limit),
            paused: false,
            spawned: 0,
            crashed: 0,
            requests_total: 0,
            requests_rejected: 0,
            crashlog: VecDeque::new(),
            pending_worker_channels: HashMap::new(),
            channel_client_tx: HashMap::new(),
        }
    }

    async fn run_loop(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>, tick_period: Duration) {
        let mut ticker = tokio::time::interval(tick_period);
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => {
                            self.seal_all();
                            return;
                        }
                        Some(cmd) => self.handle(cmd).await,
                    }
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue { event, client } => self.enqueue(event, client),
            Command::Info(reply) => {
                let _ = reply.send(self.info());
            }
            Command::Pause => self.paused = true,
            Command::Despawn { uuid, policy } => self.despawn(uuid, policy).await,
            Command::WorkerHandshake { uuid, control_tx } => self.on_worker_handshake(uuid, control_tx),
            Command::WorkerHeartbeat { uuid } => self.on_worker_heartbeat(uuid),
            Command::ChannelClosed { uuid, channel_id } => self.on_channel_closed(uuid, channel_id),
            Command::WorkerProcessReady(uuid, handle) => self.on_worker_process_ready(uuid, handle),
            Command::WorkerSpawnFailed(uuid, reason) => self.on_worker_spawn_failed(uuid, reason).await,
            Command::TakeWorkerChannel { uuid, channel_id, reply } => {
                let _ = reply.send(self.pending_worker_channels.remove(&(uuid, channel_id)));
            }
            Command::Shutdown => unreachable!("handled in run_loop"),
        }
    }

    /// Creates a `Load`, asks the balancer for a slave; either
    /// dispatches immediately or enqueues and asks the balancer
    /// whether the pool should grow.
    fn enqueue(&mut self, event: Event, mut client: ClientUpstream) {
        self.requests_total += 1;

        if event.is_expired(Utc::now()) {
            self.requests_rejected += 1;
            reject(&mut client, ErrorCode::Deadline, "deadline had already passed");
            return;
        }
        if self.paused {
            self.requests_rejected += 1;
            reject(&mut client, ErrorCode::Resource, "app is paused");
            return;
        }

        let snapshot = self.snapshot_pool();
        if let Some(uuid) = self.balancer.on_request(&snapshot, self.profile.concurrency) {
            self.dispatch(uuid, event, client);
            return;
        }

        if self.queue.len() >= self.profile.queue_limit {
            self.requests_rejected += 1;
            reject(&mut client, ErrorCode::Resource, "queue is full");
            return;
        }
        let (dispatched_tx, _dispatched_rx) = mpsc::unbounded_channel();
        if self.queue.push(Load::new(event, client, dispatched_tx)).is_err() {
            // Can't happen: the length check above just ran on the same
            // strand, but fail safe rather than panic.
            warn!("queue rejected a load after passing the length check");
        }
        self.on_queue_changed();
    }

    /// Allocates a channel on `uuid` and wires the two bridge tasks
    /// between `client` and a fresh worker-side pair.
    fn dispatch(&mut self, uuid: Uuid, event: Event, client: ClientUpstream) -> Option<u64> {
        let Some(slave) = self.pool.get_mut(&uuid) else {
            warn!(%uuid, "balancer picked a slave no longer in the pool");
            self.enqueue(event, client);
            return None;
        };
        let channel = match slave.inject() {
            Ok(channel) => channel,
            Err(_) => {
                // Balancer and pool disagreed about capacity; re-enqueue
                // rather than drop the request.
                self.requeue_front(event, client);
                return None;
            }
        };
        let channel_id = channel.id;
        self.balancer.on_channel_started(uuid, channel_id);

        if let Some(control_tx) = slave.control_sender() {
            let _ = control_tx.send(WorkerMessage::Invoke { event: event.name.clone() });
        }

        let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel::<StreamFrame>();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel::<StreamFrame>();

        let watch_tx = self.self_tx.clone();
        channel.watch(move |_err| {
            let _ = watch_tx.send(Command::ChannelClosed { uuid, channel_id });
        });

        self.channel_client_tx.insert((uuid, channel_id), client.outgoing.clone());

        tokio::spawn(bridge::run_client_to_worker(client.incoming, to_worker_tx, channel.clone()));
        tokio::spawn(bridge::run_worker_to_client(to_client_rx, client.outgoing, channel));

        self.pending_worker_channels.insert(
            (uuid, channel_id),
            WorkerChannelIo {
                from_client: to_worker_rx,
                to_client: to_client_tx,
            },
        );
        Some(channel_id)
    }

    fn requeue_front(&mut self, event: Event, client: ClientUpstream) {
        let (dispatched_tx, _dispatched_rx) = mpsc::unbounded_channel();
        let mut rest = std::mem::replace(&mut self.queue, Queue::new(self.profile.queue_limit));
        self.queue.push(Load::new(event, client, dispatched_tx)).ok();
        while let Some(load) = rest.pop() {
            let _ = self.queue.push(load);
        }
    }

    /// Pulls queued loads onto any slave the balancer now considers
    /// available. Runs after a spawn completes, a channel closes, or a
    /// slave joins the pool.
    fn purge(&mut self) {
        loop {
            if self.queue.is_empty() {
                break;
            }
            let snapshot = self.snapshot_pool();
            let Some(uuid) = self.balancer.on_request(&snapshot, self.profile.concurrency) else {
                break;
            };
            let Some(load) = self.queue.pop() else { break };
            if let Some(channel_id) = self.dispatch(uuid, load.event, load.client_upstream) {
                let _ = load.dispatched.send(channel_id);
            }
        }
    }

    fn on_queue_changed(&mut self) {
        let counts = self.pool_counts();
        let action = self
            .balancer
            .on_queue(self.queue.len(), counts, self.profile.pool_limit, self.profile.grow_threshold);
        if action == BalancerAction::Spawn {
            self.spawn();
        }
    }

    /// Generates a UUID, asks the isolate to spawn the worker, inserts a
    /// `Spawning` slave, and publishes the UUID to the
    /// handshaker so the worker's connect can rendezvous with it.
    fn spawn(&mut self) {
        let uuid = Uuid::new_v4();
        let slave = Slave::new(
            uuid,
            self.profile.concurrency,
            Duration::from_millis(self.profile.timeouts.startup_ms),
            Duration::from_millis(self.profile.timeouts.heartbeat_ms),
            Duration::from_millis(self.profile.timeouts.termination_ms),
        );
        self.pool.insert(uuid, slave);
        self.handshake.bind(uuid);
        self.balancer.on_slave_spawn(uuid);
        self.spawned += 1;

        let isolate = self.isolate.clone();
        let executable = self.manifest.executable.clone();
        let env = self.manifest.worker_env(uuid);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            match isolate.spawn(uuid, &executable, env).await {
                Ok(handle) => {
                    info!(%uuid, "worker process spawned");
                    let _ = self_tx.send(Command::WorkerProcessReady(uuid, handle));
                }
                Err(reason) => {
                    warn!(%uuid, %reason, "isolate failed to spawn worker");
                    let _ = self_tx.send(Command::WorkerSpawnFailed(uuid, reason));
                }
            }
        });
    }

    fn on_worker_process_ready(&mut self, uuid: Uuid, handle: Box<dyn crate::isolate::ProcessHandle>) {
        if let Some(slave) = self.pool.get_mut(&uuid) {
            slave.on_spawned(handle);
        }
    }

    async fn on_worker_spawn_failed(&mut self, uuid: Uuid, reason: String) {
        warn!(%uuid, %reason, "isolate refused to spawn worker");
        self.evict(uuid, SlaveError::ControlIpcError).await;
    }

    fn on_worker_handshake(&mut self, uuid: Uuid, control_tx: mpsc::UnboundedSender<WorkerMessage>) {
        if let Some(slave) = self.pool.get_mut(&uuid) {
            slave.on_handshake(control_tx);
        }
    }

    fn on_worker_heartbeat(&mut self, uuid: Uuid) {
        let Some(slave) = self.pool.get_mut(&uuid) else { return };
        if slave.state() == SlaveState::Handshaking {
            let _ = slave.activate();
            self.balancer.on_slave_spawn(uuid);
            self.purge();
        } else {
            slave.on_heartbeat();
        }
    }

    fn on_channel_closed(&mut self, uuid: Uuid, channel_id: u64) {
        self.pending_worker_channels.remove(&(uuid, channel_id));
        self.channel_client_tx.remove(&(uuid, channel_id));
        let Some(slave) = self.pool.get_mut(&uuid) else { return };
        let was_sealing = slave.state() == SlaveState::Sealing;
        slave.on_channel_close(channel_id);
        if was_sealing && slave.state() == SlaveState::Terminating {
            slave.terminate(0, "drained".to_string());
        }
        let idle_for = slave.idle_for();
        let active_count = self.pool.values().filter(|s| s.state() == SlaveState::Active).count();
        let action = self.balancer.on_channel_finished(
            uuid,
            idle_for,
            Duration::from_millis(self.profile.timeouts.idle_ms),
            active_count,
            self.queue.is_empty(),
        );
        match action {
            BalancerAction::Seal(target) => self.begin_seal(target),
            BalancerAction::Spawn => self.spawn(),
            BalancerAction::None => {}
        }
        self.purge();
    }

    async fn despawn(&mut self, uuid: Uuid, policy: DespawnPolicy) {
        match policy {
            DespawnPolicy::Graceful => self.begin_seal(uuid),
            DespawnPolicy::Force => self.evict(uuid, SlaveError::CommittedSuicide).await,
        }
    }

    fn begin_seal(&mut self, uuid: Uuid) {
        if let Some(slave) = self.pool.get_mut(&uuid) {
            let _ = slave.seal();
            if slave.state() == SlaveState::Terminating {
                slave.terminate(0, "sealed".to_string());
            }
        }
    }

    fn seal_all(&mut self) {
        let uuids: Vec<Uuid> = self.pool.keys().copied().collect();
        for uuid in uuids {
            self.begin_seal(uuid);
        }
    }

    /// Forces `uuid` into a terminal state, aborts its channels, kills
    /// the process, and drops it from the pool. Every channel still open
    /// on this slave gets a terminal `Error`/`Choke` pair on the client
    /// side — otherwise the client would just hang waiting on a stream
    /// whose worker half silently vanished.
    async fn evict(&mut self, uuid: Uuid, error: SlaveError) {
        let Some(mut slave) = self.pool.remove(&uuid) else { return };
        slave.break_with(error);
        slave.kill().await;
        self.crashed += 1;
        self.push_crashlog(uuid, slave.state(), error);
        self.balancer.on_slave_death(uuid);

        let code = error.as_error_code();
        let reason = error.to_string();
        self.channel_client_tx.retain(|(u, _), tx| {
            if *u == uuid {
                let _ = tx.send(StreamFrame::error(code, reason.clone()));
                let _ = tx.send(StreamFrame::Choke);
                false
            } else {
                true
            }
        });
        self.pending_worker_channels.retain(|(u, _), _| *u != uuid);
    }

    fn push_crashlog(&mut self, uuid: Uuid, state: SlaveState, error: SlaveError) {
        if self.crashlog.len() >= self.profile.crashlog_limit {
            self.crashlog.pop_front();
        }
        self.crashlog.push_back(CrashLogEntry {
            timestamp: Utc::now(),
            uuid,
            state_at_death: state.as_str().to_string(),
            error,
        });
    }

    /// Periodic sweep: evicts slaves whose timers expired, then checks
    /// whether the queue still warrants growth.
    async fn tick(&mut self) {
        let expired: Vec<(Uuid, SlaveError)> = self
            .pool
            .iter()
            .filter_map(|(uuid, slave)| slave.expired_timeout().map(|e| (*uuid, e)))
            .collect();
        for (uuid, error) in expired {
            warn!(%uuid, %error, "slave timed out");
            self.evict(uuid, error).await;
        }
        self.on_queue_changed();
        self.purge();
    }

    fn info(&self) -> AppInfo {
        let pool = self
            .pool
            .iter()
            .map(|(uuid, slave)| {
                (
                    *uuid,
                    SlaveInfo {
                        state: slave.state().as_str().to_string(),
                        load: slave.active_channels(),
                        birthstamp: slave.birthstamp,
                    },
                )
            })
            .collect();
        AppInfo {
            pool,
            queue_depth: self.queue.len(),
            spawned: self.spawned,
            crashed: self.crashed,
            crashlog: self.crashlog.iter().cloned().collect(),
        }
    }

    fn snapshot_pool(&self) -> Vec<SlaveSnapshot> {
        self.pool.values().map(SlaveSnapshot::of).collect()
    }

    fn pool_counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for slave in self.pool.values() {
            match slave.state() {
                SlaveState::Active => counts.active_count += 1,
                SlaveState::Spawning | SlaveState::Unauthenticated | SlaveState::Handshaking => {
                    counts.spawning_count += 1
                }
                _ => {}
            }
        }
        counts
    }
}

fn reject(client: &mut ClientUpstream, code: ErrorCode, reason: &str) {
    let _ = client.outgoing.send(StreamFrame::error(code, reason));
    let _ = client.outgoing.send(StreamFrame::Choke);
}
