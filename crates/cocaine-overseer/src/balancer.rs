//! The load balancer policy: picks which slave serves a request and
//! decides when the pool should grow or shrink.

use std::time::Duration;
use uuid::Uuid;

use crate::slave::{Slave, SlaveState};

/// A read-only view of one pool slot, enough for a balancer to rank
/// candidates without touching the Overseer's slave map directly.
#[derive(Debug, Clone, Copy)]
pub struct SlaveSnapshot {
    pub uuid: Uuid,
    pub state: SlaveState,
    pub active_channels: usize,
    pub birthstamp_millis: i64,
}

impl SlaveSnapshot {
    pub fn of(slave: &Slave) -> Self {
        Self {
            uuid: slave.uuid,
            state: slave.state(),
            active_channels: slave.active_channels(),
            birthstamp_millis: slave.birthstamp.timestamp_millis(),
        }
    }
}

/// Aggregate pool counts a balancer needs for growth decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolCounts {
    pub active_count: usize,
    pub spawning_count: usize,
}

/// One decision returned from `on_queue`/`on_channel_finished`: either do
/// nothing, spawn a new slave, or seal an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerAction {
    None,
    Spawn,
    Seal(Uuid),
}

/// The balancer capability set. Implementations never touch I/O; they
/// read a pool snapshot and emit a single decision per call.
pub trait Balancer: Send {
    /// Picks the best-fit slave for a new request, if any has spare
    /// capacity. Returns `None` when the caller should enqueue instead.
    fn on_request(&self, pool: &[SlaveSnapshot], concurrency: usize) -> Option<Uuid>;

    /// Evaluates whether the pool should grow given current queue depth.
    fn on_queue(
        &self,
        queue_len: usize,
        counts: PoolCounts,
        profile_pool_limit: usize,
        grow_threshold: f64,
    ) -> BalancerAction;

    /// A new slave just joined the pool.
    fn on_slave_spawn(&self, _uuid: Uuid) {}

    /// A slave just left the pool (evicted after `Broken`).
    fn on_slave_death(&self, _uuid: Uuid) {}

    fn on_channel_started(&self, _uuid: Uuid, _channel_id: u64) {}

    /// A channel just finished. Returns `Seal(uuid)` if the now-idle
    /// slave should be sealed: idle for at least `idle_timeout`, more
    /// than one slave active, and the queue empty.
    fn on_channel_finished(
        &self,
        uuid: Uuid,
        idle_for: Option<Duration>,
        idle_timeout: Duration,
        active_count: usize,
        queue_is_empty: bool,
    ) -> BalancerAction {
        let _ = uuid;
        if active_count > 1 && queue_is_empty {
            if let Some(idle) = idle_for {
                if idle >= idle_timeout {
                    return BalancerAction::Seal(uuid);
                }
            }
        }
        BalancerAction::None
    }
}

/// Balancer used by tests that exercise the Overseer's bookkeeping
/// without caring about scheduling policy: every call returns "do
/// nothing" / "no candidate".
#[derive(Default)]
pub struct NullBalancer;

impl Balancer for NullBalancer {
    fn on_request(&self, _pool: &[SlaveSnapshot], _concurrency: usize) -> Option<Uuid> {
        None
    }

    fn on_queue(
        &self,
        _queue_len: usize,
        _counts: PoolCounts,
        _profile_pool_limit: usize,
        _grow_threshold: f64,
    ) -> BalancerAction {
        BalancerAction::None
    }
}

/// The production balancer: smallest-load, earliest-birthstamp
/// placement, and threshold-triggered growth.
#[derive(Default)]
pub struct LoadBalancer;

impl Balancer for LoadBalancer {
    fn on_request(&self, pool: &[SlaveSnapshot], concurrency: usize) -> Option<Uuid> {
        pool.iter()
            .filter(|s| s.state == SlaveState::Active && s.active_channels < concurrency)
            .min_by_key(|s| (s.active_channels, s.birthstamp_millis))
            .map(|s| s.uuid)
    }

    fn on_queue(
        &self,
        queue_len: usize,
        counts: PoolCounts,
        profile_pool_limit: usize,
        grow_threshold: f64,
    ) -> BalancerAction {
        // grow_threshold scales with active_count rather than adding a
        // flat slack, so the trigger stays proportional to pool size
        // instead of over-firing on small pools (see DESIGN.md).
        let threshold = grow_threshold * counts.active_count.max(1) as f64;
        let under_limit = counts.spawning_count + counts.active_count < profile_pool_limit;
        if (queue_len as f64) >= threshold && under_limit {
            BalancerAction::Spawn
        } else {
            BalancerAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cocaine_proto::SlaveError;

    fn snapshot(uuid: Uuid, state: SlaveState, active_channels: usize, birthstamp: i64) -> SlaveSnapshot {
        SlaveSnapshot {
            uuid,
            state,
            active_channels,
            birthstamp_millis: birthstamp,
        }
    }

    #[test]
    fn on_request_picks_least_loaded_active_slave() {
        let balancer = LoadBalancer;
        let busy = Uuid::new_v4();
        let idle = Uuid::new_v4();
        let pool = vec![
            snapshot(busy, SlaveState::Active, 5, 100),
            snapshot(idle, SlaveState::Active, 1, 200),
        ];
        assert_eq!(balancer.on_request(&pool, 10), Some(idle));
    }

    #[test]
    fn on_request_ignores_non_active_and_full_slaves() {
        let balancer = LoadBalancer;
        let broken = Uuid::new_v4();
        let full = Uuid::new_v4();
        let pool = vec![
            snapshot(broken, SlaveState::Broken(SlaveError::HeartbeatTimeout), 0, 1),
            snapshot(full, SlaveState::Active, 10, 2),
        ];
        assert_eq!(balancer.on_request(&pool, 10), None);
    }

    #[test]
    fn on_request_tie_breaks_on_birthstamp() {
        let balancer = LoadBalancer;
        let older = Uuid::new_v4();
        let younger = Uuid::new_v4();
        let pool = vec![
            snapshot(younger, SlaveState::Active, 2, 200),
            snapshot(older, SlaveState::Active, 2, 100),
        ];
        assert_eq!(balancer.on_request(&pool, 10), Some(older));
    }

    #[test]
    fn on_queue_spawns_once_threshold_crossed() {
        let balancer = LoadBalancer;
        let action = balancer.on_queue(
            2,
            PoolCounts {
                active_count: 1,
                spawning_count: 0,
            },
            4,
            2.0,
        );
        assert_eq!(action, BalancerAction::Spawn);
    }

    #[test]
    fn on_queue_never_exceeds_pool_limit() {
        let balancer = LoadBalancer;
        let action = balancer.on_queue(
            100,
            PoolCounts {
                active_count: 4,
                spawning_count: 0,
            },
            4,
            0.1,
        );
        assert_eq!(action, BalancerAction::None);
    }

    #[test]
    fn on_channel_finished_seals_idle_slave_when_alone_in_queue() {
        let balancer = LoadBalancer;
        let uuid = Uuid::new_v4();
        let action = balancer.on_channel_finished(
            uuid,
            Some(Duration::from_secs(200)),
            Duration::from_secs(120),
            2,
            true,
        );
        assert_eq!(action, BalancerAction::Seal(uuid));
    }

    #[test]
    fn on_channel_finished_keeps_last_slave_alive() {
        let balancer = LoadBalancer;
        let uuid = Uuid::new_v4();
        let action = balancer.on_channel_finished(
            uuid,
            Some(Duration::from_secs(200)),
            Duration::from_secs(120),
            1,
            true,
        );
        assert_eq!(action, BalancerAction::None);
    }
}
