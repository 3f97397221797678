//! cocaine-overseer — the per-app supervisor described in the node
//! service's component design: a `Channel` half-close tracker, the two
//! stream bridges, the `Slave` state machine, a bounded `Queue`, a
//! `Balancer` policy, the handshaker rendezvous, and the `Overseer`
//! strand that ties them together.
//!
//! Wire framing and the socket acceptor are out of scope here; this
//! crate hands back `WorkerChannelIo`/`ClientUpstream` pairs for
//! whatever RPC layer owns the actual sockets to drive.

pub mod balancer;
pub mod bridge;
pub mod channel;
pub mod handshake;
pub mod isolate;
pub mod manifest;
pub mod overseer;
pub mod queue;
pub mod slave;

pub use balancer::{Balancer, BalancerAction, LoadBalancer, NullBalancer, PoolCounts, SlaveSnapshot};
pub use bridge::{run_client_to_worker, run_worker_to_client, ClientHandle, ClientUpstream, WorkerChannelIo};
pub use channel::Channel;
pub use handshake::{HandshakeError, HandshakeRegistry};
pub use isolate::{Isolate, ProcessHandle};
pub use manifest::Manifest;
pub use overseer::{DespawnPolicy, Overseer, OverseerHandle};
pub use queue::{Load, Queue, QueueError};
pub use slave::{Slave, SlaveOpError, SlaveState};
