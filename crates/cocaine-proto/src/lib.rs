//! cocaine-proto — message types for the node service RPC surface.
//!
//! This crate defines the logical shape of the three protocol tags
//! described by the node service (service, app, worker) and the
//! error taxonomy shared across them. It does not implement a wire
//! codec: framing, header compression, and socket I/O live in the
//! RPC layer these types are plugged into.

pub mod envelope;
pub mod frame;

pub use envelope::{AppInfo, CrashLogEntry, SlaveInfo};
pub use frame::{
    AppSlot, ErrorCode, Event, Frame, Headers, ServiceReply, ServiceRequest, ServiceSlot,
    SlaveError, StreamFrame, WorkerMessage, WorkerSlot,
};
