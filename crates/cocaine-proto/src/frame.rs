//! Service/App/Worker message types for the node service RPC surface.
//!
//! The wire framing itself (length-prefixing, header compression, the
//! actual bytes that cross a TCP or Unix-domain socket) is owned by the
//! RPC layer this crate's types are plugged into. This module only
//! defines the logical shape of a frame — `{ channel_id, slot, headers,
//! args }` — and the typed messages that ride on each of the three
//! protocol tags described in the node service surface: service, app,
//! worker.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single trace/auth header carried alongside a frame's arguments.
pub type Headers = HashMap<String, String>;

/// One logical frame on the wire: a channel id, a slot number selecting
/// the operation, headers, and the argument tuple (opaque here — callers
/// deserialize `args` into the slot's expected type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<T> {
    pub channel_id: u64,
    pub slot: u32,
    #[serde(default)]
    pub headers: Headers,
    pub args: T,
}

impl<T> Frame<T> {
    pub fn new(channel_id: u64, slot: u32, args: T) -> Self {
        Self {
            channel_id,
            slot,
            headers: Headers::new(),
            args,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Service-tag slots: the node-creation endpoint.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSlot {
    StartApp = 0,
    PauseApp = 1,
    List = 2,
}

/// App-tag slots: per-running-app operations.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppSlot {
    Enqueue = 0,
    Info = 1,
}

/// Worker-tag slots: runtime <-> worker control protocol over the
/// Unix-domain socket.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSlot {
    Handshake = 0,
    Heartbeat = 1,
    Terminate = 2,
    Invoke = 3,
}

/// A frame sent or received on a bidirectional enqueue/invoke stream.
///
/// Both the client's upstream (into the worker) and the worker's
/// downstream (back to the client) carry exactly this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFrame {
    /// A chunk of raw application bytes.
    Chunk {
        #[serde(with = "bytes_as_vec")]
        data: Bytes,
    },
    /// A terminal error: the stream produced no further chunks.
    Error { code: ErrorCode, reason: String },
    /// A terminal, successful close: no error, no further chunks.
    Choke,
}

impl StreamFrame {
    pub fn chunk(data: impl Into<Bytes>) -> Self {
        StreamFrame::Chunk { data: data.into() }
    }

    pub fn error(code: ErrorCode, reason: impl Into<String>) -> Self {
        StreamFrame::Error {
            code,
            reason: reason.into(),
        }
    }

    /// True for `Error` and `Choke` — the two ways a stream may end.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Error { .. } | StreamFrame::Choke)
    }
}

mod bytes_as_vec {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bytes.as_ref().to_vec().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Vec::<u8>::deserialize(deserializer)?;
        Ok(Bytes::from(v))
    }
}

/// Error codes carried on the wire. §7 groups them by kind; the numeric
/// values are the ones clients see in `error(code, reason)` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// 400 — malformed or rejected request.
    Request = 400,
    /// 500 — internal runtime error.
    Server = 500,
    /// 502 — the app/worker itself raised an error.
    App = 502,
    /// 503 — no capacity (pool full, queue full).
    Resource = 503,
    /// 504 — a timeout of some kind expired.
    Timeout = 504,
    /// 520 — the request's deadline had already passed.
    Deadline = 520,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Slave-specific failure reasons. These never cross the wire to
/// clients; they are recorded in the crash log only (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaveError {
    SpawnTimeout,
    ActivateTimeout,
    HeartbeatTimeout,
    TerminateTimeout,
    InvalidState,
    ControlIpcError,
    CommittedSuicide,
}

impl fmt::Display for SlaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlaveError::SpawnTimeout => "spawn_timeout",
            SlaveError::ActivateTimeout => "activate_timeout",
            SlaveError::HeartbeatTimeout => "heartbeat_timeout",
            SlaveError::TerminateTimeout => "terminate_timeout",
            SlaveError::InvalidState => "invalid_state",
            SlaveError::ControlIpcError => "control_ipc_error",
            SlaveError::CommittedSuicide => "committed_suicide",
        };
        write!(f, "{s}")
    }
}

impl SlaveError {
    /// The wire-facing code a client's still-open channel should see
    /// when the slave serving it is evicted for this reason.
    pub fn as_error_code(self) -> ErrorCode {
        match self {
            SlaveError::SpawnTimeout | SlaveError::ActivateTimeout | SlaveError::HeartbeatTimeout => {
                ErrorCode::Timeout
            }
            SlaveError::TerminateTimeout | SlaveError::InvalidState | SlaveError::ControlIpcError => {
                ErrorCode::Server
            }
            SlaveError::CommittedSuicide => ErrorCode::App,
        }
    }
}

/// An immutable request event, as delivered by `enqueue(event)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub name: String,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub trace_headers: Headers,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deadline: None,
            urgent: false,
            trace_headers: Headers::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// True once `deadline` has already passed relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

/// Worker tag payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker's first frame after connecting: binds its UUID.
    Handshake { uuid: Uuid },
    /// Periodic liveness probe, either direction.
    Heartbeat,
    /// Runtime -> worker: please exit.
    Terminate { code: u32, reason: String },
    /// Runtime -> worker: open an invoke stream for `event`.
    Invoke { event: String },
}

/// Service tag payloads (`start_app`/`pause_app`/`list`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceRequest {
    StartApp {
        name: String,
        profile: Option<serde_json::Value>,
    },
    PauseApp {
        name: String,
    },
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceReply {
    Ok,
    Apps { names: Vec<String> },
    Error { code: ErrorCode, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_wire_value() {
        assert_eq!(ErrorCode::Request.as_u32(), 400);
        assert_eq!(ErrorCode::Deadline.as_u32(), 520);
    }

    #[test]
    fn stream_frame_terminal() {
        assert!(!StreamFrame::chunk(Bytes::from_static(b"hi")).is_terminal());
        assert!(StreamFrame::Choke.is_terminal());
        assert!(StreamFrame::error(ErrorCode::App, "boom").is_terminal());
    }

    #[test]
    fn stream_frame_json_roundtrip() {
        let frame = StreamFrame::chunk(Bytes::from_static(b"hello"));
        let json = serde_json::to_string(&frame).unwrap();
        let back: StreamFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn event_deadline_expiry() {
        let now = Utc::now();
        let past = now - chrono::Duration::milliseconds(50);
        let event = Event::new("echo").with_deadline(past);
        assert!(event.is_expired(now));

        let future_event = Event::new("echo").with_deadline(now + chrono::Duration::seconds(5));
        assert!(!future_event.is_expired(now));
    }

    #[test]
    fn frame_envelope_roundtrip() {
        let frame = Frame::new(7, AppSlot::Enqueue as u32, Event::new("echo"));
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame<Event> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channel_id, 7);
        assert_eq!(back.args.name, "echo");
    }

    #[test]
    fn worker_handshake_roundtrip() {
        let uuid = Uuid::new_v4();
        let msg = WorkerMessage::Handshake { uuid };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WorkerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
