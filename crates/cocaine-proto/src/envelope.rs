//! The `info()` response shape for a running app (App tag, slot 1).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::SlaveError;

/// One pool member as seen from `info()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaveInfo {
    pub state: String,
    pub load: usize,
    pub birthstamp: DateTime<Utc>,
}

/// One entry in the bounded crash-log ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashLogEntry {
    pub timestamp: DateTime<Utc>,
    pub uuid: Uuid,
    pub state_at_death: String,
    pub error: SlaveError,
}

/// The full snapshot returned by `App::info()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppInfo {
    pub pool: HashMap<Uuid, SlaveInfo>,
    pub queue_depth: usize,
    pub spawned: u64,
    pub crashed: u64,
    pub crashlog: Vec<CrashLogEntry>,
}

impl AppInfo {
    pub fn active_count(&self) -> usize {
        self.pool.len()
    }
}
