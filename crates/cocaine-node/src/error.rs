//! Errors the node service façade returns synchronously, before any
//! stream is opened.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("app {name} is already running")]
    AlreadyRunning { name: String },

    #[error("no app named {name}")]
    UnknownApp { name: String },

    #[error("manifest invalid: {reason}")]
    InvalidManifest { reason: String },
}
