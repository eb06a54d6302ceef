use thiserror::Error;

use crate::utils::types::Address;

/// Failures surfaced by the node core. Transport failures are converted to
/// `status = "ERROR"` envelopes at the node that observed them.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request to {addr} timed out after {millis} ms")]
    Timeout { addr: Address, millis: u64 },

    #[error("invalid frame: {0}")]
    Frame(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("peer {addr} replied {status}: {message}")]
    Peer {
        addr: Address,
        status: String,
        message: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),
}
