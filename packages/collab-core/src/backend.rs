//! Boundary between a client session and the authoritative change service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::log_entry::ChangeLogEntry;

/// Acknowledgement of a replay request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayAck {
    pub channel: String,
    /// Number of entries that will be streamed to `channel`
    pub entries: usize,
}

/// Operations a client session can invoke on the authoritative side.
///
/// Implementations are bound to one authenticated user; the session token
/// identifies the submitting connection for echo suppression.
#[async_trait]
pub trait ChangeBackend: Send + Sync {
    /// Submits a serialized change through the apply pipeline.
    async fn submit_change(&self, change: serde_json::Value, user_token: &str) -> Result<ChangeLogEntry>;

    /// Current time on the authoritative side.
    async fn server_time(&self) -> Result<DateTime<Utc>>;

    /// Streams every entry with `createdAt >= since` to `channel`, oldest first.
    async fn request_replay(&self, since: DateTime<Utc>, channel: &str) -> Result<ReplayAck>;
}
