//! Append-only per-room activity trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: i64,
    pub room_id: i64,
    /// Free-form event tag, e.g. "system", "cycle", "skipped", "decision".
    pub event_type: String,
    pub summary: String,
    pub worker_id: Option<i64>,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
