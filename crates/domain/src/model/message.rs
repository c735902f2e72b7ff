//! Keeper and inter-worker mail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    /// Sender label: a worker name, "keeper", or "webhook".
    pub sender: String,
    /// `None` addresses the keeper.
    pub recipient_worker_id: Option<i64>,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
