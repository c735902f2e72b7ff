//! Filesystem watches that dispatch task runs on change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Active,
    Paused,
}

text_enum!(WatchStatus {
    Active => "active",
    Paused => "paused",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Watch {
    pub id: i64,
    pub room_id: i64,
    /// Validated at creation: home-rooted, sensitive roots denied.
    pub path: String,
    pub action_prompt: String,
    pub description: Option<String>,
    pub status: WatchStatus,
    pub trigger_count: u32,
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        assert_eq!(WatchStatus::parse("active"), Some(WatchStatus::Active));
        assert_eq!(WatchStatus::parse("paused"), Some(WatchStatus::Paused));
        assert_eq!(WatchStatus::parse("stopped"), None);
    }
}
