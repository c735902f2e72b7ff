//! Room — a persistent collective of agents sharing one objective, one
//! wallet, one quorum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::quiet::QuietHours;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Active,
    Paused,
    Stopped,
}

text_enum!(RoomStatus {
    Active => "active",
    Paused => "paused",
    Stopped => "stopped",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

text_enum!(Visibility {
    Private => "private",
    Public => "public",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyMode {
    /// Loops run continuously on their own cadence.
    Auto,
    /// Loops only run when nudged by the keeper or a webhook.
    Semi,
}

text_enum!(AutonomyMode {
    Auto => "auto",
    Semi => "semi",
});

/// What happens when a quorum count ends in a tie.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The Queen's ballot counts double.
    QueenTiebreak,
    /// The decision expires at its timeout.
    Expire,
}

impl Default for TieBreak {
    fn default() -> Self {
        Self::Expire
    }
}

fn default_vote_timeout_minutes() -> u32 {
    60
}

fn default_cycle_gap_ms() -> u64 {
    30_000
}

fn default_max_turns() -> u32 {
    25
}

fn default_max_concurrent_tasks() -> u32 {
    3
}

/// Per-room tunables, persisted as one JSON column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomConfig {
    #[serde(default = "RoomConfig::default_threshold")]
    pub quorum_threshold: super::QuorumThreshold,
    #[serde(default = "default_vote_timeout_minutes")]
    pub vote_timeout_minutes: u32,
    #[serde(default = "default_cycle_gap_ms")]
    pub cycle_gap_ms: u64,
    #[serde(default = "default_max_turns")]
    pub max_turns_per_cycle: u32,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
    /// Wall-clock window during which loops skip cycles.
    #[serde(default)]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default = "RoomConfig::default_autonomy")]
    pub autonomy: AutonomyMode,
    /// Low-impact proposals may resolve at propose time.
    #[serde(default)]
    pub auto_approve_low_impact: bool,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl RoomConfig {
    fn default_threshold() -> super::QuorumThreshold {
        super::QuorumThreshold::Majority
    }

    fn default_autonomy() -> AutonomyMode {
        AutonomyMode::Auto
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            quorum_threshold: Self::default_threshold(),
            vote_timeout_minutes: default_vote_timeout_minutes(),
            cycle_gap_ms: default_cycle_gap_ms(),
            max_turns_per_cycle: default_max_turns(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            quiet_hours: None,
            autonomy: Self::default_autonomy(),
            auto_approve_low_impact: false,
            tie_break: TieBreak::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    pub name: String,
    pub objective: String,
    pub status: RoomStatus,
    pub visibility: Visibility,
    /// Set in the same transaction that creates the implicit Queen worker.
    pub queen_worker_id: Option<i64>,
    pub config: RoomConfig,
    /// 16-byte opaque secret, hex-encoded.
    pub webhook_token: String,
    pub referrer_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        for s in [RoomStatus::Active, RoomStatus::Paused, RoomStatus::Stopped] {
            assert_eq!(RoomStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RoomStatus::parse("deleted"), None);
    }

    #[test]
    fn config_defaults() {
        let c = RoomConfig::default();
        assert_eq!(c.vote_timeout_minutes, 60);
        assert_eq!(c.cycle_gap_ms, 30_000);
        assert_eq!(c.max_turns_per_cycle, 25);
        assert_eq!(c.max_concurrent_tasks, 3);
        assert!(c.quiet_hours.is_none());
        assert_eq!(c.autonomy, AutonomyMode::Auto);
        assert!(!c.auto_approve_low_impact);
        assert_eq!(c.tie_break, TieBreak::Expire);
    }

    #[test]
    fn config_deserializes_from_empty_object() {
        let c: RoomConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c.max_concurrent_tasks, 3);
        assert_eq!(c.quorum_threshold, super::super::QuorumThreshold::Majority);
    }

    #[test]
    fn config_json_roundtrip_with_quiet_hours() {
        let mut c = RoomConfig::default();
        c.quiet_hours = Some(QuietHours::parse("22:00", "06:00").unwrap());
        c.tie_break = TieBreak::QueenTiebreak;
        let json = serde_json::to_string(&c).unwrap();
        let back: RoomConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.quiet_hours, c.quiet_hours);
        assert_eq!(back.tie_break, TieBreak::QueenTiebreak);
    }
}
