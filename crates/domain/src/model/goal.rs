//! Goal tree nodes and their append-only update log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    InProgress,
    Completed,
    Abandoned,
}

text_enum!(GoalStatus {
    Active => "active",
    InProgress => "in_progress",
    Completed => "completed",
    Abandoned => "abandoned",
});

impl GoalStatus {
    /// Terminal goals accept no further decomposition or progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Goal {
    pub id: i64,
    pub room_id: i64,
    /// `None` for roots of the room's goal forest.
    pub parent_goal_id: Option<i64>,
    pub description: String,
    pub status: GoalStatus,
    /// In `[0, 1]`. Derived (mean of children) for interior nodes.
    pub progress: f64,
    pub worker_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Append-only progress observation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GoalUpdate {
    pub id: i64,
    pub goal_id: i64,
    pub observation: String,
    /// Raw metric as supplied; values > 1 are percent and normalize to /100.
    pub metric_value: Option<f64>,
    pub worker_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Normalize a supplied metric: values above 1 are read as percentages.
/// The result is clamped to `[0, 1]`.
pub fn normalize_metric(value: f64) -> f64 {
    let v = if value > 1.0 { value / 100.0 } else { value };
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_fraction_passthrough() {
        assert_eq!(normalize_metric(0.5), 0.5);
        assert_eq!(normalize_metric(1.0), 1.0);
        assert_eq!(normalize_metric(0.0), 0.0);
    }

    #[test]
    fn metric_percent_normalized() {
        assert_eq!(normalize_metric(50.0), 0.5);
        assert_eq!(normalize_metric(100.0), 1.0);
    }

    #[test]
    fn metric_clamped() {
        assert_eq!(normalize_metric(250.0), 1.0);
        assert_eq!(normalize_metric(-0.3), 0.0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(GoalStatus::Completed.is_terminal());
        assert!(GoalStatus::Abandoned.is_terminal());
        assert!(!GoalStatus::Active.is_terminal());
        assert!(!GoalStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_text_roundtrip() {
        assert_eq!(GoalStatus::parse("in_progress"), Some(GoalStatus::InProgress));
        assert_eq!(GoalStatus::InProgress.as_str(), "in_progress");
    }
}
