//! Tasks, their runs, and per-run console logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    Once,
    Manual,
    Webhook,
}

text_enum!(TriggerType {
    Cron => "cron",
    Once => "once",
    Manual => "manual",
    Webhook => "webhook",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

text_enum!(TaskStatus {
    Active => "active",
    Paused => "paused",
    Completed => "completed",
});

fn default_timeout_minutes() -> u32 {
    30
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub room_id: Option<i64>,
    /// Detached (set null) when the worker is deleted.
    pub worker_id: Option<i64>,
    pub name: String,
    /// Self-contained; the runner prepends the learned-context memo.
    pub prompt: String,
    pub trigger: TriggerType,
    pub cron_expression: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Free-text executor tag (propagated from `QUOROOM_SOURCE` and config).
    pub executor: Option<String>,
    pub status: TaskStatus,
    pub run_count: u32,
    pub error_count: u32,
    /// Successful-run cap; reaching it completes the task.
    pub max_runs: Option<u32>,
    pub session_continuity: bool,
    /// Executor session carried across runs when continuity is on.
    pub session_id: Option<String>,
    pub learned_context: Option<String>,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u32,
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    pub webhook_token: Option<String>,
    /// Minute key of the last cron firing, for same-window dedupe.
    pub last_run: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

text_enum!(RunStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    TimedOut => "timed_out",
    Cancelled => "cancelled",
});

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub task_id: i64,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    /// Artifact path under the results dir for oversized outputs.
    pub result_file: Option<String>,
    pub progress: Option<f64>,
    pub progress_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleEntry {
    Stdout,
    Stderr,
    ToolCall,
    ToolResult,
    Assistant,
    System,
}

text_enum!(ConsoleEntry {
    Stdout => "stdout",
    Stderr => "stderr",
    ToolCall => "tool_call",
    ToolResult => "tool_result",
    Assistant => "assistant",
    System => "system",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsoleLog {
    pub id: i64,
    pub run_id: i64,
    /// Monotonic within a run.
    pub seq: i64,
    pub entry: ConsoleEntry,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_terminal_set() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::TimedOut.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn trigger_text_roundtrip() {
        for t in [
            TriggerType::Cron,
            TriggerType::Once,
            TriggerType::Manual,
            TriggerType::Webhook,
        ] {
            assert_eq!(TriggerType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn console_entry_text_roundtrip() {
        assert_eq!(ConsoleEntry::parse("tool_call"), Some(ConsoleEntry::ToolCall));
        assert_eq!(ConsoleEntry::ToolResult.as_str(), "tool_result");
    }

    #[test]
    fn run_status_text_roundtrip() {
        assert_eq!(RunStatus::parse("timed_out"), Some(RunStatus::TimedOut));
        assert_eq!(RunStatus::TimedOut.as_str(), "timed_out");
    }

    #[test]
    fn task_timeout_default_applies_on_deserialize() {
        let json = serde_json::json!({
            "id": 1,
            "room_id": null,
            "worker_id": null,
            "name": "t",
            "prompt": "p",
            "trigger": "manual",
            "cron_expression": null,
            "scheduled_at": null,
            "executor": null,
            "status": "active",
            "run_count": 0,
            "error_count": 0,
            "max_runs": null,
            "session_continuity": false,
            "session_id": null,
            "learned_context": null,
            "max_turns": null,
            "webhook_token": null,
            "last_run": null,
            "created_at": "2024-01-01T00:00:00Z"
        });
        let t: Task = serde_json::from_value(json).unwrap();
        assert_eq!(t.timeout_minutes, 30);
        assert!(t.allowed_tools.is_empty());
    }
}
