//! Worker — an agent configuration plus the live state of its loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Thinking,
    Acting,
    Waiting,
}

text_enum!(AgentState {
    Idle => "idle",
    Thinking => "thinking",
    Acting => "acting",
    Waiting => "waiting",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    /// `None` for global workers not bound to any room.
    pub room_id: Option<i64>,
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    /// Model override; `None` uses the executor default.
    pub model: Option<String>,
    pub is_default: bool,
    pub agent_state: AgentState,
    /// Per-worker overrides of the room defaults.
    pub cycle_gap_ms: Option<u64>,
    pub max_turns: Option<u32>,
    // Vote statistics, maintained at ballot time.
    pub votes_cast: u32,
    pub votes_yes: u32,
    pub votes_no: u32,
    pub votes_abstain: u32,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// The effective cycle gap, clamped to the 1 s floor.
    pub fn effective_cycle_gap_ms(&self, room_default_ms: u64) -> u64 {
        self.cycle_gap_ms.unwrap_or(room_default_ms).max(1_000)
    }

    pub fn effective_max_turns(&self, room_default: u32) -> u32 {
        self.max_turns.unwrap_or(room_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(cycle_gap_ms: Option<u64>, max_turns: Option<u32>) -> Worker {
        Worker {
            id: 1,
            room_id: Some(1),
            name: "w".into(),
            role: "worker".into(),
            system_prompt: String::new(),
            model: None,
            is_default: false,
            agent_state: AgentState::Idle,
            cycle_gap_ms,
            max_turns,
            votes_cast: 0,
            votes_yes: 0,
            votes_no: 0,
            votes_abstain: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cycle_gap_prefers_override() {
        assert_eq!(worker(Some(5_000), None).effective_cycle_gap_ms(30_000), 5_000);
        assert_eq!(worker(None, None).effective_cycle_gap_ms(30_000), 30_000);
    }

    #[test]
    fn cycle_gap_clamped_to_floor() {
        assert_eq!(worker(Some(10), None).effective_cycle_gap_ms(30_000), 1_000);
        assert_eq!(worker(None, None).effective_cycle_gap_ms(100), 1_000);
    }

    #[test]
    fn max_turns_override() {
        assert_eq!(worker(None, Some(5)).effective_max_turns(25), 5);
        assert_eq!(worker(None, None).effective_max_turns(25), 25);
    }

    #[test]
    fn agent_state_text_roundtrip() {
        for s in [
            AgentState::Idle,
            AgentState::Thinking,
            AgentState::Acting,
            AgentState::Waiting,
        ] {
            assert_eq!(AgentState::parse(s.as_str()), Some(s));
        }
    }
}
