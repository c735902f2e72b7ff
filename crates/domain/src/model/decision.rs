//! Quorum decisions and ballots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumThreshold {
    /// Strictly more than half of the non-abstaining ballots.
    Majority,
    /// At least two thirds.
    Supermajority,
    /// Every eligible voter said yes, none said no.
    Unanimous,
}

text_enum!(QuorumThreshold {
    Majority => "majority",
    Supermajority => "supermajority",
    Unanimous => "unanimous",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Strategy,
    Resource,
    Personnel,
    RuleChange,
    LowImpact,
}

text_enum!(DecisionType {
    Strategy => "strategy",
    Resource => "resource",
    Personnel => "personnel",
    RuleChange => "rule_change",
    LowImpact => "low_impact",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Voting,
    Approved,
    Rejected,
    Vetoed,
    Expired,
    /// Resolved but held for an objection window before taking effect.
    Announced,
    /// An objection was raised during the announce window.
    Objected,
    Effective,
}

text_enum!(DecisionStatus {
    Voting => "voting",
    Approved => "approved",
    Rejected => "rejected",
    Vetoed => "vetoed",
    Expired => "expired",
    Announced => "announced",
    Objected => "objected",
    Effective => "effective",
});

impl DecisionStatus {
    /// Terminal statuses never reopen.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Vetoed | Self::Expired | Self::Effective
        )
    }

    /// Whether ballots are still accepted in this status.
    pub fn accepts_votes(self) -> bool {
        matches!(self, Self::Voting | Self::Announced)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub room_id: i64,
    /// `None` when the proposal came from outside the room (keeper, hook).
    pub proposer_id: Option<i64>,
    pub proposal: String,
    pub decision_type: DecisionType,
    pub threshold: QuorumThreshold,
    /// Participation floor; unmet floors leave the decision voting.
    pub min_voters: Option<u32>,
    /// Sealed decisions hide per-voter ballots while voting.
    pub sealed: bool,
    pub status: DecisionStatus,
    pub result: Option<String>,
    /// Voting deadline.
    pub votes_close_at: DateTime<Utc>,
    /// When an announced decision becomes effective.
    pub effective_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    Yes,
    No,
    Abstain,
}

text_enum!(VoteValue {
    Yes => "yes",
    No => "no",
    Abstain => "abstain",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub decision_id: i64,
    pub worker_id: i64,
    pub value: VoteValue,
    pub reasoning: Option<String>,
    pub created_at: DateTime<Utc>,
}
