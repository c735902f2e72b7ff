//! Persisted entity model.
//!
//! Every entity carries a store-assigned integer id and a creation
//! timestamp. Status enums spell their database/wire form in
//! `snake_case`; the `as_str`/`parse` pairs are what the store uses for
//! TEXT columns.

mod activity;
mod decision;
mod goal;
mod memory;
mod message;
mod room;
mod task;
mod wallet;
mod watch;
mod worker;

pub use activity::ActivityEvent;
pub use decision::{Decision, DecisionStatus, DecisionType, QuorumThreshold, Vote, VoteValue};
pub use goal::{normalize_metric, Goal, GoalStatus, GoalUpdate};
pub use memory::{Entity, EntityType, Observation, Relation};
pub use message::Message;
pub use room::{AutonomyMode, Room, RoomConfig, RoomStatus, TieBreak, Visibility};
pub use task::{ConsoleEntry, ConsoleLog, RunStatus, Task, TaskRun, TaskStatus, TriggerType};
pub use wallet::{TxStatus, TxType, Wallet, WalletTransaction};
pub use watch::{Watch, WatchStatus};
pub use worker::{AgentState, Worker};

/// Declare `as_str` / `parse` for a snake_case status enum.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;
