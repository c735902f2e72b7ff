//! The quorum protocol: proposal, voting, tallying, timeout, veto.
//!
//! ```text
//! voting  ── vote(yes)+threshold → approved
//! voting  ── vote(no)+threshold  → rejected
//! voting  ── timeout             → expired
//! voting  ── veto                → vetoed
//! announced ── objection         → voting
//! announced ── 10-min timer      → effective
//! ```
//!
//! Every transition re-reads the decision row transactionally (the
//! store's guarded transition), so a stale timer can never reopen a
//! terminal decision.

use chrono::{Duration, Utc};

use qr_domain::model::{
    Decision, DecisionStatus, DecisionType, QuorumThreshold, TieBreak, VoteValue,
};
use qr_domain::{Error, Result};

use crate::events::EngineEvent;
use crate::state::EngineState;

/// Announce-to-effective hold.
pub const ANNOUNCE_WINDOW_MIN: i64 = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tally math
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TallyOutcome {
    /// Threshold met.
    Approve,
    /// Threshold can no longer be met (or was voted down).
    Reject,
    /// Keep voting.
    Pending,
    /// Final count ended in a tie.
    Tie,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Count {
    pub yes: u32,
    pub no: u32,
    pub abstain: u32,
    pub eligible: u32,
}

impl Count {
    fn voted(&self) -> u32 {
        self.yes + self.no + self.abstain
    }

    fn remaining(&self) -> u32 {
        self.eligible.saturating_sub(self.voted())
    }
}

/// Evaluate a count against a threshold. `final_round` is true when the
/// timeout has fired and no more ballots can arrive.
pub fn evaluate(threshold: QuorumThreshold, count: Count, final_round: bool) -> TallyOutcome {
    let remaining = if final_round { 0 } else { count.remaining() };

    match threshold {
        QuorumThreshold::Unanimous => {
            if count.no > 0 {
                TallyOutcome::Reject
            } else if count.abstain > 0 && remaining == 0 {
                // Someone abstained: unanimity is unreachable.
                TallyOutcome::Reject
            } else if count.yes == count.eligible {
                TallyOutcome::Approve
            } else {
                TallyOutcome::Pending
            }
        }
        QuorumThreshold::Majority | QuorumThreshold::Supermajority => {
            // Denominator: eligible voters who did not abstain.
            let denom = count.eligible.saturating_sub(count.abstain);
            if denom == 0 {
                return if final_round { TallyOutcome::Tie } else { TallyOutcome::Pending };
            }
            let approved = match threshold {
                QuorumThreshold::Majority => 2 * count.yes > denom,
                QuorumThreshold::Supermajority => 3 * count.yes >= 2 * denom,
                QuorumThreshold::Unanimous => unreachable!(),
            };
            if approved {
                return TallyOutcome::Approve;
            }
            // Could the yes side still get there with every remaining ballot?
            let best_yes = count.yes + remaining;
            let reachable = match threshold {
                QuorumThreshold::Majority => 2 * best_yes > denom,
                QuorumThreshold::Supermajority => 3 * best_yes >= 2 * denom,
                QuorumThreshold::Unanimous => unreachable!(),
            };
            if reachable && !final_round {
                TallyOutcome::Pending
            } else if final_round && count.yes == count.no {
                TallyOutcome::Tie
            } else {
                TallyOutcome::Reject
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Protocol operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
pub async fn propose(
    state: &EngineState,
    room_id: i64,
    proposer_id: Option<i64>,
    proposal: &str,
    decision_type: DecisionType,
    threshold: Option<QuorumThreshold>,
    min_voters: Option<u32>,
    sealed: bool,
) -> Result<Decision> {
    let room = state
        .store
        .room(room_id)?
        .ok_or_else(|| Error::not_found(format!("room {room_id}")))?;
    let threshold = threshold.unwrap_or(room.config.quorum_threshold);
    let votes_close_at =
        Utc::now() + Duration::minutes(i64::from(room.config.vote_timeout_minutes));

    let decision = state.store.create_decision(&qr_store::NewDecision {
        room_id,
        proposer_id,
        proposal: proposal.to_string(),
        decision_type,
        threshold,
        min_voters,
        sealed,
        votes_close_at,
    })?;

    state.store.record_activity(
        room_id,
        "decision",
        &format!("proposed: {proposal}"),
        proposer_id,
        Some(&serde_json::json!({ "decision_id": decision.id })),
    )?;

    // Low-impact proposals may resolve at propose time.
    if decision_type == DecisionType::LowImpact && room.config.auto_approve_low_impact {
        let approved = state.store.transition_decision(
            decision.id,
            &[DecisionStatus::Voting],
            DecisionStatus::Approved,
            Some("auto-approved (low impact)"),
            None,
        )?;
        publish(state, &approved);
        return Ok(approved);
    }

    publish(state, &decision);
    Ok(decision)
}

/// Record a ballot and re-tally.
pub async fn cast_vote(
    state: &EngineState,
    decision_id: i64,
    worker_id: i64,
    value: VoteValue,
    reasoning: Option<&str>,
) -> Result<Decision> {
    state.store.upsert_vote(decision_id, worker_id, value, reasoning)?;
    tally(state, decision_id, false)
}

/// Keeper veto: only open decisions can be vetoed.
pub fn veto(state: &EngineState, decision_id: i64) -> Result<Decision> {
    let decision = state.store.transition_decision(
        decision_id,
        &[DecisionStatus::Voting, DecisionStatus::Announced],
        DecisionStatus::Vetoed,
        Some("vetoed by keeper"),
        None,
    )?;
    publish(state, &decision);
    Ok(decision)
}

/// Objection during the announce window reopens voting.
pub fn object(state: &EngineState, decision_id: i64) -> Result<Decision> {
    let decision = state.store.transition_decision(
        decision_id,
        &[DecisionStatus::Announced],
        DecisionStatus::Voting,
        None,
        None,
    )?;
    publish(state, &decision);
    Ok(decision)
}

/// Count current ballots and apply the room's threshold rules.
/// `final_round` is set by the timeout path.
pub fn tally(state: &EngineState, decision_id: i64, final_round: bool) -> Result<Decision> {
    let decision = state
        .store
        .decision(decision_id)?
        .ok_or_else(|| Error::not_found(format!("decision {decision_id}")))?;
    if decision.status != DecisionStatus::Voting {
        return Ok(decision);
    }
    let room = state
        .store
        .room(decision.room_id)?
        .ok_or_else(|| Error::not_found(format!("room {}", decision.room_id)))?;
    let workers = state.store.workers_in_room(decision.room_id)?;
    let votes = state.store.votes_for_decision(decision_id)?;

    let mut count = Count {
        eligible: workers.len() as u32,
        ..Default::default()
    };
    let mut queen_vote = None;
    for vote in &votes {
        match vote.value {
            VoteValue::Yes => count.yes += 1,
            VoteValue::No => count.no += 1,
            VoteValue::Abstain => count.abstain += 1,
        }
        if Some(vote.worker_id) == room.queen_worker_id {
            queen_vote = Some(vote.value);
        }
    }

    // Participation floor: an unmet floor leaves the decision voting
    // until the timeout expires it.
    if let Some(floor) = decision.min_voters {
        if count.voted() < floor {
            if final_round {
                return expire(state, decision_id);
            }
            return Ok(decision);
        }
    }

    let mut outcome = evaluate(decision.threshold, count, final_round);

    // Tie-break: the queen's ballot counts double when configured.
    if outcome == TallyOutcome::Tie && room.config.tie_break == TieBreak::QueenTiebreak {
        let mut boosted = count;
        match queen_vote {
            Some(VoteValue::Yes) => boosted.yes += 1,
            Some(VoteValue::No) => boosted.no += 1,
            _ => {}
        }
        boosted.eligible += 1;
        if boosted.yes != boosted.no {
            outcome = evaluate(decision.threshold, boosted, true);
        }
    }

    let result_text = format!(
        "{} yes / {} no / {} abstain of {} eligible",
        count.yes, count.no, count.abstain, count.eligible
    );

    match outcome {
        TallyOutcome::Approve => {
            // Rule changes are announced and held before taking effect.
            let (to, effective_at) = if decision.decision_type == DecisionType::RuleChange {
                (
                    DecisionStatus::Announced,
                    Some(Utc::now() + Duration::minutes(ANNOUNCE_WINDOW_MIN)),
                )
            } else {
                (DecisionStatus::Approved, None)
            };
            let after = state.store.transition_decision(
                decision_id,
                &[DecisionStatus::Voting],
                to,
                Some(&format!("approved: {result_text}")),
                effective_at,
            )?;
            publish(state, &after);
            Ok(after)
        }
        TallyOutcome::Reject => {
            let after = state.store.transition_decision(
                decision_id,
                &[DecisionStatus::Voting],
                DecisionStatus::Rejected,
                Some(&format!("rejected: {result_text}")),
                None,
            )?;
            publish(state, &after);
            Ok(after)
        }
        TallyOutcome::Tie if final_round => expire(state, decision_id),
        TallyOutcome::Pending | TallyOutcome::Tie => Ok(decision),
    }
}

fn expire(state: &EngineState, decision_id: i64) -> Result<Decision> {
    let after = state.store.transition_decision(
        decision_id,
        &[DecisionStatus::Voting],
        DecisionStatus::Expired,
        Some("expired without quorum"),
        None,
    )?;
    publish(state, &after);
    Ok(after)
}

/// Timer sweep: expire voting decisions past their deadline (via a final
/// tally) and make announced decisions effective.
pub fn handle_deadlines(state: &EngineState) -> Result<()> {
    for decision in state.store.decisions_past_deadline(Utc::now())? {
        let result = match decision.status {
            DecisionStatus::Voting => tally(state, decision.id, true).map(|_| ()),
            DecisionStatus::Announced => state
                .store
                .transition_decision(
                    decision.id,
                    &[DecisionStatus::Announced],
                    DecisionStatus::Effective,
                    None,
                    None,
                )
                .map(|after| publish(state, &after)),
            _ => Ok(()),
        };
        if let Err(e) = result {
            // A stale timer losing the race to a fresher transition is fine.
            tracing::debug!(decision_id = decision.id, error = %e, "deadline sweep skipped");
        }
    }
    Ok(())
}

/// Read a decision's ballots. Sealed decisions hide per-voter ballots
/// until they leave `voting`; only the running count is visible.
pub fn ballots(state: &EngineState, decision_id: i64) -> Result<Vec<qr_domain::model::Vote>> {
    let decision = state
        .store
        .decision(decision_id)?
        .ok_or_else(|| Error::not_found(format!("decision {decision_id}")))?;
    if decision.sealed && decision.status == DecisionStatus::Voting {
        return Ok(Vec::new());
    }
    state.store.votes_for_decision(decision_id)
}

/// Worker removal changes eligibility; re-tally the room's open decisions.
pub fn retally_room(state: &EngineState, room_id: i64) -> Result<()> {
    for decision in state
        .store
        .decisions_in_room(room_id, Some(DecisionStatus::Voting))?
    {
        tally(state, decision.id, false)?;
    }
    Ok(())
}

fn publish(state: &EngineState, decision: &Decision) {
    state.events.publish(EngineEvent::DecisionChanged {
        room_id: decision.room_id,
        decision_id: decision.id,
        status: decision.status.as_str().to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(yes: u32, no: u32, abstain: u32, eligible: u32) -> Count {
        Count { yes, no, abstain, eligible }
    }

    #[test]
    fn majority_two_of_three() {
        // 3 eligible, 2 yes: resolved mid-vote.
        let outcome = evaluate(QuorumThreshold::Majority, count(2, 0, 0, 3), false);
        assert_eq!(outcome, TallyOutcome::Approve);
    }

    #[test]
    fn majority_single_yes_still_pending() {
        let outcome = evaluate(QuorumThreshold::Majority, count(1, 0, 0, 3), false);
        assert_eq!(outcome, TallyOutcome::Pending);
    }

    #[test]
    fn majority_rejects_when_unreachable() {
        // 2 no of 3: even a final yes gives 1 ≤ 1.5.
        let outcome = evaluate(QuorumThreshold::Majority, count(0, 2, 0, 3), false);
        assert_eq!(outcome, TallyOutcome::Reject);
    }

    #[test]
    fn majority_abstain_shrinks_denominator() {
        // 1 yes, 1 abstain of 2 eligible: denom 1, yes 1 → approve.
        let outcome = evaluate(QuorumThreshold::Majority, count(1, 0, 1, 2), false);
        assert_eq!(outcome, TallyOutcome::Approve);
    }

    #[test]
    fn final_round_tie() {
        let outcome = evaluate(QuorumThreshold::Majority, count(1, 1, 0, 2), true);
        assert_eq!(outcome, TallyOutcome::Tie);
        // Mid-vote the same count is pending only if votes remain.
        let outcome = evaluate(QuorumThreshold::Majority, count(1, 1, 0, 3), false);
        assert_eq!(outcome, TallyOutcome::Pending);
    }

    #[test]
    fn supermajority_thresholds() {
        assert_eq!(
            evaluate(QuorumThreshold::Supermajority, count(2, 1, 0, 3), false),
            TallyOutcome::Approve
        );
        assert_eq!(
            evaluate(QuorumThreshold::Supermajority, count(1, 1, 0, 3), false),
            TallyOutcome::Pending
        );
        assert_eq!(
            evaluate(QuorumThreshold::Supermajority, count(1, 2, 0, 3), false),
            TallyOutcome::Reject
        );
    }

    #[test]
    fn unanimous_requires_everyone() {
        assert_eq!(
            evaluate(QuorumThreshold::Unanimous, count(3, 0, 0, 3), false),
            TallyOutcome::Approve
        );
        assert_eq!(
            evaluate(QuorumThreshold::Unanimous, count(2, 0, 0, 3), false),
            TallyOutcome::Pending
        );
        assert_eq!(
            evaluate(QuorumThreshold::Unanimous, count(2, 1, 0, 3), false),
            TallyOutcome::Reject
        );
        // An abstention in the final round makes unanimity unreachable.
        assert_eq!(
            evaluate(QuorumThreshold::Unanimous, count(2, 0, 1, 3), true),
            TallyOutcome::Reject
        );
    }
}
