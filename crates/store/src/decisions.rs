//! Decision and ballot repository.
//!
//! The quorum state machine lives in the engine; this module supplies the
//! transactional primitives it needs: guarded status transitions (so a
//! stale timer can never reopen a terminal decision) and atomic ballot
//! upserts that keep worker vote statistics in step.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction};

use qr_domain::model::{Decision, DecisionStatus, DecisionType, QuorumThreshold, Vote, VoteValue};
use qr_domain::{Error, Result};

use crate::{col_enum, map_sqlite, parse_ts, parse_ts_opt, ts, Store};

const DECISION_COLS: &str = "id, room_id, proposer_id, proposal, decision_type, threshold, \
                             min_voters, sealed, status, result, votes_close_at, effective_at, \
                             created_at";

fn row_to_decision(row: &Row) -> rusqlite::Result<Decision> {
    let decision_type: String = row.get("decision_type")?;
    let threshold: String = row.get("threshold")?;
    let status: String = row.get("status")?;
    let votes_close_at: String = row.get("votes_close_at")?;
    let created_at: String = row.get("created_at")?;
    Ok(Decision {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        proposer_id: row.get("proposer_id")?,
        proposal: row.get("proposal")?,
        decision_type: col_enum(DecisionType::parse, &decision_type, "decision type")?,
        threshold: col_enum(QuorumThreshold::parse, &threshold, "threshold")?,
        min_voters: row.get::<_, Option<i64>>("min_voters")?.map(|v| v as u32),
        sealed: row.get("sealed")?,
        status: col_enum(DecisionStatus::parse, &status, "decision status")?,
        result: row.get("result")?,
        votes_close_at: parse_ts(&votes_close_at),
        effective_at: parse_ts_opt(row.get("effective_at")?),
        created_at: parse_ts(&created_at),
    })
}

fn row_to_vote(row: &Row) -> rusqlite::Result<Vote> {
    let value: String = row.get("value")?;
    let created_at: String = row.get("created_at")?;
    Ok(Vote {
        id: row.get("id")?,
        decision_id: row.get("decision_id")?,
        worker_id: row.get("worker_id")?,
        value: col_enum(VoteValue::parse, &value, "vote value")?,
        reasoning: row.get("reasoning")?,
        created_at: parse_ts(&created_at),
    })
}

pub(crate) fn decision_in_tx(tx: &Transaction, id: i64) -> Result<Option<Decision>> {
    tx.query_row(
        &format!("SELECT {DECISION_COLS} FROM decisions WHERE id = ?1"),
        [id],
        row_to_decision,
    )
    .optional()
    .map_err(map_sqlite)
}

pub struct NewDecision {
    pub room_id: i64,
    pub proposer_id: Option<i64>,
    pub proposal: String,
    pub decision_type: DecisionType,
    pub threshold: QuorumThreshold,
    pub min_voters: Option<u32>,
    pub sealed: bool,
    pub votes_close_at: DateTime<Utc>,
}

impl Store {
    pub fn create_decision(&self, new: &NewDecision) -> Result<Decision> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO decisions (room_id, proposer_id, proposal, decision_type,
                                        threshold, min_voters, sealed, status,
                                        votes_close_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'voting', ?8, ?9)",
                rusqlite::params![
                    new.room_id,
                    new.proposer_id,
                    new.proposal,
                    new.decision_type.as_str(),
                    new.threshold.as_str(),
                    new.min_voters.map(|v| v as i64),
                    new.sealed,
                    ts(new.votes_close_at),
                    ts(Utc::now())
                ],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.decision(id)?
            .ok_or_else(|| Error::internal("decision vanished after create"))
    }

    pub fn decision(&self, id: i64) -> Result<Option<Decision>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {DECISION_COLS} FROM decisions WHERE id = ?1"),
                [id],
                row_to_decision,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn decisions_in_room(
        &self,
        room_id: i64,
        status: Option<DecisionStatus>,
    ) -> Result<Vec<Decision>> {
        self.read(|c| {
            let mut out = Vec::new();
            match status {
                Some(s) => {
                    let mut stmt = c
                        .prepare(&format!(
                            "SELECT {DECISION_COLS} FROM decisions
                             WHERE room_id = ?1 AND status = ?2 ORDER BY id"
                        ))
                        .map_err(map_sqlite)?;
                    let mapped = stmt
                        .query_map(rusqlite::params![room_id, s.as_str()], row_to_decision)
                        .map_err(map_sqlite)?;
                    for d in mapped {
                        out.push(d.map_err(map_sqlite)?);
                    }
                }
                None => {
                    let mut stmt = c
                        .prepare(&format!(
                            "SELECT {DECISION_COLS} FROM decisions WHERE room_id = ?1 ORDER BY id"
                        ))
                        .map_err(map_sqlite)?;
                    let mapped = stmt
                        .query_map([room_id], row_to_decision)
                        .map_err(map_sqlite)?;
                    for d in mapped {
                        out.push(d.map_err(map_sqlite)?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// Open decisions (voting or announced) whose deadline has passed;
    /// the timer poll re-reads these transactionally before acting.
    pub fn decisions_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Decision>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {DECISION_COLS} FROM decisions
                     WHERE (status = 'voting' AND votes_close_at <= ?1)
                        OR (status = 'announced' AND effective_at IS NOT NULL
                            AND effective_at <= ?1)
                     ORDER BY id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map([ts(now)], row_to_decision)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for d in mapped {
                out.push(d.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Open decisions the worker has not voted on, for the envelope.
    pub fn unvoted_decisions(&self, room_id: i64, worker_id: i64) -> Result<Vec<Decision>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {DECISION_COLS} FROM decisions d
                     WHERE d.room_id = ?1 AND d.status IN ('voting', 'announced')
                       AND NOT EXISTS (SELECT 1 FROM votes v
                                       WHERE v.decision_id = d.id AND v.worker_id = ?2)
                     ORDER BY d.id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map(rusqlite::params![room_id, worker_id], row_to_decision)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for d in mapped {
                out.push(d.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Insert or update a ballot, atomically with the worker's vote
    /// statistics. Rejected with `invalid_state` once the decision no
    /// longer accepts votes, and with `scope` for out-of-room workers.
    pub fn upsert_vote(
        &self,
        decision_id: i64,
        worker_id: i64,
        value: VoteValue,
        reasoning: Option<&str>,
    ) -> Result<Vote> {
        self.write(|tx| {
            let decision = decision_in_tx(tx, decision_id)?
                .ok_or_else(|| Error::not_found(format!("decision {decision_id}")))?;
            if !decision.status.accepts_votes() {
                return Err(Error::invalid_state(format!(
                    "decision {decision_id} is {} and no longer accepts votes",
                    decision.status
                )));
            }
            let worker_room: Option<i64> = tx
                .query_row(
                    "SELECT room_id FROM workers WHERE id = ?1",
                    [worker_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(map_sqlite)?
                .ok_or_else(|| Error::not_found(format!("worker {worker_id}")))?;
            if worker_room != Some(decision.room_id) {
                return Err(Error::Scope(format!(
                    "worker {worker_id} is not in room {}",
                    decision.room_id
                )));
            }

            let previous: Option<String> = tx
                .query_row(
                    "SELECT value FROM votes WHERE decision_id = ?1 AND worker_id = ?2",
                    rusqlite::params![decision_id, worker_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(map_sqlite)?;

            tx.execute(
                "INSERT INTO votes (decision_id, worker_id, value, reasoning, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(decision_id, worker_id)
                 DO UPDATE SET value = excluded.value, reasoning = excluded.reasoning",
                rusqlite::params![
                    decision_id,
                    worker_id,
                    value.as_str(),
                    reasoning,
                    ts(Utc::now())
                ],
            )
            .map_err(map_sqlite)?;

            // Vote statistics: a re-vote moves one tally, a first vote adds one.
            let col = |v: &str| match v {
                "yes" => "votes_yes",
                "no" => "votes_no",
                _ => "votes_abstain",
            };
            match previous {
                Some(old) if old != value.as_str() => {
                    tx.execute(
                        &format!(
                            "UPDATE workers SET {} = {} - 1, {} = {} + 1 WHERE id = ?1",
                            col(&old),
                            col(&old),
                            col(value.as_str()),
                            col(value.as_str())
                        ),
                        [worker_id],
                    )
                    .map_err(map_sqlite)?;
                }
                Some(_) => {}
                None => {
                    tx.execute(
                        &format!(
                            "UPDATE workers SET votes_cast = votes_cast + 1, {} = {} + 1
                             WHERE id = ?1",
                            col(value.as_str()),
                            col(value.as_str())
                        ),
                        [worker_id],
                    )
                    .map_err(map_sqlite)?;
                }
            }
            Ok(())
        })?;
        self.vote(decision_id, worker_id)?
            .ok_or_else(|| Error::internal("vote vanished after upsert"))
    }

    pub fn vote(&self, decision_id: i64, worker_id: i64) -> Result<Option<Vote>> {
        self.read(|c| {
            c.query_row(
                "SELECT id, decision_id, worker_id, value, reasoning, created_at
                 FROM votes WHERE decision_id = ?1 AND worker_id = ?2",
                rusqlite::params![decision_id, worker_id],
                row_to_vote,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn votes_for_decision(&self, decision_id: i64) -> Result<Vec<Vote>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, decision_id, worker_id, value, reasoning, created_at
                     FROM votes WHERE decision_id = ?1 ORDER BY id",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map([decision_id], row_to_vote).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for v in mapped {
                out.push(v.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Guarded transition: succeeds only while the row's current status is
    /// in `from`. Terminal rows answer `invalid_state`, missing rows
    /// `not_found`; there is no silent reopen.
    pub fn transition_decision(
        &self,
        id: i64,
        from: &[DecisionStatus],
        to: DecisionStatus,
        result: Option<&str>,
        effective_at: Option<DateTime<Utc>>,
    ) -> Result<Decision> {
        self.write(|tx| {
            let current = decision_in_tx(tx, id)?
                .ok_or_else(|| Error::not_found(format!("decision {id}")))?;
            if !from.contains(&current.status) {
                return Err(Error::invalid_state(format!(
                    "decision {id} is {}, expected one of {:?}",
                    current.status,
                    from.iter().map(|s| s.as_str()).collect::<Vec<_>>()
                )));
            }
            tx.execute(
                "UPDATE decisions
                 SET status = ?1,
                     result = COALESCE(?2, result),
                     effective_at = COALESCE(?3, effective_at)
                 WHERE id = ?4",
                rusqlite::params![to.as_str(), result, effective_at.map(ts), id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })?;
        self.decision(id)?
            .ok_or_else(|| Error::not_found(format!("decision {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded;
    use crate::workers::NewWorker;

    fn proposal(room_id: i64, proposer: Option<i64>) -> NewDecision {
        NewDecision {
            room_id,
            proposer_id: proposer,
            proposal: "buy server".into(),
            decision_type: DecisionType::Resource,
            threshold: QuorumThreshold::Majority,
            min_voters: None,
            sealed: false,
            votes_close_at: Utc::now() + chrono::Duration::minutes(60),
        }
    }

    fn add_worker(store: &Store, room_id: i64, name: &str) -> i64 {
        store
            .create_worker(&NewWorker {
                room_id: Some(room_id),
                name: name.into(),
                role: "worker".into(),
                system_prompt: String::new(),
                model: None,
                is_default: false,
                cycle_gap_ms: None,
                max_turns: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn vote_upsert_is_unique_per_worker() {
        let (store, room, queen) = seeded("R");
        let d = store.create_decision(&proposal(room.id, Some(queen.id))).unwrap();

        store.upsert_vote(d.id, queen.id, VoteValue::Yes, Some("ok")).unwrap();
        store.upsert_vote(d.id, queen.id, VoteValue::No, Some("changed")).unwrap();

        let votes = store.votes_for_decision(d.id).unwrap();
        assert_eq!(votes.len(), 1, "one ballot per (decision, worker)");
        assert_eq!(votes[0].value, VoteValue::No);
        assert_eq!(votes[0].reasoning.as_deref(), Some("changed"));
    }

    #[test]
    fn vote_stats_track_revotes() {
        let (store, room, queen) = seeded("R");
        let d = store.create_decision(&proposal(room.id, Some(queen.id))).unwrap();
        store.upsert_vote(d.id, queen.id, VoteValue::Yes, None).unwrap();
        store.upsert_vote(d.id, queen.id, VoteValue::No, None).unwrap();
        let w = store.worker(queen.id).unwrap().unwrap();
        assert_eq!(w.votes_cast, 1);
        assert_eq!(w.votes_yes, 0);
        assert_eq!(w.votes_no, 1);
    }

    #[test]
    fn vote_on_terminal_decision_fails() {
        let (store, room, queen) = seeded("R");
        let d = store.create_decision(&proposal(room.id, Some(queen.id))).unwrap();
        store
            .transition_decision(
                d.id,
                &[DecisionStatus::Voting],
                DecisionStatus::Approved,
                Some("approved 1-0"),
                None,
            )
            .unwrap();
        let err = store
            .upsert_vote(d.id, queen.id, VoteValue::Yes, None)
            .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidState);
    }

    #[test]
    fn cross_room_vote_is_scope_error() {
        let (store, room, _) = seeded("R");
        let other = store.create_room(&crate::testutil::new_room("Other")).unwrap();
        let stranger = add_worker(&store, other.0.id, "stranger");
        let d = store.create_decision(&proposal(room.id, None)).unwrap();
        let err = store.upsert_vote(d.id, stranger, VoteValue::Yes, None).unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::Scope);
    }

    #[test]
    fn terminal_transition_never_reopens() {
        let (store, room, _) = seeded("R");
        let d = store.create_decision(&proposal(room.id, None)).unwrap();
        store
            .transition_decision(d.id, &[DecisionStatus::Voting], DecisionStatus::Expired, None, None)
            .unwrap();
        let err = store
            .transition_decision(
                d.id,
                &[DecisionStatus::Voting],
                DecisionStatus::Approved,
                None,
                None,
            )
            .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidState);
        assert_eq!(
            store.decision(d.id).unwrap().unwrap().status,
            DecisionStatus::Expired
        );
    }

    #[test]
    fn unvoted_listing_excludes_after_vote() {
        let (store, room, queen) = seeded("R");
        let d = store.create_decision(&proposal(room.id, None)).unwrap();
        assert_eq!(store.unvoted_decisions(room.id, queen.id).unwrap().len(), 1);
        store.upsert_vote(d.id, queen.id, VoteValue::Abstain, None).unwrap();
        assert!(store.unvoted_decisions(room.id, queen.id).unwrap().is_empty());
    }

    #[test]
    fn past_deadline_listing() {
        let (store, room, _) = seeded("R");
        let mut p = proposal(room.id, None);
        p.votes_close_at = Utc::now() - chrono::Duration::minutes(1);
        let d = store.create_decision(&p).unwrap();
        let due = store.decisions_past_deadline(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, d.id);
    }

    #[test]
    fn deleting_worker_drops_ballots() {
        let (store, room, _) = seeded("R");
        let w = add_worker(&store, room.id, "voter");
        let d = store.create_decision(&proposal(room.id, None)).unwrap();
        store.upsert_vote(d.id, w, VoteValue::Yes, None).unwrap();
        store.delete_worker(w).unwrap();
        assert!(store.votes_for_decision(d.id).unwrap().is_empty());
    }
}
