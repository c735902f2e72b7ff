//! Goal forest with derived interior progress.
//!
//! Leaves take explicit progress; interior nodes derive theirs as the mean
//! of their non-abandoned children on every child update. All-completed
//! children complete the parent.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, Transaction};

use qr_domain::model::{normalize_metric, Goal, GoalStatus, GoalUpdate};
use qr_domain::{Error, Result};

use crate::{col_enum, map_sqlite, parse_ts, ts, Store};

const GOAL_COLS: &str =
    "id, room_id, parent_goal_id, description, status, progress, worker_id, created_at";

fn row_to_goal(row: &Row) -> rusqlite::Result<Goal> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    Ok(Goal {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        parent_goal_id: row.get("parent_goal_id")?,
        description: row.get("description")?,
        status: col_enum(GoalStatus::parse, &status, "goal status")?,
        progress: row.get("progress")?,
        worker_id: row.get("worker_id")?,
        created_at: parse_ts(&created_at),
    })
}

fn goal_in_tx(tx: &Transaction, id: i64) -> Result<Option<Goal>> {
    tx.query_row(
        &format!("SELECT {GOAL_COLS} FROM goals WHERE id = ?1"),
        [id],
        row_to_goal,
    )
    .optional()
    .map_err(map_sqlite)
}

/// Walk ancestors from `parent_id` upward, refreshing each interior node's
/// derived progress and completion.
fn rollup(tx: &Transaction, mut parent_id: Option<i64>) -> Result<()> {
    while let Some(id) = parent_id {
        let Some(goal) = goal_in_tx(tx, id)? else { break };

        let mut stmt = tx
            .prepare(
                "SELECT status, progress FROM goals
                 WHERE parent_goal_id = ?1 AND status != 'abandoned'",
            )
            .map_err(map_sqlite)?;
        let rows = stmt
            .query_map([id], |r| {
                let status: String = r.get(0)?;
                let progress: f64 = r.get(1)?;
                Ok((status, progress))
            })
            .map_err(map_sqlite)?;

        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut all_completed = true;
        for row in rows {
            let (status, progress) = row.map_err(map_sqlite)?;
            count += 1;
            sum += progress;
            if status != "completed" {
                all_completed = false;
            }
        }
        drop(stmt);

        if count > 0 {
            let mean = sum / count as f64;
            let status = if all_completed {
                GoalStatus::Completed
            } else if goal.status == GoalStatus::Active && mean > 0.0 {
                GoalStatus::InProgress
            } else {
                goal.status
            };
            tx.execute(
                "UPDATE goals SET progress = ?1, status = ?2 WHERE id = ?3",
                rusqlite::params![mean, status.as_str(), id],
            )
            .map_err(map_sqlite)?;
        }

        parent_id = goal.parent_goal_id;
    }
    Ok(())
}

impl Store {
    /// Create a root goal for the room's objective.
    pub fn set_objective_goal(&self, room_id: i64, description: &str) -> Result<Goal> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO goals (room_id, description, status, progress, created_at)
                 VALUES (?1, ?2, 'active', 0, ?3)",
                rusqlite::params![room_id, description, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.goal(id)?
            .ok_or_else(|| Error::internal("goal vanished after create"))
    }

    /// Create child goals under a parent in one transaction. Fails with
    /// `invalid_state` when the parent is completed or abandoned.
    pub fn decompose_goal(
        &self,
        parent_id: i64,
        descriptions: &[String],
        worker_id: Option<i64>,
    ) -> Result<Vec<Goal>> {
        if descriptions.is_empty() {
            return Err(Error::invalid_input("decompose needs at least one subgoal"));
        }
        let ids = self.write(|tx| {
            let parent = goal_in_tx(tx, parent_id)?
                .ok_or_else(|| Error::not_found(format!("goal {parent_id}")))?;
            if parent.status.is_terminal() {
                return Err(Error::invalid_state(format!(
                    "goal {parent_id} is {} and cannot be decomposed",
                    parent.status
                )));
            }
            let now = ts(Utc::now());
            let mut ids = Vec::with_capacity(descriptions.len());
            for d in descriptions {
                tx.execute(
                    "INSERT INTO goals (room_id, parent_goal_id, description, status,
                                        progress, worker_id, created_at)
                     VALUES (?1, ?2, ?3, 'active', 0, ?4, ?5)",
                    rusqlite::params![parent.room_id, parent_id, d, worker_id, now],
                )
                .map_err(map_sqlite)?;
                ids.push(tx.last_insert_rowid());
            }
            rollup(tx, Some(parent_id))?;
            Ok(ids)
        })?;
        ids.into_iter()
            .map(|id| {
                self.goal(id)?
                    .ok_or_else(|| Error::internal("subgoal vanished after create"))
            })
            .collect()
    }

    /// Record progress on a leaf. Metric values above 1 normalize from
    /// percent. Reaching 1.0 completes the leaf; ancestors re-derive.
    pub fn update_goal_progress(
        &self,
        goal_id: i64,
        metric_value: f64,
        observation: &str,
        worker_id: Option<i64>,
    ) -> Result<Goal> {
        let progress = normalize_metric(metric_value);
        self.write(|tx| {
            let goal = goal_in_tx(tx, goal_id)?
                .ok_or_else(|| Error::not_found(format!("goal {goal_id}")))?;
            if goal.status.is_terminal() {
                return Err(Error::invalid_state(format!(
                    "goal {goal_id} is {}",
                    goal.status
                )));
            }
            let has_children: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM goals
                     WHERE parent_goal_id = ?1 AND status != 'abandoned')",
                    [goal_id],
                    |r| r.get(0),
                )
                .map_err(map_sqlite)?;
            if has_children {
                return Err(Error::invalid_state(format!(
                    "goal {goal_id} derives progress from its children"
                )));
            }

            let status = if progress >= 1.0 {
                GoalStatus::Completed
            } else if progress > 0.0 {
                GoalStatus::InProgress
            } else {
                goal.status
            };
            tx.execute(
                "UPDATE goals SET progress = ?1, status = ?2 WHERE id = ?3",
                rusqlite::params![progress, status.as_str(), goal_id],
            )
            .map_err(map_sqlite)?;
            tx.execute(
                "INSERT INTO goal_updates (goal_id, observation, metric_value, worker_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![goal_id, observation, metric_value, worker_id, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            rollup(tx, goal.parent_goal_id)?;
            Ok(())
        })?;
        self.goal(goal_id)?
            .ok_or_else(|| Error::not_found(format!("goal {goal_id}")))
    }

    /// Complete a goal outright: progress snaps to 1.
    pub fn complete_goal(&self, goal_id: i64, worker_id: Option<i64>) -> Result<Goal> {
        self.finish_goal(goal_id, GoalStatus::Completed, worker_id)
    }

    /// Abandon a goal: progress is left as-is and the subtree stops
    /// counting toward ancestors.
    pub fn abandon_goal(&self, goal_id: i64, worker_id: Option<i64>) -> Result<Goal> {
        self.finish_goal(goal_id, GoalStatus::Abandoned, worker_id)
    }

    fn finish_goal(&self, goal_id: i64, status: GoalStatus, worker_id: Option<i64>) -> Result<Goal> {
        self.write(|tx| {
            let goal = goal_in_tx(tx, goal_id)?
                .ok_or_else(|| Error::not_found(format!("goal {goal_id}")))?;
            if goal.status.is_terminal() {
                return Err(Error::invalid_state(format!(
                    "goal {goal_id} is already {}",
                    goal.status
                )));
            }
            match status {
                GoalStatus::Completed => {
                    tx.execute(
                        "UPDATE goals SET status = 'completed', progress = 1.0 WHERE id = ?1",
                        [goal_id],
                    )
                    .map_err(map_sqlite)?;
                }
                GoalStatus::Abandoned => {
                    tx.execute("UPDATE goals SET status = 'abandoned' WHERE id = ?1", [goal_id])
                        .map_err(map_sqlite)?;
                }
                _ => return Err(Error::invalid_input("finish_goal takes a terminal status")),
            }
            tx.execute(
                "INSERT INTO goal_updates (goal_id, observation, worker_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    goal_id,
                    format!("goal {status}"),
                    worker_id,
                    ts(Utc::now())
                ],
            )
            .map_err(map_sqlite)?;
            rollup(tx, goal.parent_goal_id)?;
            Ok(())
        })?;
        self.goal(goal_id)?
            .ok_or_else(|| Error::not_found(format!("goal {goal_id}")))
    }

    pub fn goal(&self, id: i64) -> Result<Option<Goal>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {GOAL_COLS} FROM goals WHERE id = ?1"),
                [id],
                row_to_goal,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn goals_in_room(&self, room_id: i64) -> Result<Vec<Goal>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {GOAL_COLS} FROM goals WHERE room_id = ?1 ORDER BY id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map([room_id], row_to_goal).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for g in mapped {
                out.push(g.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Non-terminal goals, for the prompt envelope.
    pub fn active_goals(&self, room_id: i64) -> Result<Vec<Goal>> {
        Ok(self
            .goals_in_room(room_id)?
            .into_iter()
            .filter(|g| !g.status.is_terminal())
            .collect())
    }

    pub fn goal_updates(&self, goal_id: i64) -> Result<Vec<GoalUpdate>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, goal_id, observation, metric_value, worker_id, created_at
                     FROM goal_updates WHERE goal_id = ?1 ORDER BY id",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map([goal_id], |row| {
                    let created_at: String = row.get("created_at")?;
                    Ok(GoalUpdate {
                        id: row.get("id")?,
                        goal_id: row.get("goal_id")?,
                        observation: row.get("observation")?,
                        metric_value: row.get("metric_value")?,
                        worker_id: row.get("worker_id")?,
                        created_at: parse_ts(&created_at),
                    })
                })
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for u in mapped {
                out.push(u.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Delete a goal and its whole subtree, then re-derive the ancestors.
    pub fn delete_goal(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            let goal =
                goal_in_tx(tx, id)?.ok_or_else(|| Error::not_found(format!("goal {id}")))?;
            tx.execute("DELETE FROM goals WHERE id = ?1", [id])
                .map_err(map_sqlite)?;
            rollup(tx, goal.parent_goal_id)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded;

    #[test]
    fn decompose_and_rollup_halfway() {
        let (store, room, _) = seeded("R");
        let g0 = store.set_objective_goal(room.id, "ship v1").unwrap();
        assert_eq!(g0.progress, 0.0);

        let children = store
            .decompose_goal(g0.id, &["a".into(), "b".into()], None)
            .unwrap();
        assert_eq!(children.len(), 2);

        store
            .update_goal_progress(children[0].id, 100.0, "done", None)
            .unwrap();
        let g0 = store.goal(g0.id).unwrap().unwrap();
        assert!((g0.progress - 0.5).abs() < 1e-9);
        assert_eq!(g0.status, GoalStatus::InProgress);

        store
            .update_goal_progress(children[1].id, 1.0, "done", None)
            .unwrap();
        let g0 = store.goal(g0.id).unwrap().unwrap();
        assert_eq!(g0.status, GoalStatus::Completed);
        assert!((g0.progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn percent_metric_normalizes() {
        let (store, room, _) = seeded("R");
        let g = store.set_objective_goal(room.id, "leaf").unwrap();
        let g = store.update_goal_progress(g.id, 50.0, "halfway", None).unwrap();
        assert!((g.progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn decompose_terminal_goal_fails() {
        let (store, room, _) = seeded("R");
        let g = store.set_objective_goal(room.id, "done already").unwrap();
        store.complete_goal(g.id, None).unwrap();
        let err = store
            .decompose_goal(g.id, &["late".into()], None)
            .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidState);
    }

    #[test]
    fn interior_progress_is_derived_only() {
        let (store, room, _) = seeded("R");
        let g0 = store.set_objective_goal(room.id, "root").unwrap();
        store
            .decompose_goal(g0.id, &["a".into()], None)
            .unwrap();
        let err = store
            .update_goal_progress(g0.id, 0.9, "nope", None)
            .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidState);
    }

    #[test]
    fn abandoned_children_excluded_from_mean() {
        let (store, room, _) = seeded("R");
        let g0 = store.set_objective_goal(room.id, "root").unwrap();
        let kids = store
            .decompose_goal(g0.id, &["a".into(), "b".into(), "c".into()], None)
            .unwrap();
        store.abandon_goal(kids[2].id, None).unwrap();
        store.update_goal_progress(kids[0].id, 1.0, "done", None).unwrap();
        store.update_goal_progress(kids[1].id, 1.0, "done", None).unwrap();
        let g0 = store.goal(g0.id).unwrap().unwrap();
        assert_eq!(g0.status, GoalStatus::Completed, "abandoned child must not block");
        assert!((g0.progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rollup_walks_two_levels() {
        let (store, room, _) = seeded("R");
        let g0 = store.set_objective_goal(room.id, "root").unwrap();
        let mids = store
            .decompose_goal(g0.id, &["m1".into(), "m2".into()], None)
            .unwrap();
        let leaves = store
            .decompose_goal(mids[0].id, &["l1".into(), "l2".into()], None)
            .unwrap();
        store.update_goal_progress(leaves[0].id, 1.0, "done", None).unwrap();
        // m1 = 0.5, m2 = 0 → root = 0.25
        let g0 = store.goal(g0.id).unwrap().unwrap();
        assert!((g0.progress - 0.25).abs() < 1e-9);
    }

    #[test]
    fn delete_goal_cascades_and_rederives() {
        let (store, room, _) = seeded("R");
        let g0 = store.set_objective_goal(room.id, "root").unwrap();
        let kids = store
            .decompose_goal(g0.id, &["a".into(), "b".into()], None)
            .unwrap();
        let grand = store
            .decompose_goal(kids[0].id, &["aa".into()], None)
            .unwrap();
        store.update_goal_progress(kids[1].id, 1.0, "done", None).unwrap();
        store.delete_goal(kids[0].id).unwrap();
        assert!(store.goal(grand[0].id).unwrap().is_none(), "subtree deleted");
        let g0 = store.goal(g0.id).unwrap().unwrap();
        assert_eq!(g0.status, GoalStatus::Completed, "remaining child is complete");
    }

    #[test]
    fn completed_leaf_rejects_further_updates() {
        let (store, room, _) = seeded("R");
        let g = store.set_objective_goal(room.id, "leaf").unwrap();
        store.update_goal_progress(g.id, 1.0, "done", None).unwrap();
        let err = store.update_goal_progress(g.id, 0.5, "undo?", None).unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidState);
    }

    #[test]
    fn updates_are_logged() {
        let (store, room, _) = seeded("R");
        let g = store.set_objective_goal(room.id, "leaf").unwrap();
        store.update_goal_progress(g.id, 25.0, "first quarter", None).unwrap();
        let updates = store.goal_updates(g.id).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].observation, "first quarter");
        assert_eq!(updates[0].metric_value, Some(25.0));
    }
}
