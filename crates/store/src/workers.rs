//! Worker repository. Deleting a worker detaches its tasks (FK SET NULL)
//! rather than cascading.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use qr_domain::model::{AgentState, Worker};
use qr_domain::{Error, Result};

use crate::{col_enum, map_sqlite, parse_ts, ts, Store};

pub struct NewWorker {
    pub room_id: Option<i64>,
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    pub model: Option<String>,
    pub is_default: bool,
    pub cycle_gap_ms: Option<u64>,
    pub max_turns: Option<u32>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Default)]
pub struct WorkerPatch {
    pub name: Option<String>,
    pub role: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<Option<String>>,
    pub cycle_gap_ms: Option<Option<u64>>,
    pub max_turns: Option<Option<u32>>,
}

const WORKER_COLS: &str = "id, room_id, name, role, system_prompt, model, is_default, \
                           agent_state, cycle_gap_ms, max_turns, votes_cast, votes_yes, \
                           votes_no, votes_abstain, created_at";

pub(crate) fn row_to_worker(row: &Row) -> rusqlite::Result<Worker> {
    let state: String = row.get("agent_state")?;
    let created_at: String = row.get("created_at")?;
    Ok(Worker {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        name: row.get("name")?,
        role: row.get("role")?,
        system_prompt: row.get("system_prompt")?,
        model: row.get("model")?,
        is_default: row.get("is_default")?,
        agent_state: col_enum(AgentState::parse, &state, "agent state")?,
        cycle_gap_ms: row.get::<_, Option<i64>>("cycle_gap_ms")?.map(|v| v as u64),
        max_turns: row.get::<_, Option<i64>>("max_turns")?.map(|v| v as u32),
        votes_cast: row.get::<_, i64>("votes_cast")? as u32,
        votes_yes: row.get::<_, i64>("votes_yes")? as u32,
        votes_no: row.get::<_, i64>("votes_no")? as u32,
        votes_abstain: row.get::<_, i64>("votes_abstain")? as u32,
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    /// Create a worker. A new default worker demotes the previous default
    /// in the same transaction, keeping the one-default invariant.
    pub fn create_worker(&self, new: &NewWorker) -> Result<Worker> {
        let id = self.write(|tx| {
            if new.is_default {
                if let Some(room_id) = new.room_id {
                    tx.execute(
                        "UPDATE workers SET is_default = 0 WHERE room_id = ?1 AND is_default = 1",
                        [room_id],
                    )
                    .map_err(map_sqlite)?;
                }
            }
            tx.execute(
                "INSERT INTO workers (room_id, name, role, system_prompt, model, is_default,
                                      agent_state, cycle_gap_ms, max_turns, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'idle', ?7, ?8, ?9)",
                rusqlite::params![
                    new.room_id,
                    new.name,
                    new.role,
                    new.system_prompt,
                    new.model,
                    new.is_default,
                    new.cycle_gap_ms.map(|v| v as i64),
                    new.max_turns.map(|v| v as i64),
                    ts(Utc::now())
                ],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.worker(id)?
            .ok_or_else(|| Error::internal("worker vanished after create"))
    }

    pub fn worker(&self, id: i64) -> Result<Option<Worker>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {WORKER_COLS} FROM workers WHERE id = ?1"),
                [id],
                row_to_worker,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn workers_in_room(&self, room_id: i64) -> Result<Vec<Worker>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {WORKER_COLS} FROM workers WHERE room_id = ?1 ORDER BY id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map([room_id], row_to_worker).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for w in mapped {
                out.push(w.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn worker_by_name(&self, room_id: i64, name: &str) -> Result<Option<Worker>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {WORKER_COLS} FROM workers WHERE room_id = ?1 AND name = ?2"),
                rusqlite::params![room_id, name],
                row_to_worker,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn update_worker(&self, id: i64, patch: &WorkerPatch) -> Result<Worker> {
        self.write(|tx| {
            let mut n = 0;
            if let Some(v) = &patch.name {
                n += tx
                    .execute("UPDATE workers SET name = ?1 WHERE id = ?2", rusqlite::params![v, id])
                    .map_err(map_sqlite)?;
            }
            if let Some(v) = &patch.role {
                n += tx
                    .execute("UPDATE workers SET role = ?1 WHERE id = ?2", rusqlite::params![v, id])
                    .map_err(map_sqlite)?;
            }
            if let Some(v) = &patch.system_prompt {
                n += tx
                    .execute(
                        "UPDATE workers SET system_prompt = ?1 WHERE id = ?2",
                        rusqlite::params![v, id],
                    )
                    .map_err(map_sqlite)?;
            }
            if let Some(v) = &patch.model {
                n += tx
                    .execute("UPDATE workers SET model = ?1 WHERE id = ?2", rusqlite::params![v, id])
                    .map_err(map_sqlite)?;
            }
            if let Some(v) = &patch.cycle_gap_ms {
                n += tx
                    .execute(
                        "UPDATE workers SET cycle_gap_ms = ?1 WHERE id = ?2",
                        rusqlite::params![v.map(|x| x as i64), id],
                    )
                    .map_err(map_sqlite)?;
            }
            if let Some(v) = &patch.max_turns {
                n += tx
                    .execute(
                        "UPDATE workers SET max_turns = ?1 WHERE id = ?2",
                        rusqlite::params![v.map(|x| x as i64), id],
                    )
                    .map_err(map_sqlite)?;
            }
            let _ = n;
            Ok(())
        })?;
        self.worker(id)?
            .ok_or_else(|| Error::not_found(format!("worker {id}")))
    }

    pub fn set_agent_state(&self, id: i64, state: AgentState) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE workers SET agent_state = ?1 WHERE id = ?2",
                rusqlite::params![state.as_str(), id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    /// Delete a worker. Tasks referencing it are detached via SET NULL;
    /// its ballots cascade away, which is why callers re-tally open
    /// decisions afterwards.
    pub fn delete_worker(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute("DELETE FROM workers WHERE id = ?1", [id])
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("worker {id}")));
            }
            Ok(())
        })
    }
}
