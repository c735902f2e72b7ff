//! Task and task-run repository, plus per-run console logs.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, Transaction};

use qr_domain::model::{ConsoleEntry, ConsoleLog, RunStatus, Task, TaskRun, TaskStatus, TriggerType};
use qr_domain::{Error, Result};

use crate::{col_enum, corrupt, map_sqlite, parse_ts, parse_ts_opt, ts, Store};

pub struct NewTask {
    pub room_id: Option<i64>,
    pub worker_id: Option<i64>,
    pub name: String,
    pub prompt: String,
    pub trigger: TriggerType,
    pub cron_expression: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub executor: Option<String>,
    pub max_runs: Option<u32>,
    pub session_continuity: bool,
    pub timeout_minutes: u32,
    pub max_turns: Option<u32>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub webhook_token: Option<String>,
}

const TASK_COLS: &str = "id, room_id, worker_id, name, prompt, trigger, cron_expression, \
                         scheduled_at, executor, status, run_count, error_count, max_runs, \
                         session_continuity, session_id, learned_context, timeout_minutes, \
                         max_turns, allowed_tools, disallowed_tools, webhook_token, last_run, \
                         created_at";

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let trigger: String = row.get("trigger")?;
    let status: String = row.get("status")?;
    let allowed: String = row.get("allowed_tools")?;
    let disallowed: String = row.get("disallowed_tools")?;
    let created_at: String = row.get("created_at")?;
    Ok(Task {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        worker_id: row.get("worker_id")?,
        name: row.get("name")?,
        prompt: row.get("prompt")?,
        trigger: col_enum(TriggerType::parse, &trigger, "trigger type")?,
        cron_expression: row.get("cron_expression")?,
        scheduled_at: parse_ts_opt(row.get("scheduled_at")?),
        executor: row.get("executor")?,
        status: col_enum(TaskStatus::parse, &status, "task status")?,
        run_count: row.get::<_, i64>("run_count")? as u32,
        error_count: row.get::<_, i64>("error_count")? as u32,
        max_runs: row.get::<_, Option<i64>>("max_runs")?.map(|v| v as u32),
        session_continuity: row.get("session_continuity")?,
        session_id: row.get("session_id")?,
        learned_context: row.get("learned_context")?,
        timeout_minutes: row.get::<_, i64>("timeout_minutes")? as u32,
        max_turns: row.get::<_, Option<i64>>("max_turns")?.map(|v| v as u32),
        allowed_tools: serde_json::from_str(&allowed).map_err(|_| corrupt("allowed_tools", &allowed))?,
        disallowed_tools: serde_json::from_str(&disallowed)
            .map_err(|_| corrupt("disallowed_tools", &disallowed))?,
        webhook_token: row.get("webhook_token")?,
        last_run: row.get("last_run")?,
        created_at: parse_ts(&created_at),
    })
}

const RUN_COLS: &str = "id, task_id, status, started_at, finished_at, duration_ms, exit_code, \
                        result, error_message, result_file, progress, progress_message, created_at";

fn row_to_run(row: &Row) -> rusqlite::Result<TaskRun> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    Ok(TaskRun {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        status: col_enum(RunStatus::parse, &status, "run status")?,
        started_at: parse_ts_opt(row.get("started_at")?),
        finished_at: parse_ts_opt(row.get("finished_at")?),
        duration_ms: row.get("duration_ms")?,
        exit_code: row.get("exit_code")?,
        result: row.get("result")?,
        error_message: row.get("error_message")?,
        result_file: row.get("result_file")?,
        progress: row.get("progress")?,
        progress_message: row.get("progress_message")?,
        created_at: parse_ts(&created_at),
    })
}

fn run_in_tx(tx: &Transaction, id: i64) -> Result<Option<TaskRun>> {
    tx.query_row(
        &format!("SELECT {RUN_COLS} FROM task_runs WHERE id = ?1"),
        [id],
        row_to_run,
    )
    .optional()
    .map_err(map_sqlite)
}

impl Store {
    /// Create a task. One-shot tasks with a past `scheduled_at` are
    /// rejected at creation; trigger-specific fields are required.
    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        match new.trigger {
            TriggerType::Cron if new.cron_expression.is_none() => {
                return Err(Error::invalid_input("cron task needs a cron expression"));
            }
            TriggerType::Once => match new.scheduled_at {
                None => return Err(Error::invalid_input("one-shot task needs scheduled_at")),
                Some(at) if at <= Utc::now() => {
                    return Err(Error::invalid_input("scheduled_at is in the past"));
                }
                Some(_) => {}
            },
            _ => {}
        }
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO tasks (room_id, worker_id, name, prompt, trigger, cron_expression,
                                    scheduled_at, executor, status, max_runs, session_continuity,
                                    timeout_minutes, max_turns, allowed_tools, disallowed_tools,
                                    webhook_token, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?11, ?12, ?13, ?14,
                         ?15, ?16)",
                rusqlite::params![
                    new.room_id,
                    new.worker_id,
                    new.name,
                    new.prompt,
                    new.trigger.as_str(),
                    new.cron_expression,
                    new.scheduled_at.map(ts),
                    new.executor,
                    new.max_runs.map(|v| v as i64),
                    new.session_continuity,
                    new.timeout_minutes as i64,
                    new.max_turns.map(|v| v as i64),
                    serde_json::to_string(&new.allowed_tools)
                        .map_err(|e| Error::internal(format!("allowed_tools: {e}")))?,
                    serde_json::to_string(&new.disallowed_tools)
                        .map_err(|e| Error::internal(format!("disallowed_tools: {e}")))?,
                    new.webhook_token,
                    ts(Utc::now())
                ],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.task(id)?
            .ok_or_else(|| Error::internal("task vanished after create"))
    }

    pub fn task(&self, id: i64) -> Result<Option<Task>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
                [id],
                row_to_task,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn task_by_webhook_token(&self, token: &str) -> Result<Option<Task>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE webhook_token = ?1"),
                [token],
                row_to_task,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    fn tasks_where(&self, where_clause: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Task>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {TASK_COLS} FROM tasks WHERE {where_clause} ORDER BY id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map(params, row_to_task).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for t in mapped {
                out.push(t.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn active_cron_tasks(&self) -> Result<Vec<Task>> {
        self.tasks_where("trigger = 'cron' AND status = 'active'", &[])
    }

    /// Active one-shot tasks, soonest first; the once-dispatcher sleeps to
    /// the head of this list.
    pub fn pending_once_tasks(&self) -> Result<Vec<Task>> {
        self.tasks_where(
            "trigger = 'once' AND status = 'active' AND scheduled_at IS NOT NULL",
            &[],
        )
        .map(|mut v| {
            v.sort_by_key(|t| t.scheduled_at);
            v
        })
    }

    pub fn tasks_in_room(&self, room_id: i64) -> Result<Vec<Task>> {
        self.tasks_where("room_id = ?1", &[&room_id])
    }

    pub fn set_task_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute(
                    "UPDATE tasks SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status.as_str(), id],
                )
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("task {id}")));
            }
            Ok(())
        })
    }

    /// Record the cron minute a task last fired in, for same-window dedupe.
    pub fn set_task_last_run(&self, id: i64, minute_key: &str) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE tasks SET last_run = ?1 WHERE id = ?2",
                rusqlite::params![minute_key, id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    /// A successful run: bump `run_count`, persist the session id when
    /// continuity is on, and complete the task once `max_runs` is reached.
    pub fn record_task_success(&self, id: i64, session_id: Option<&str>) -> Result<Task> {
        self.write(|tx| {
            tx.execute(
                "UPDATE tasks SET run_count = run_count + 1,
                                  session_id = COALESCE(?1, session_id)
                 WHERE id = ?2",
                rusqlite::params![session_id, id],
            )
            .map_err(map_sqlite)?;
            tx.execute(
                "UPDATE tasks SET status = 'completed'
                 WHERE id = ?1 AND max_runs IS NOT NULL AND run_count >= max_runs",
                [id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })?;
        self.task(id)?.ok_or_else(|| Error::not_found(format!("task {id}")))
    }

    pub fn record_task_failure(&self, id: i64) -> Result<Task> {
        self.write(|tx| {
            tx.execute(
                "UPDATE tasks SET error_count = error_count + 1 WHERE id = ?1",
                [id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })?;
        self.task(id)?.ok_or_else(|| Error::not_found(format!("task {id}")))
    }

    pub fn set_learned_context(&self, id: i64, memo: &str) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE tasks SET learned_context = ?1 WHERE id = ?2",
                rusqlite::params![memo, id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    // ── Runs ──────────────────────────────────────────────────────────

    pub fn create_run(&self, task_id: i64) -> Result<TaskRun> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO task_runs (task_id, status, created_at) VALUES (?1, 'queued', ?2)",
                rusqlite::params![task_id, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.run(id)?
            .ok_or_else(|| Error::internal("run vanished after create"))
    }

    /// `queued → running`, stamping `started_at`.
    pub fn start_run(&self, id: i64) -> Result<TaskRun> {
        self.write(|tx| {
            let run = run_in_tx(tx, id)?.ok_or_else(|| Error::not_found(format!("run {id}")))?;
            if run.status != RunStatus::Queued {
                return Err(Error::invalid_state(format!("run {id} is {}", run.status)));
            }
            tx.execute(
                "UPDATE task_runs SET status = 'running', started_at = ?1 WHERE id = ?2",
                rusqlite::params![ts(Utc::now()), id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })?;
        self.run(id)?.ok_or_else(|| Error::not_found(format!("run {id}")))
    }

    /// Transition a run to a terminal status, stamping `finished_at` and
    /// the derived duration. Already-terminal runs answer `invalid_state`.
    pub fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        exit_code: Option<i32>,
        result: Option<&str>,
        error_message: Option<&str>,
        result_file: Option<&str>,
    ) -> Result<TaskRun> {
        if !status.is_terminal() {
            return Err(Error::invalid_input("finish_run takes a terminal status"));
        }
        self.write(|tx| {
            let run = run_in_tx(tx, id)?.ok_or_else(|| Error::not_found(format!("run {id}")))?;
            if run.status.is_terminal() {
                return Err(Error::invalid_state(format!("run {id} is already {}", run.status)));
            }
            let finished = Utc::now();
            let duration_ms = run
                .started_at
                .map(|s| (finished - s).num_milliseconds().max(0));
            tx.execute(
                "UPDATE task_runs
                 SET status = ?1, finished_at = ?2, duration_ms = ?3, exit_code = ?4,
                     result = ?5, error_message = ?6, result_file = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    status.as_str(),
                    ts(finished),
                    duration_ms,
                    exit_code,
                    result,
                    error_message,
                    result_file,
                    id
                ],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })?;
        self.run(id)?.ok_or_else(|| Error::not_found(format!("run {id}")))
    }

    pub fn update_run_progress(&self, id: i64, progress: f64, message: Option<&str>) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE task_runs SET progress = ?1, progress_message = ?2
                 WHERE id = ?3 AND status = 'running'",
                rusqlite::params![progress.clamp(0.0, 1.0), message, id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    pub fn run(&self, id: i64) -> Result<Option<TaskRun>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {RUN_COLS} FROM task_runs WHERE id = ?1"),
                [id],
                row_to_run,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn runs_for_task(&self, task_id: i64, limit: usize) -> Result<Vec<TaskRun>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {RUN_COLS} FROM task_runs WHERE task_id = ?1
                     ORDER BY id DESC LIMIT ?2"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map(rusqlite::params![task_id, limit as i64], row_to_run)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for r in mapped {
                out.push(r.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// The last `k` completed results, newest first, for distillation.
    pub fn recent_successful_results(&self, task_id: i64, k: usize) -> Result<Vec<String>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT result FROM task_runs
                     WHERE task_id = ?1 AND status = 'completed' AND result IS NOT NULL
                     ORDER BY id DESC LIMIT ?2",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map(rusqlite::params![task_id, k as i64], |r| r.get(0))
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for r in mapped {
                out.push(r.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Concurrent (queued or running) runs for a room's tasks.
    pub fn active_run_count_for_room(&self, room_id: i64) -> Result<u32> {
        self.read(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM task_runs r
                 JOIN tasks t ON t.id = r.task_id
                 WHERE t.room_id = ?1 AND r.status IN ('queued', 'running')",
                [room_id],
                |r| r.get::<_, i64>(0),
            )
            .map_err(map_sqlite)
            .map(|n| n as u32)
        })
    }

    // ── Console logs ──────────────────────────────────────────────────

    /// Append a console entry with the next monotonic `seq` for the run.
    pub fn append_console(&self, run_id: i64, entry: ConsoleEntry, content: &str) -> Result<i64> {
        self.write(|tx| {
            let seq: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq) + 1, 0) FROM console_logs WHERE run_id = ?1",
                    [run_id],
                    |r| r.get(0),
                )
                .map_err(map_sqlite)?;
            tx.execute(
                "INSERT INTO console_logs (run_id, seq, entry, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![run_id, seq, entry.as_str(), content, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(seq)
        })
    }

    pub fn console_logs(&self, run_id: i64) -> Result<Vec<ConsoleLog>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, run_id, seq, entry, content, created_at
                     FROM console_logs WHERE run_id = ?1 ORDER BY seq",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map([run_id], |row| {
                    let entry: String = row.get("entry")?;
                    let created_at: String = row.get("created_at")?;
                    Ok(ConsoleLog {
                        id: row.get("id")?,
                        run_id: row.get("run_id")?,
                        seq: row.get("seq")?,
                        entry: col_enum(ConsoleEntry::parse, &entry, "console entry")?,
                        content: row.get("content")?,
                        created_at: parse_ts(&created_at),
                    })
                })
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for l in mapped {
                out.push(l.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded;

    fn manual_task(room_id: i64) -> NewTask {
        NewTask {
            room_id: Some(room_id),
            worker_id: None,
            name: "summarize".into(),
            prompt: "summarize yesterday".into(),
            trigger: TriggerType::Manual,
            cron_expression: None,
            scheduled_at: None,
            executor: None,
            max_runs: None,
            session_continuity: false,
            timeout_minutes: 30,
            max_turns: None,
            allowed_tools: vec![],
            disallowed_tools: vec![],
            webhook_token: None,
        }
    }

    #[test]
    fn past_scheduled_at_rejected() {
        let (store, room, _) = seeded("R");
        let mut t = manual_task(room.id);
        t.trigger = TriggerType::Once;
        t.scheduled_at = Some(Utc::now() - chrono::Duration::minutes(5));
        let err = store.create_task(&t).unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidInput);
    }

    #[test]
    fn cron_task_requires_expression() {
        let (store, room, _) = seeded("R");
        let mut t = manual_task(room.id);
        t.trigger = TriggerType::Cron;
        assert!(store.create_task(&t).is_err());
    }

    #[test]
    fn run_lifecycle_stamps_duration() {
        let (store, room, _) = seeded("R");
        let task = store.create_task(&manual_task(room.id)).unwrap();
        let run = store.create_run(task.id).unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        let run = store.start_run(run.id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());

        let run = store
            .finish_run(run.id, RunStatus::Completed, Some(0), Some("done"), None, None)
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        let finished = run.finished_at.unwrap();
        let started = run.started_at.unwrap();
        assert!(finished >= started);
        assert_eq!(
            run.duration_ms.unwrap(),
            (finished - started).num_milliseconds()
        );
    }

    #[test]
    fn double_finish_is_invalid_state() {
        let (store, room, _) = seeded("R");
        let task = store.create_task(&manual_task(room.id)).unwrap();
        let run = store.create_run(task.id).unwrap();
        store.start_run(run.id).unwrap();
        store
            .finish_run(run.id, RunStatus::Failed, None, None, Some("boom"), None)
            .unwrap();
        let err = store
            .finish_run(run.id, RunStatus::Completed, None, None, None, None)
            .unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::InvalidState);
    }

    #[test]
    fn console_seq_is_monotonic_per_run() {
        let (store, room, _) = seeded("R");
        let task = store.create_task(&manual_task(room.id)).unwrap();
        let run = store.create_run(task.id).unwrap();
        assert_eq!(store.append_console(run.id, ConsoleEntry::Stdout, "a").unwrap(), 0);
        assert_eq!(store.append_console(run.id, ConsoleEntry::Stderr, "b").unwrap(), 1);
        assert_eq!(store.append_console(run.id, ConsoleEntry::Assistant, "c").unwrap(), 2);

        let other = store.create_run(task.id).unwrap();
        assert_eq!(store.append_console(other.id, ConsoleEntry::Stdout, "x").unwrap(), 0);

        let logs = store.console_logs(run.id).unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[1].entry, ConsoleEntry::Stderr);
    }

    #[test]
    fn success_bumps_count_and_completes_at_cap() {
        let (store, room, _) = seeded("R");
        let mut nt = manual_task(room.id);
        nt.max_runs = Some(2);
        let task = store.create_task(&nt).unwrap();

        let t = store.record_task_success(task.id, Some("s1")).unwrap();
        assert_eq!(t.run_count, 1);
        assert_eq!(t.session_id.as_deref(), Some("s1"));
        assert_eq!(t.status, TaskStatus::Active);

        let t = store.record_task_success(task.id, Some("s2")).unwrap();
        assert_eq!(t.run_count, 2);
        assert_eq!(t.status, TaskStatus::Completed, "max_runs reached");
    }

    #[test]
    fn failure_bumps_error_count_only() {
        let (store, room, _) = seeded("R");
        let task = store.create_task(&manual_task(room.id)).unwrap();
        let t = store.record_task_failure(task.id).unwrap();
        assert_eq!(t.error_count, 1);
        assert_eq!(t.run_count, 0);
        assert_eq!(t.status, TaskStatus::Active);
    }

    #[test]
    fn stale_runs_promoted_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoroom.db");
        let run_id;
        {
            let store = Store::open(&path).unwrap();
            let (room, _) = store.create_room(&crate::testutil::new_room("R")).unwrap();
            let task = store.create_task(&manual_task(room.id)).unwrap();
            let run = store.create_run(task.id).unwrap();
            store.start_run(run.id).unwrap();
            run_id = run.id;
        }
        let store = Store::open(&path).unwrap();
        let run = store.run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("process restart"));
    }

    #[test]
    fn active_run_count_tracks_room() {
        let (store, room, _) = seeded("R");
        let task = store.create_task(&manual_task(room.id)).unwrap();
        assert_eq!(store.active_run_count_for_room(room.id).unwrap(), 0);
        let r1 = store.create_run(task.id).unwrap();
        let _r2 = store.create_run(task.id).unwrap();
        assert_eq!(store.active_run_count_for_room(room.id).unwrap(), 2);
        store.start_run(r1.id).unwrap();
        store
            .finish_run(r1.id, RunStatus::Completed, Some(0), None, None, None)
            .unwrap();
        assert_eq!(store.active_run_count_for_room(room.id).unwrap(), 1);
    }

    #[test]
    fn recent_successes_for_distillation() {
        let (store, room, _) = seeded("R");
        let task = store.create_task(&manual_task(room.id)).unwrap();
        for i in 0..4 {
            let run = store.create_run(task.id).unwrap();
            store.start_run(run.id).unwrap();
            store
                .finish_run(
                    run.id,
                    RunStatus::Completed,
                    Some(0),
                    Some(&format!("result {i}")),
                    None,
                    None,
                )
                .unwrap();
        }
        let results = store.recent_successful_results(task.id, 3).unwrap();
        assert_eq!(results, vec!["result 3", "result 2", "result 1"]);
    }
}
