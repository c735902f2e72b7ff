//! Ordered schema migrations keyed by integer version.
//!
//! Each migration runs at most once; applied versions are recorded in
//! `schema_version`. Migrations are idempotent SQL batches so a crash
//! between batch and record is safe to replay.

use rusqlite::Transaction;

use qr_domain::Result;

use crate::map_sqlite;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
        CREATE TABLE IF NOT EXISTS rooms (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            objective TEXT NOT NULL,
            status TEXT NOT NULL,
            visibility TEXT NOT NULL,
            queen_worker_id INTEGER,
            config TEXT NOT NULL,
            webhook_token TEXT NOT NULL UNIQUE,
            referrer_code TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workers (
            id INTEGER PRIMARY KEY,
            room_id INTEGER REFERENCES rooms(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            system_prompt TEXT NOT NULL,
            model TEXT,
            is_default INTEGER NOT NULL DEFAULT 0,
            agent_state TEXT NOT NULL DEFAULT 'idle',
            cycle_gap_ms INTEGER,
            max_turns INTEGER,
            votes_cast INTEGER NOT NULL DEFAULT 0,
            votes_yes INTEGER NOT NULL DEFAULT 0,
            votes_no INTEGER NOT NULL DEFAULT 0,
            votes_abstain INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_workers_one_default
            ON workers(room_id) WHERE is_default = 1;
        CREATE INDEX IF NOT EXISTS idx_workers_room ON workers(room_id);

        CREATE TABLE IF NOT EXISTS goals (
            id INTEGER PRIMARY KEY,
            room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            parent_goal_id INTEGER REFERENCES goals(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            progress REAL NOT NULL DEFAULT 0,
            worker_id INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_goals_room ON goals(room_id);
        CREATE INDEX IF NOT EXISTS idx_goals_parent ON goals(parent_goal_id);

        CREATE TABLE IF NOT EXISTS goal_updates (
            id INTEGER PRIMARY KEY,
            goal_id INTEGER NOT NULL REFERENCES goals(id) ON DELETE CASCADE,
            observation TEXT NOT NULL,
            metric_value REAL,
            worker_id INTEGER,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS decisions (
            id INTEGER PRIMARY KEY,
            room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            proposer_id INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            proposal TEXT NOT NULL,
            decision_type TEXT NOT NULL,
            threshold TEXT NOT NULL,
            min_voters INTEGER,
            sealed INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'voting',
            result TEXT,
            votes_close_at TEXT NOT NULL,
            effective_at TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_decisions_room_status ON decisions(room_id, status);

        CREATE TABLE IF NOT EXISTS votes (
            id INTEGER PRIMARY KEY,
            decision_id INTEGER NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
            worker_id INTEGER NOT NULL REFERENCES workers(id) ON DELETE CASCADE,
            value TEXT NOT NULL,
            reasoning TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(decision_id, worker_id)
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY,
            room_id INTEGER REFERENCES rooms(id) ON DELETE CASCADE,
            worker_id INTEGER REFERENCES workers(id) ON DELETE SET NULL,
            name TEXT NOT NULL,
            prompt TEXT NOT NULL,
            trigger TEXT NOT NULL,
            cron_expression TEXT,
            scheduled_at TEXT,
            executor TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            run_count INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            max_runs INTEGER,
            session_continuity INTEGER NOT NULL DEFAULT 0,
            session_id TEXT,
            learned_context TEXT,
            timeout_minutes INTEGER NOT NULL DEFAULT 30,
            max_turns INTEGER,
            allowed_tools TEXT NOT NULL DEFAULT '[]',
            disallowed_tools TEXT NOT NULL DEFAULT '[]',
            webhook_token TEXT UNIQUE,
            last_run TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_trigger_status ON tasks(trigger, status);

        CREATE TABLE IF NOT EXISTS task_runs (
            id INTEGER PRIMARY KEY,
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'queued',
            started_at TEXT,
            finished_at TEXT,
            duration_ms INTEGER,
            exit_code INTEGER,
            result TEXT,
            error_message TEXT,
            result_file TEXT,
            progress REAL,
            progress_message TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs(task_id);
        CREATE INDEX IF NOT EXISTS idx_task_runs_status ON task_runs(status);

        CREATE TABLE IF NOT EXISTS console_logs (
            id INTEGER PRIMARY KEY,
            run_id INTEGER NOT NULL REFERENCES task_runs(id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            entry TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(run_id, seq)
        );

        CREATE TABLE IF NOT EXISTS watches (
            id INTEGER PRIMARY KEY,
            room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            action_prompt TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            trigger_count INTEGER NOT NULL DEFAULT 0,
            last_triggered TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY,
            room_id INTEGER REFERENCES rooms(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            category TEXT,
            created_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_room_name ON entities(room_id, name);

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY,
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            content TEXT NOT NULL,
            source TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS relations (
            id INTEGER PRIMARY KEY,
            from_entity INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            to_entity INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wallets (
            id INTEGER PRIMARY KEY,
            room_id INTEGER NOT NULL UNIQUE REFERENCES rooms(id) ON DELETE CASCADE,
            address TEXT NOT NULL,
            encrypted_key BLOB NOT NULL,
            chain TEXT NOT NULL,
            identity_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wallet_transactions (
            id INTEGER PRIMARY KEY,
            wallet_id INTEGER NOT NULL REFERENCES wallets(id) ON DELETE CASCADE,
            tx_type TEXT NOT NULL,
            amount TEXT NOT NULL,
            counterparty TEXT,
            tx_hash TEXT,
            description TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS activity (
            id INTEGER PRIMARY KEY,
            room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            summary TEXT NOT NULL,
            worker_id INTEGER,
            payload TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activity_room ON activity(room_id, id);

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY,
            room_id INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            sender TEXT NOT NULL,
            recipient_worker_id INTEGER,
            body TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_room_read ON messages(room_id, read);
        "#,
    },
    Migration {
        version: 2,
        sql: r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            content,
            content='observations',
            content_rowid='id'
        );
        CREATE TRIGGER IF NOT EXISTS observations_fts_insert
        AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, content) VALUES (new.id, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS observations_fts_delete
        AFTER DELETE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, content)
            VALUES ('delete', old.id, old.content);
        END;
        "#,
    },
];

/// Apply every not-yet-recorded migration inside the caller's transaction.
pub fn apply(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .map_err(map_sqlite)?;

    for m in MIGRATIONS {
        let applied: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM schema_version WHERE version = ?1)",
                [m.version],
                |row| row.get(0),
            )
            .map_err(map_sqlite)?;
        if applied {
            continue;
        }
        tx.execute_batch(m.sql).map_err(map_sqlite)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![m.version, crate::ts(chrono::Utc::now())],
        )
        .map_err(map_sqlite)?;
        tracing::info!(version = m.version, "applied schema migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        let mut last = 0;
        for m in MIGRATIONS {
            assert!(m.version > last, "migration {} out of order", m.version);
            last = m.version;
        }
    }

    #[test]
    fn apply_twice_is_a_noop() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        apply(&tx).unwrap();
        apply(&tx).unwrap();
        let count: i64 = tx
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }
}
