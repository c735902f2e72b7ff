//! SQLite-backed engine store.
//!
//! One `Store` per process owns the database file: WAL journal, foreign
//! keys on, 5 s busy timeout. Every multi-table write happens inside a
//! single transaction. Ordered migrations run at open; stale `running`
//! runs left behind by a crash are promoted to `failed`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

use qr_domain::{Error, Result};

mod activity;
mod decisions;
mod goals;
mod memory;
mod migrations;
mod rooms;
mod tasks;
mod wallets;
mod watches;
mod workers;

pub use decisions::NewDecision;
pub use memory::MemoryHit;
pub use rooms::NewRoom;
pub use tasks::NewTask;
pub use wallets::WalletSeed;
pub use workers::{NewWorker, WorkerPatch};

const WRITE_RETRIES: u32 = 3;

/// Single-writer store handle. Cheap to clone; all clones share one
/// connection guarded by a mutex.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database, apply migrations, and recover state
    /// left behind by an unclean shutdown.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(map_sqlite)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sqlite)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(map_sqlite)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(map_sqlite)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.write(|tx| migrations::apply(tx))?;
        let recovered = store.recover_stale_runs()?;
        if recovered > 0 {
            tracing::info!(count = recovered, "promoted stale runs to failed at startup");
        }
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sqlite)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.write(|tx| migrations::apply(tx))?;
        Ok(store)
    }

    /// Read-only access. Missing rows surface as `Ok(None)` from callers
    /// using `optional()`, never as errors.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// One write transaction, retried on lock contention with jittered
    /// back-off before surfacing `conflict`.
    pub(crate) fn write<T>(&self, f: impl Fn(&Transaction) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            let outcome = {
                let mut conn = self.conn.lock();
                let tx = conn.transaction().map_err(map_sqlite)?;
                match f(&tx) {
                    Ok(value) => tx.commit().map_err(map_sqlite).map(|_| value),
                    Err(e) => Err(e),
                }
            };
            match outcome {
                Err(Error::Conflict(msg)) if attempt < WRITE_RETRIES => {
                    attempt += 1;
                    let jitter: u64 = rand::random::<u64>() % 40;
                    std::thread::sleep(Duration::from_millis(25 * u64::from(attempt) + jitter));
                    tracing::debug!(attempt, msg = %msg, "retrying contended write");
                }
                other => return other,
            }
        }
    }

    /// Promote `queued`/`running` runs from a previous process to `failed`.
    fn recover_stale_runs(&self) -> Result<usize> {
        self.write(|tx| {
            let now = ts(Utc::now());
            let n = tx
                .execute(
                    "UPDATE task_runs
                     SET status = 'failed', error_message = 'process restart',
                         finished_at = COALESCE(finished_at, ?1)
                     WHERE status IN ('queued', 'running')",
                    rusqlite::params![now],
                )
                .map_err(map_sqlite)?;
            Ok(n)
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared column helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a rusqlite error onto the shared error kinds. Unique-constraint
/// violations become `already_exists`; other constraint and lock errors
/// become `conflict`.
pub(crate) fn map_sqlite(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(code, msg) => {
            let msg_txt = msg.clone().unwrap_or_default();
            match code.code {
                rusqlite::ErrorCode::ConstraintViolation => {
                    if msg_txt.contains("UNIQUE") {
                        Error::AlreadyExists(msg_txt)
                    } else {
                        Error::Conflict(msg_txt)
                    }
                }
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Error::Conflict(format!("database busy: {msg_txt}"))
                }
                _ => Error::Internal(format!("sqlite: {e}")),
            }
        }
        _ => Error::Internal(format!("sqlite: {e}")),
    }
}

/// Timestamps are stored as RFC 3339 TEXT.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_ts)
}

/// Conversion failure for a corrupt enum TEXT column, usable inside
/// rusqlite row mappers.
pub(crate) fn corrupt(what: &str, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("corrupt {what}: {raw:?}").into(),
    )
}

/// Parse a TEXT status column into its enum inside a row mapper.
pub(crate) fn col_enum<T>(
    parse: impl FnOnce(&str) -> Option<T>,
    raw: &str,
    what: &str,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| corrupt(what, raw))
}

#[cfg(test)]
pub(crate) mod testutil {
    use qr_domain::model::{Room, RoomConfig, Visibility, Worker};

    use crate::rooms::NewRoom;
    use crate::Store;

    pub fn new_room(name: &str) -> NewRoom {
        let sum: u128 = name.as_bytes().iter().map(|b| *b as u128).sum();
        NewRoom {
            name: name.into(),
            objective: "ship v1".into(),
            visibility: Visibility::Private,
            config: RoomConfig::default(),
            webhook_token: format!("{:032x}", sum + 7),
            referrer_code: None,
            queen_system_prompt: "You coordinate the room.".into(),
            wallet: None,
        }
    }

    /// Fresh in-memory store with one room; returns (store, room, queen).
    pub fn seeded(name: &str) -> (Store, Room, Worker) {
        let store = Store::open_in_memory().unwrap();
        let (room, queen) = store.create_room(&new_room(name)).unwrap();
        (store, room, queen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_migrates() {
        let store = Store::open_in_memory().unwrap();
        let version: i64 = store
            .read(|c| {
                c.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
                    .map_err(map_sqlite)
            })
            .unwrap();
        assert!(version >= 1);
    }

    #[test]
    fn open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoroom.db");
        drop(Store::open(&path).unwrap());
        // Second open re-runs migrations as no-ops.
        drop(Store::open(&path).unwrap());
    }

    #[test]
    fn ts_roundtrip() {
        let now = Utc::now();
        let there_and_back = parse_ts(&ts(now));
        assert!((there_and_back - now).num_milliseconds().abs() < 1000);
    }

    #[test]
    fn col_enum_rejects_garbage() {
        assert!(col_enum(qr_domain::model::RoomStatus::parse, "zombie", "room status").is_err());
        assert!(col_enum(qr_domain::model::RoomStatus::parse, "paused", "room status").is_ok());
    }
}
