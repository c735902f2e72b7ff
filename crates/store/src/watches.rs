//! Filesystem watch repository.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use qr_domain::model::{Watch, WatchStatus};
use qr_domain::{Error, Result};

use crate::{col_enum, map_sqlite, parse_ts, parse_ts_opt, ts, Store};

const WATCH_COLS: &str =
    "id, room_id, path, action_prompt, description, status, trigger_count, last_triggered, created_at";

fn row_to_watch(row: &Row) -> rusqlite::Result<Watch> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    Ok(Watch {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        path: row.get("path")?,
        action_prompt: row.get("action_prompt")?,
        description: row.get("description")?,
        status: col_enum(WatchStatus::parse, &status, "watch status")?,
        trigger_count: row.get::<_, i64>("trigger_count")? as u32,
        last_triggered: parse_ts_opt(row.get("last_triggered")?),
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    /// Path validation happens in the engine before this is called.
    pub fn create_watch(
        &self,
        room_id: i64,
        path: &str,
        action_prompt: &str,
        description: Option<&str>,
    ) -> Result<Watch> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO watches (room_id, path, action_prompt, description, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
                rusqlite::params![room_id, path, action_prompt, description, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.watch(id)?
            .ok_or_else(|| Error::internal("watch vanished after create"))
    }

    pub fn watch(&self, id: i64) -> Result<Option<Watch>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {WATCH_COLS} FROM watches WHERE id = ?1"),
                [id],
                row_to_watch,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn active_watches(&self) -> Result<Vec<Watch>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {WATCH_COLS} FROM watches WHERE status = 'active' ORDER BY id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map([], row_to_watch).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for w in mapped {
                out.push(w.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn watches_in_room(&self, room_id: i64) -> Result<Vec<Watch>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(&format!(
                    "SELECT {WATCH_COLS} FROM watches WHERE room_id = ?1 ORDER BY id"
                ))
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map([room_id], row_to_watch).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for w in mapped {
                out.push(w.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn set_watch_status(&self, id: i64, status: WatchStatus) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute(
                    "UPDATE watches SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status.as_str(), id],
                )
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("watch {id}")));
            }
            Ok(())
        })
    }

    pub fn record_watch_trigger(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                "UPDATE watches
                 SET trigger_count = trigger_count + 1, last_triggered = ?1
                 WHERE id = ?2",
                rusqlite::params![ts(Utc::now()), id],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    pub fn delete_watch(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute("DELETE FROM watches WHERE id = ?1", [id])
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("watch {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded;

    #[test]
    fn create_list_and_pause() {
        let (store, room, _) = seeded("R");
        let w = store
            .create_watch(room.id, "/home/u/notes", "summarize the change", None)
            .unwrap();
        assert_eq!(w.status, WatchStatus::Active);
        assert_eq!(store.active_watches().unwrap().len(), 1);

        store.set_watch_status(w.id, WatchStatus::Paused).unwrap();
        assert!(store.active_watches().unwrap().is_empty());
        assert_eq!(store.watches_in_room(room.id).unwrap().len(), 1);
    }

    #[test]
    fn trigger_bookkeeping() {
        let (store, room, _) = seeded("R");
        let w = store
            .create_watch(room.id, "/home/u/notes", "act", Some("notes dir"))
            .unwrap();
        assert_eq!(w.trigger_count, 0);
        assert!(w.last_triggered.is_none());
        store.record_watch_trigger(w.id).unwrap();
        store.record_watch_trigger(w.id).unwrap();
        let w = store.watch(w.id).unwrap().unwrap();
        assert_eq!(w.trigger_count, 2);
        assert!(w.last_triggered.is_some());
    }
}
