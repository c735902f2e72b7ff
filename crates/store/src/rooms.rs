//! Room repository: birth, control transitions, config, deletion.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use qr_domain::model::{Room, RoomConfig, RoomStatus, Visibility, Worker};
use qr_domain::{Error, Result};

use crate::wallets::WalletSeed;
use crate::{col_enum, corrupt, map_sqlite, parse_ts, ts, Store};

/// Everything needed to bring a room to life in one transaction: the room
/// row, its implicit Queen worker, and (when a seed is supplied) its wallet.
pub struct NewRoom {
    pub name: String,
    pub objective: String,
    pub visibility: Visibility,
    pub config: RoomConfig,
    /// 16-byte opaque secret, hex-encoded, generated by the caller.
    pub webhook_token: String,
    pub referrer_code: Option<String>,
    pub queen_system_prompt: String,
    pub wallet: Option<WalletSeed>,
}

const ROOM_COLS: &str = "id, name, objective, status, visibility, queen_worker_id, config, \
                         webhook_token, referrer_code, created_at";

pub(crate) fn row_to_room(row: &Row) -> rusqlite::Result<Room> {
    let status: String = row.get("status")?;
    let visibility: String = row.get("visibility")?;
    let config_json: String = row.get("config")?;
    let created_at: String = row.get("created_at")?;
    Ok(Room {
        id: row.get("id")?,
        name: row.get("name")?,
        objective: row.get("objective")?,
        status: col_enum(RoomStatus::parse, &status, "room status")?,
        visibility: col_enum(Visibility::parse, &visibility, "room visibility")?,
        queen_worker_id: row.get("queen_worker_id")?,
        config: serde_json::from_str(&config_json)
            .map_err(|_| corrupt("room config", &config_json))?,
        webhook_token: row.get("webhook_token")?,
        referrer_code: row.get("referrer_code")?,
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    /// Create a room with its implicit Queen worker (and wallet row when a
    /// seed is supplied) in a single transaction.
    pub fn create_room(&self, new: &NewRoom) -> Result<(Room, Worker)> {
        let (room_id, queen_id) = self.write(|tx| {
            let now = ts(Utc::now());
            let config_json = serde_json::to_string(&new.config)
                .map_err(|e| Error::internal(format!("room config: {e}")))?;
            tx.execute(
                "INSERT INTO rooms (name, objective, status, visibility, config,
                                    webhook_token, referrer_code, created_at)
                 VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    new.name,
                    new.objective,
                    new.visibility.as_str(),
                    config_json,
                    new.webhook_token,
                    new.referrer_code,
                    now
                ],
            )
            .map_err(map_sqlite)?;
            let room_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO workers (room_id, name, role, system_prompt, is_default,
                                      agent_state, created_at)
                 VALUES (?1, ?2, 'queen', ?3, 1, 'idle', ?4)",
                rusqlite::params![
                    room_id,
                    format!("{} Queen", new.name),
                    new.queen_system_prompt,
                    now
                ],
            )
            .map_err(map_sqlite)?;
            let queen_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE rooms SET queen_worker_id = ?1 WHERE id = ?2",
                rusqlite::params![queen_id, room_id],
            )
            .map_err(map_sqlite)?;

            if let Some(seed) = &new.wallet {
                crate::wallets::insert_wallet_tx(tx, room_id, seed)?;
            }

            tx.execute(
                "INSERT INTO activity (room_id, event_type, summary, created_at)
                 VALUES (?1, 'system', ?2, ?3)",
                rusqlite::params![room_id, format!("room \"{}\" created", new.name), now],
            )
            .map_err(map_sqlite)?;

            Ok((room_id, queen_id))
        })?;

        let room = self
            .room(room_id)?
            .ok_or_else(|| Error::internal("room vanished after create"))?;
        let queen = self
            .worker(queen_id)?
            .ok_or_else(|| Error::internal("queen vanished after create"))?;
        Ok((room, queen))
    }

    pub fn room(&self, id: i64) -> Result<Option<Room>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {ROOM_COLS} FROM rooms WHERE id = ?1"),
                [id],
                row_to_room,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn room_by_webhook_token(&self, token: &str) -> Result<Option<Room>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {ROOM_COLS} FROM rooms WHERE webhook_token = ?1"),
                [token],
                row_to_room,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn rooms(&self, status: Option<RoomStatus>) -> Result<Vec<Room>> {
        self.read(|c| {
            let mut rows = Vec::new();
            match status {
                Some(s) => {
                    let mut stmt = c
                        .prepare(&format!(
                            "SELECT {ROOM_COLS} FROM rooms WHERE status = ?1 ORDER BY id"
                        ))
                        .map_err(map_sqlite)?;
                    let mapped = stmt
                        .query_map([s.as_str()], row_to_room)
                        .map_err(map_sqlite)?;
                    for r in mapped {
                        rows.push(r.map_err(map_sqlite)?);
                    }
                }
                None => {
                    let mut stmt = c
                        .prepare(&format!("SELECT {ROOM_COLS} FROM rooms ORDER BY id"))
                        .map_err(map_sqlite)?;
                    let mapped = stmt.query_map([], row_to_room).map_err(map_sqlite)?;
                    for r in mapped {
                        rows.push(r.map_err(map_sqlite)?);
                    }
                }
            }
            Ok(rows)
        })
    }

    /// Idempotent status transition: setting the current status succeeds.
    pub fn set_room_status(&self, id: i64, status: RoomStatus) -> Result<Room> {
        self.write(|tx| {
            let n = tx
                .execute(
                    "UPDATE rooms SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status.as_str(), id],
                )
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("room {id}")));
            }
            Ok(())
        })?;
        self.room(id)?
            .ok_or_else(|| Error::not_found(format!("room {id}")))
    }

    pub fn set_room_visibility(&self, id: i64, visibility: Visibility) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute(
                    "UPDATE rooms SET visibility = ?1 WHERE id = ?2",
                    rusqlite::params![visibility.as_str(), id],
                )
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("room {id}")));
            }
            Ok(())
        })
    }

    pub fn set_room_config(&self, id: i64, config: &RoomConfig) -> Result<()> {
        let json =
            serde_json::to_string(config).map_err(|e| Error::internal(format!("config: {e}")))?;
        self.write(|tx| {
            let n = tx
                .execute(
                    "UPDATE rooms SET config = ?1 WHERE id = ?2",
                    rusqlite::params![json, id],
                )
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("room {id}")));
            }
            Ok(())
        })
    }

    /// Delete a room; foreign keys cascade to every owned row.
    pub fn delete_room(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute("DELETE FROM rooms WHERE id = ?1", [id])
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("room {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::new_room;

    #[test]
    fn birth_creates_room_queen_and_activity() {
        let store = Store::open_in_memory().unwrap();
        let (room, queen) = store.create_room(&new_room("R")).unwrap();

        assert_eq!(room.name, "R");
        assert_eq!(room.status, RoomStatus::Active);
        assert_eq!(room.queen_worker_id, Some(queen.id));
        assert_eq!(queen.name, "R Queen");
        assert!(queen.is_default);
        assert_eq!(queen.role, "queen");

        let events = store.recent_activity(room.id, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "system");
    }

    #[test]
    fn room_lookup_by_token() {
        let store = Store::open_in_memory().unwrap();
        let (room, _) = store.create_room(&new_room("R")).unwrap();
        let hit = store.room_by_webhook_token(&room.webhook_token).unwrap();
        assert_eq!(hit.map(|r| r.id), Some(room.id));
        assert!(store.room_by_webhook_token("nope").unwrap().is_none());
    }

    #[test]
    fn status_transition_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let (room, _) = store.create_room(&new_room("R")).unwrap();
        let r1 = store.set_room_status(room.id, RoomStatus::Paused).unwrap();
        assert_eq!(r1.status, RoomStatus::Paused);
        let r2 = store.set_room_status(room.id, RoomStatus::Paused).unwrap();
        assert_eq!(r2.status, RoomStatus::Paused);
    }

    #[test]
    fn delete_cascades_to_workers_and_activity() {
        let store = Store::open_in_memory().unwrap();
        let (room, queen) = store.create_room(&new_room("R")).unwrap();
        store.delete_room(room.id).unwrap();
        assert!(store.room(room.id).unwrap().is_none());
        assert!(store.worker(queen.id).unwrap().is_none());
        assert!(store.recent_activity(room.id, 10).unwrap().is_empty());
    }

    #[test]
    fn missing_room_reads_as_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.room(999).unwrap().is_none());
    }

    #[test]
    fn duplicate_webhook_token_is_already_exists() {
        let store = Store::open_in_memory().unwrap();
        let mut a = new_room("A");
        a.webhook_token = "aa".repeat(16);
        store.create_room(&a).unwrap();
        let mut b = new_room("B");
        b.webhook_token = "aa".repeat(16);
        let err = store.create_room(&b).unwrap_err();
        assert_eq!(err.kind(), qr_domain::ErrorKind::AlreadyExists);
    }

    #[test]
    fn config_update_persists_quiet_hours() {
        let store = Store::open_in_memory().unwrap();
        let (room, _) = store.create_room(&new_room("R")).unwrap();
        let mut config = room.config.clone();
        config.quiet_hours = Some(qr_domain::QuietHours::parse("22:00", "06:00").unwrap());
        store.set_room_config(room.id, &config).unwrap();
        let back = store.room(room.id).unwrap().unwrap();
        assert_eq!(back.config.quiet_hours, config.quiet_hours);
    }
}
