//! Activity trail and room mail.

use chrono::Utc;
use rusqlite::Row;

use qr_domain::model::{ActivityEvent, Message};
use qr_domain::{Error, Result};

use crate::{map_sqlite, parse_ts, ts, Store};

fn row_to_activity(row: &Row) -> rusqlite::Result<ActivityEvent> {
    let payload: Option<String> = row.get("payload")?;
    let created_at: String = row.get("created_at")?;
    Ok(ActivityEvent {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        event_type: row.get("event_type")?,
        summary: row.get("summary")?,
        worker_id: row.get("worker_id")?,
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: parse_ts(&created_at),
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
    let created_at: String = row.get("created_at")?;
    Ok(Message {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        sender: row.get("sender")?,
        recipient_worker_id: row.get("recipient_worker_id")?,
        body: row.get("body")?,
        read: row.get("read")?,
        created_at: parse_ts(&created_at),
    })
}

impl Store {
    pub fn record_activity(
        &self,
        room_id: i64,
        event_type: &str,
        summary: &str,
        worker_id: Option<i64>,
        payload: Option<&serde_json::Value>,
    ) -> Result<()> {
        let payload_json = payload
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::internal(format!("activity payload: {e}")))?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO activity (room_id, event_type, summary, worker_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![room_id, event_type, summary, worker_id, payload_json, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(())
        })
    }

    pub fn recent_activity(&self, room_id: i64, limit: usize) -> Result<Vec<ActivityEvent>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, room_id, event_type, summary, worker_id, payload, created_at
                     FROM activity WHERE room_id = ?1 ORDER BY id DESC LIMIT ?2",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map(rusqlite::params![room_id, limit as i64], row_to_activity)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for a in mapped {
                out.push(a.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    // ── Mail ──────────────────────────────────────────────────────────

    /// `recipient_worker_id = None` addresses the keeper.
    pub fn send_room_message(
        &self,
        room_id: i64,
        sender: &str,
        recipient_worker_id: Option<i64>,
        body: &str,
    ) -> Result<Message> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO messages (room_id, sender, recipient_worker_id, body, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![room_id, sender, recipient_worker_id, body, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.read(|c| {
            c.query_row(
                "SELECT id, room_id, sender, recipient_worker_id, body, read, created_at
                 FROM messages WHERE id = ?1",
                [id],
                row_to_message,
            )
            .map_err(map_sqlite)
        })
    }

    /// Unread mail addressed to the worker, oldest first.
    pub fn unread_messages_for_worker(&self, room_id: i64, worker_id: i64) -> Result<Vec<Message>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, room_id, sender, recipient_worker_id, body, read, created_at
                     FROM messages
                     WHERE room_id = ?1 AND recipient_worker_id = ?2 AND read = 0
                     ORDER BY id",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map(rusqlite::params![room_id, worker_id], row_to_message)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for m in mapped {
                out.push(m.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn unread_keeper_messages(&self, room_id: i64) -> Result<Vec<Message>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, room_id, sender, recipient_worker_id, body, read, created_at
                     FROM messages
                     WHERE room_id = ?1 AND recipient_worker_id IS NULL AND read = 0
                     ORDER BY id",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt.query_map([room_id], row_to_message).map_err(map_sqlite)?;
            let mut out = Vec::new();
            for m in mapped {
                out.push(m.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn mark_messages_read(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.write(|tx| {
            for id in ids {
                tx.execute("UPDATE messages SET read = 1 WHERE id = ?1", [id])
                    .map_err(map_sqlite)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::seeded;

    #[test]
    fn activity_is_append_only_newest_first() {
        let (store, room, queen) = seeded("R");
        store
            .record_activity(room.id, "cycle", "queen thought", Some(queen.id), None)
            .unwrap();
        store
            .record_activity(
                room.id,
                "decision",
                "proposed buy server",
                Some(queen.id),
                Some(&serde_json::json!({"decision_id": 1})),
            )
            .unwrap();
        let events = store.recent_activity(room.id, 10).unwrap();
        // Room birth wrote one "system" entry already.
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "decision");
        assert!(events[0].payload.is_some());
    }

    #[test]
    fn mail_read_cycle() {
        let (store, room, queen) = seeded("R");
        let m = store
            .send_room_message(room.id, "keeper", Some(queen.id), "focus on pricing")
            .unwrap();
        assert!(!m.read);

        let unread = store.unread_messages_for_worker(room.id, queen.id).unwrap();
        assert_eq!(unread.len(), 1);

        store.mark_messages_read(&[m.id]).unwrap();
        assert!(store
            .unread_messages_for_worker(room.id, queen.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn keeper_mail_has_null_recipient() {
        let (store, room, queen) = seeded("R");
        store
            .send_room_message(room.id, &format!("worker:{}", queen.id), None, "status report")
            .unwrap();
        let keeper_mail = store.unread_keeper_messages(room.id).unwrap();
        assert_eq!(keeper_mail.len(), 1);
        assert!(store
            .unread_messages_for_worker(room.id, queen.id)
            .unwrap()
            .is_empty());
    }
}
