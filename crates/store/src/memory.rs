//! Memory graph repository: entities, observations, relations, and the
//! full-text half of recall.
//!
//! Observations are indexed in an FTS5 external-content table kept in
//! step by triggers. Queries are term-quoted so user text can never be
//! misread as FTS syntax; if FTS still refuses, a LIKE scan answers
//! instead so recall degrades rather than fails.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use qr_domain::model::{Entity, EntityType, Observation, Relation};
use qr_domain::{Error, Result};

use crate::{col_enum, map_sqlite, parse_ts, ts, Store};

/// One full-text hit: the observation, its entity, and a 0..1 score.
#[derive(Clone, Debug)]
pub struct MemoryHit {
    pub entity: Entity,
    pub observation: Observation,
    pub score: f64,
}

const ENTITY_COLS: &str = "id, room_id, name, entity_type, category, created_at";

fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
    let entity_type: String = row.get("entity_type")?;
    let created_at: String = row.get("created_at")?;
    Ok(Entity {
        id: row.get("id")?,
        room_id: row.get("room_id")?,
        name: row.get("name")?,
        entity_type: col_enum(EntityType::parse, &entity_type, "entity type")?,
        category: row.get("category")?,
        created_at: parse_ts(&created_at),
    })
}

/// Quote every whitespace-separated term so FTS5 treats the query as
/// plain words (`"fts" "syntax"` instead of operators).
fn fts_quote(query: &str) -> String {
    query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Store {
    /// Create an entity, or return the existing one with the same name in
    /// the same room.
    pub fn upsert_entity(
        &self,
        room_id: Option<i64>,
        name: &str,
        entity_type: EntityType,
        category: Option<&str>,
    ) -> Result<Entity> {
        if let Some(existing) = self.entity_by_name(room_id, name)? {
            return Ok(existing);
        }
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO entities (room_id, name, entity_type, category, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(room_id, name) DO NOTHING",
                rusqlite::params![room_id, name, entity_type.as_str(), category, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            tx.query_row(
                "SELECT id FROM entities WHERE room_id IS ?1 AND name = ?2",
                rusqlite::params![room_id, name],
                |r| r.get(0),
            )
            .map_err(map_sqlite)
        })?;
        self.entity(id)?
            .ok_or_else(|| Error::internal("entity vanished after upsert"))
    }

    pub fn entity(&self, id: i64) -> Result<Option<Entity>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {ENTITY_COLS} FROM entities WHERE id = ?1"),
                [id],
                row_to_entity,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn entity_by_name(&self, room_id: Option<i64>, name: &str) -> Result<Option<Entity>> {
        self.read(|c| {
            c.query_row(
                &format!("SELECT {ENTITY_COLS} FROM entities WHERE room_id IS ?1 AND name = ?2"),
                rusqlite::params![room_id, name],
                row_to_entity,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn add_observation(
        &self,
        entity_id: i64,
        content: &str,
        source: Option<&str>,
    ) -> Result<Observation> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO observations (entity_id, content, source, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![entity_id, content, source, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.observation(id)?
            .ok_or_else(|| Error::internal("observation vanished after insert"))
    }

    pub fn observation(&self, id: i64) -> Result<Option<Observation>> {
        self.read(|c| {
            c.query_row(
                "SELECT id, entity_id, content, source, created_at
                 FROM observations WHERE id = ?1",
                [id],
                row_to_observation,
            )
            .optional()
            .map_err(map_sqlite)
        })
    }

    pub fn observations_for_entity(&self, entity_id: i64) -> Result<Vec<Observation>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, entity_id, content, source, created_at
                     FROM observations WHERE entity_id = ?1 ORDER BY id",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map([entity_id], row_to_observation)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for o in mapped {
                out.push(o.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    pub fn add_relation(
        &self,
        from_entity: i64,
        to_entity: i64,
        relation_type: &str,
    ) -> Result<Relation> {
        let id = self.write(|tx| {
            tx.execute(
                "INSERT INTO relations (from_entity, to_entity, relation_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![from_entity, to_entity, relation_type, ts(Utc::now())],
            )
            .map_err(map_sqlite)?;
            Ok(tx.last_insert_rowid())
        })?;
        self.read(|c| {
            c.query_row(
                "SELECT id, from_entity, to_entity, relation_type, created_at
                 FROM relations WHERE id = ?1",
                [id],
                row_to_relation,
            )
            .map_err(map_sqlite)
        })
    }

    pub fn relations_for_entity(&self, entity_id: i64) -> Result<Vec<Relation>> {
        self.read(|c| {
            let mut stmt = c
                .prepare(
                    "SELECT id, from_entity, to_entity, relation_type, created_at
                     FROM relations WHERE from_entity = ?1 OR to_entity = ?1 ORDER BY id",
                )
                .map_err(map_sqlite)?;
            let mapped = stmt
                .query_map([entity_id], row_to_relation)
                .map_err(map_sqlite)?;
            let mut out = Vec::new();
            for r in mapped {
                out.push(r.map_err(map_sqlite)?);
            }
            Ok(out)
        })
    }

    /// Deleting an entity cascades to its observations and both-direction
    /// relations through the schema's foreign keys.
    pub fn delete_entity(&self, id: i64) -> Result<()> {
        self.write(|tx| {
            let n = tx
                .execute("DELETE FROM entities WHERE id = ?1", [id])
                .map_err(map_sqlite)?;
            if n == 0 {
                return Err(Error::not_found(format!("entity {id}")));
            }
            Ok(())
        })
    }

    /// Full-text search over observations, scoped to a room's memory plus
    /// global entities. Scores are mapped into 0..1 from BM25 rank.
    pub fn search_observations(
        &self,
        room_id: Option<i64>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let quoted = fts_quote(query);
        let fts = self.read(|c| fts_search(c, room_id, &quoted, limit));
        match fts {
            Ok(hits) => Ok(hits),
            Err(_) => self.read(|c| like_search(c, room_id, query, limit)),
        }
    }
}

fn row_to_observation(row: &Row) -> rusqlite::Result<Observation> {
    let created_at: String = row.get("created_at")?;
    Ok(Observation {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        content: row.get("content")?,
        source: row.get("source")?,
        created_at: parse_ts(&created_at),
    })
}

fn row_to_relation(row: &Row) -> rusqlite::Result<Relation> {
    let created_at: String = row.get("created_at")?;
    Ok(Relation {
        id: row.get("id")?,
        from_entity: row.get("from_entity")?,
        to_entity: row.get("to_entity")?,
        relation_type: row.get("relation_type")?,
        created_at: parse_ts(&created_at),
    })
}

fn hit_from_row(row: &Row) -> rusqlite::Result<(Observation, Entity, f64)> {
    let obs = Observation {
        id: row.get("oid")?,
        entity_id: row.get("entity_id")?,
        content: row.get("content")?,
        source: row.get("source")?,
        created_at: parse_ts(&row.get::<_, String>("ocreated")?),
    };
    let entity_type: String = row.get("entity_type")?;
    let entity = Entity {
        id: row.get("eid")?,
        room_id: row.get("room_id")?,
        name: row.get("name")?,
        entity_type: col_enum(EntityType::parse, &entity_type, "entity type")?,
        category: row.get("category")?,
        created_at: parse_ts(&row.get::<_, String>("ecreated")?),
    };
    let score: f64 = row.get("score")?;
    Ok((obs, entity, score))
}

fn collect_hits(
    rows: impl Iterator<Item = rusqlite::Result<(Observation, Entity, f64)>>,
) -> Result<Vec<MemoryHit>> {
    let mut out = Vec::new();
    for row in rows {
        let (observation, entity, score) = row.map_err(map_sqlite)?;
        out.push(MemoryHit {
            entity,
            observation,
            score,
        });
    }
    Ok(out)
}

fn fts_search(
    c: &Connection,
    room_id: Option<i64>,
    quoted_query: &str,
    limit: usize,
) -> Result<Vec<MemoryHit>> {
    let mut stmt = c
        .prepare(
            "SELECT o.id AS oid, o.entity_id, o.content, o.source, o.created_at AS ocreated,
                    e.id AS eid, e.room_id, e.name, e.entity_type, e.category,
                    e.created_at AS ecreated,
                    1.0 / (1.0 + bm25(observations_fts)) AS score
             FROM observations_fts f
             JOIN observations o ON o.id = f.rowid
             JOIN entities e ON e.id = o.entity_id
             WHERE observations_fts MATCH ?1
               AND (e.room_id IS ?2 OR e.room_id IS NULL)
             ORDER BY score DESC
             LIMIT ?3",
        )
        .map_err(map_sqlite)?;
    let mapped = stmt
        .query_map(
            rusqlite::params![quoted_query, room_id, limit as i64],
            hit_from_row,
        )
        .map_err(map_sqlite)?;
    collect_hits(mapped)
}

fn like_search(
    c: &Connection,
    room_id: Option<i64>,
    query: &str,
    limit: usize,
) -> Result<Vec<MemoryHit>> {
    let pattern = format!("%{}%", query.trim());
    let mut stmt = c
        .prepare(
            "SELECT o.id AS oid, o.entity_id, o.content, o.source, o.created_at AS ocreated,
                    e.id AS eid, e.room_id, e.name, e.entity_type, e.category,
                    e.created_at AS ecreated,
                    0.5 AS score
             FROM observations o
             JOIN entities e ON e.id = o.entity_id
             WHERE o.content LIKE ?1
               AND (e.room_id IS ?2 OR e.room_id IS NULL)
             ORDER BY o.id DESC
             LIMIT ?3",
        )
        .map_err(map_sqlite)?;
    let mapped = stmt
        .query_map(rusqlite::params![pattern, room_id, limit as i64], hit_from_row)
        .map_err(map_sqlite)?;
    collect_hits(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::seeded;

    #[test]
    fn upsert_entity_is_stable() {
        let (store, room, _) = seeded("R");
        let a = store
            .upsert_entity(Some(room.id), "deploy pipeline", EntityType::Project, None)
            .unwrap();
        let b = store
            .upsert_entity(Some(room.id), "deploy pipeline", EntityType::Project, None)
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn fts_finds_observation_content() {
        let (store, room, _) = seeded("R");
        let e = store
            .upsert_entity(Some(room.id), "server", EntityType::Fact, None)
            .unwrap();
        store
            .add_observation(e.id, "the staging server runs debian", Some("cycle"))
            .unwrap();
        store
            .add_observation(e.id, "budget approved for q3", Some("cycle"))
            .unwrap();

        let hits = store
            .search_observations(Some(room.id), "staging debian", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].observation.content.contains("staging"));
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
    }

    #[test]
    fn search_is_room_scoped() {
        let (store, room, _) = seeded("R");
        let other = store.create_room(&crate::testutil::new_room("Other")).unwrap().0;
        let mine = store
            .upsert_entity(Some(room.id), "ours", EntityType::Fact, None)
            .unwrap();
        let theirs = store
            .upsert_entity(Some(other.id), "theirs", EntityType::Fact, None)
            .unwrap();
        store.add_observation(mine.id, "alpha secret plan", None).unwrap();
        store.add_observation(theirs.id, "alpha secret plan", None).unwrap();

        let hits = store.search_observations(Some(room.id), "alpha", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.id, mine.id);
    }

    #[test]
    fn operator_looking_query_does_not_error() {
        let (store, room, _) = seeded("R");
        let e = store
            .upsert_entity(Some(room.id), "notes", EntityType::Fact, None)
            .unwrap();
        store.add_observation(e.id, "a AND b OR c", None).unwrap();
        // Raw FTS would parse AND/OR as operators; quoting must neutralize them.
        let hits = store.search_observations(Some(room.id), "AND", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn entity_delete_cascades_observations_and_relations() {
        let (store, room, _) = seeded("R");
        let a = store
            .upsert_entity(Some(room.id), "a", EntityType::Person, None)
            .unwrap();
        let b = store
            .upsert_entity(Some(room.id), "b", EntityType::Person, None)
            .unwrap();
        store.add_observation(a.id, "works on infra", None).unwrap();
        store.add_relation(a.id, b.id, "reports_to").unwrap();
        store.add_relation(b.id, a.id, "mentors").unwrap();

        store.delete_entity(a.id).unwrap();
        assert!(store.observations_for_entity(a.id).unwrap().is_empty());
        assert!(store.relations_for_entity(b.id).unwrap().is_empty());
        // And the index no longer matches the deleted row.
        assert!(store
            .search_observations(Some(room.id), "infra", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let (store, room, _) = seeded("R");
        assert!(store.search_observations(Some(room.id), "  ", 10).unwrap().is_empty());
    }
}
