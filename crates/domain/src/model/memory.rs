//! Memory graph: entities, append-only observations, typed relations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Fact,
    Preference,
    Person,
    Project,
    Event,
}

text_enum!(EntityType {
    Fact => "fact",
    Preference => "preference",
    Person => "person",
    Project => "project",
    Event => "event",
});

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub room_id: Option<i64>,
    pub name: String,
    pub entity_type: EntityType,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub entity_id: i64,
    pub content: String,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub from_entity: i64,
    pub to_entity: i64,
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_text_roundtrip() {
        for t in [
            EntityType::Fact,
            EntityType::Preference,
            EntityType::Person,
            EntityType::Project,
            EntityType::Event,
        ] {
            assert_eq!(EntityType::parse(t.as_str()), Some(t));
        }
        assert_eq!(EntityType::parse("place"), None);
    }
}
