//! Recall: hybrid retrieval over room memory.
//!
//! Full-text scores (weight 0.6) fuse with semantic scores from the
//! MemorySearch collaborator (weight 0.4) by weighted sum per
//! observation. A missing or failing semantic backend leaves FTS to
//! answer alone; recall never fails for that reason.

use std::collections::HashMap;

use qr_domain::Result;

use crate::state::EngineState;

pub const FTS_WEIGHT: f64 = 0.6;
pub const SEMANTIC_WEIGHT: f64 = 0.4;

#[derive(Clone, Debug)]
pub struct RecallHit {
    pub observation_id: i64,
    pub entity_name: String,
    pub content: String,
    pub score: f64,
}

pub async fn recall(
    state: &EngineState,
    room_id: Option<i64>,
    query: &str,
    limit: usize,
) -> Result<Vec<RecallHit>> {
    let fts = state.store.search_observations(room_id, query, limit * 2)?;

    let semantic: HashMap<i64, f64> = match state.memsearch.search(room_id, query, limit * 2).await
    {
        Ok(hits) => hits.into_iter().map(|h| (h.observation_id, h.score)).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "semantic backend unavailable, using fts alone");
            HashMap::new()
        }
    };

    let mut fused: HashMap<i64, RecallHit> = HashMap::new();
    for hit in fts {
        let semantic_score = semantic.get(&hit.observation.id).copied().unwrap_or(0.0);
        fused.insert(
            hit.observation.id,
            RecallHit {
                observation_id: hit.observation.id,
                entity_name: hit.entity.name,
                content: hit.observation.content,
                score: FTS_WEIGHT * hit.score + SEMANTIC_WEIGHT * semantic_score,
            },
        );
    }
    // Semantic-only hits still surface, weighted by their half alone.
    for (observation_id, score) in semantic {
        if fused.contains_key(&observation_id) {
            continue;
        }
        if let Some(observation) = state.store.observation(observation_id)? {
            let entity_name = state
                .store
                .entity(observation.entity_id)?
                .map(|e| e.name)
                .unwrap_or_default();
            fused.insert(
                observation_id,
                RecallHit {
                    observation_id,
                    entity_name,
                    content: observation.content,
                    score: SEMANTIC_WEIGHT * score,
                },
            );
        }
    }

    let mut hits: Vec<RecallHit> = fused.into_values().collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}
