//! Semantic memory boundary: an external embedding index scoring
//! observations against a query. Recall fuses these scores with FTS;
//! when the backend is missing or failing, FTS stands alone.

use qr_domain::Result;

#[derive(Clone, Debug)]
pub struct SemanticHit {
    pub observation_id: i64,
    /// Similarity in 0..1.
    pub score: f64,
}

#[async_trait::async_trait]
pub trait MemorySearch: Send + Sync {
    async fn search(&self, room_id: Option<i64>, query: &str, limit: usize)
        -> Result<Vec<SemanticHit>>;

    /// Index a new observation; best-effort.
    async fn index(&self, observation_id: i64, content: &str) -> Result<()>;
}

pub struct NoopMemorySearch;

#[async_trait::async_trait]
impl MemorySearch for NoopMemorySearch {
    async fn search(
        &self,
        _room_id: Option<i64>,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<SemanticHit>> {
        Ok(Vec::new())
    }

    async fn index(&self, _observation_id: i64, _content: &str) -> Result<()> {
        Ok(())
    }
}
