use async_trait::async_trait;

use lessondb_core::config::{DistanceMetric, EngineConfig};
use lessondb_core::types::{Candidate, DocumentChunk, QueryFilter};
use lessondb_core::Result;

/// Name, metric and width of the collection every call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub metric: DistanceMetric,
    pub description: String,
    pub dimensions: usize,
}

impl CollectionSpec {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            name: config.store.collection.name.clone(),
            metric: config.store.collection.metric,
            description: config.store.collection.description.clone(),
            dimensions: config.embedding.dimensions,
        }
    }
}

/// Storage backend seam. Implementations do one attempt per call; timeouts,
/// retries and the degraded gate live in [`crate::client::StoreClient`].
///
/// Errors must be classified: connection failures as `StoreUnavailable`,
/// malformed responses and rejected requests as `StoreProtocolError`.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn heartbeat(&self) -> Result<()>;

    /// Create the collection if missing, otherwise attach to it.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Insert-or-replace by id. Returns how many of `chunks` the store holds afterwards.
    async fn upsert(&self, spec: &CollectionSpec, chunks: &[DocumentChunk]) -> Result<usize>;

    /// Up to `top_k` nearest chunks, most similar first. Similarity is `1 - cosine distance`.
    async fn query(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<Candidate>>;

    async fn count(&self, spec: &CollectionSpec) -> Result<usize>;

    /// Remove every chunk, keeping the collection.
    async fn reset(&self, spec: &CollectionSpec) -> Result<()>;
}
