use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use lessondb_core::config::EngineConfig;
use lessondb_core::embed::HashEmbedder;
use lessondb_core::loader::LoadCursor;
use lessondb_core::traits::Embedder;
use lessondb_core::types::{Candidate, DocumentChunk, Grade, QueryFilter};
use lessondb_core::{Error, Result};
use lessondb_retrieval::rank::cosine_similarity;
use lessondb_retrieval::{ContextPayload, Ingestor, PayloadStatus, RetrievalEngine, RetrievalRequest};
use lessondb_vector::health::{health_channel, HealthStatus};
use lessondb_vector::{CollectionSpec, StoreClient, VectorBackend};

#[derive(Default)]
struct MemoryBackend {
    rows: Mutex<Vec<DocumentChunk>>,
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_collection(&self, _spec: &CollectionSpec) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _spec: &CollectionSpec, chunks: &[DocumentChunk]) -> Result<usize> {
        let mut rows = self.rows.lock().unwrap();
        for c in chunks {
            rows.retain(|r| r.id != c.id);
            rows.push(c.clone());
        }
        Ok(chunks.len())
    }

    async fn query(
        &self,
        _spec: &CollectionSpec,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<Candidate>> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<Candidate> = rows
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| Candidate {
                similarity: cosine_similarity(vector, c.embedding.as_deref().unwrap_or_default()),
                chunk: DocumentChunk { embedding: None, ..c.clone() },
            })
            .collect();
        out.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        out.truncate(top_k);
        Ok(out)
    }

    async fn count(&self, _spec: &CollectionSpec) -> Result<usize> {
        Ok(self.rows.lock().unwrap().len())
    }

    async fn reset(&self, _spec: &CollectionSpec) -> Result<()> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

fn setup(config: &EngineConfig) -> (Arc<StoreClient>, Arc<dyn Embedder>) {
    let (_tx, rx) = health_channel();
    let store = StoreClient::new(
        Arc::new(MemoryBackend::default()),
        CollectionSpec::from_config(config),
        config.health_check.clone(),
        rx,
    );
    let embedder: Arc<dyn Embedder> =
        Arc::new(HashEmbedder::new(config.embedding.dimensions, config.embedding.max_tokens));
    (Arc::new(store), embedder)
}

fn write_corpus(dir: &Path) {
    let math: Vec<_> = (1..=4)
        .map(|i| json!({ "id": format!("m{i}"), "content": format!("一元一次方程的解法 第{i}课"), "qualityScore": 0.5 + 0.1 * i as f64 }))
        .collect();
    fs::write(dir.join("八年级数学.json"), serde_json::to_vec(&math).unwrap()).unwrap();
    let bio = json!({ "chunks": [
        { "id": "b1", "content": "光合作用与叶绿体", "grade": "七年级", "subject": "生物" },
        { "id": "low", "content": "一元一次方程的解法", "qualityScore": 0.1 }
    ]});
    fs::write(dir.join("misc.json"), serde_json::to_vec(&bio).unwrap()).unwrap();
}

async fn ingested(config: &EngineConfig) -> (TempDir, Arc<StoreClient>, Arc<dyn Embedder>) {
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let (store, embedder) = setup(config);
    let ingestor = Ingestor::new(config, Arc::clone(&store), Arc::clone(&embedder));
    let report = ingestor.ingest_all(tmp.path(), LoadCursor::default(), |_, _| Ok(())).await.unwrap();
    assert_eq!(report.summary.accepted, 5);
    assert_eq!(report.summary.below_quality, 1);
    assert_eq!(report.upserted, 5);
    (tmp, store, embedder)
}

#[tokio::test]
async fn ingest_then_retrieve_with_grade_filter() {
    let config = Arc::new(EngineConfig::default());
    let (_tmp, store, embedder) = ingested(&config).await;
    assert_eq!(store.count().await.unwrap(), 5);
    let engine = RetrievalEngine::new(store, embedder, Arc::clone(&config)).unwrap();

    let mut req = RetrievalRequest::new("一元一次方程的解法");
    req.subject = Some("数学".into());
    req.grade = Some("初二".into());
    req.requester = Some("teacher-42".into());
    let outcome = engine.retrieve(&req).await.unwrap();

    assert!(!outcome.widened);
    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.results.iter().all(|r| r.chunk.grade == Grade::Eight));
    assert!(outcome.results.windows(2).all(|w| w[0].combined_score >= w[1].combined_score));
    assert_eq!(outcome.sources, vec!["八年级数学.json".to_string()]);
    assert!(outcome.context.render().starts_with("[来源: 八年级数学.json]"));
    assert!(outcome.context.token_count <= config.search.context_max_tokens);

    let payload = ContextPayload::from_result(&Ok(outcome));
    assert_eq!(payload.status, PayloadStatus::Ok);
    assert_eq!(payload.result_count, 4);
}

#[tokio::test]
async fn empty_grade_widens_to_adjacent_grades() {
    let config = Arc::new(EngineConfig::default());
    let (_tmp, store, embedder) = ingested(&config).await;
    let engine = RetrievalEngine::new(store, embedder, Arc::clone(&config)).unwrap();

    let mut req = RetrievalRequest::new("一元一次方程的解法");
    req.subject = Some("数学".into());
    req.grade = Some("九年级".into());
    let outcome = engine.retrieve(&req).await.unwrap();
    assert!(outcome.widened);
    assert!(!outcome.results.is_empty());
    assert!(outcome.results.iter().all(|r| r.chunk.grade == Grade::Eight));

    req.grade = Some("一年级".into());
    let outcome = engine.retrieve(&req).await.unwrap();
    assert!(outcome.widened);
    assert!(outcome.results.is_empty());
    assert_eq!(ContextPayload::from_result(&Ok(outcome)).status, PayloadStatus::NoMaterial);
}

#[tokio::test]
async fn widening_can_be_disabled() {
    let mut config = EngineConfig::default();
    config.search.widen_grade_on_empty = false;
    let config = Arc::new(config);
    let (_tmp, store, embedder) = ingested(&config).await;
    let engine = RetrievalEngine::new(store, embedder, Arc::clone(&config)).unwrap();

    let mut req = RetrievalRequest::new("一元一次方程的解法");
    req.grade = Some("九年级".into());
    let outcome = engine.retrieve(&req).await.unwrap();
    assert!(!outcome.widened);
    assert!(outcome.results.is_empty());
}

#[tokio::test]
async fn limit_and_budget_are_honoured() {
    let mut config = EngineConfig::default();
    config.search.context_max_tokens = 25;
    let config = Arc::new(config);
    let (_tmp, store, embedder) = ingested(&config).await;
    let engine = RetrievalEngine::new(store, embedder, Arc::clone(&config)).unwrap();

    let mut req = RetrievalRequest::new("一元一次方程的解法");
    req.limit = Some(3);
    let outcome = engine.retrieve(&req).await.unwrap();
    assert_eq!(outcome.results.len(), 3);
    // Each math chunk costs 12 tokens, so two fit into 25.
    assert_eq!(outcome.context.chunk_ids.len(), 2);
    assert_eq!(outcome.context.skipped_ids.len(), 1);
    assert!(outcome.context.token_count <= 25);
}

#[tokio::test]
async fn degraded_store_maps_to_unavailable_payload() {
    let config = Arc::new(EngineConfig::default());
    let (tx, rx) = health_channel();
    tx.send_replace(HealthStatus::Degraded);
    let store = Arc::new(StoreClient::new(
        Arc::new(MemoryBackend::default()),
        CollectionSpec::from_config(&config),
        config.health_check.clone(),
        rx,
    ));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(384, 512));
    let engine = RetrievalEngine::new(store, embedder, Arc::clone(&config)).unwrap();

    let result = engine.retrieve(&RetrievalRequest::new("勾股定理")).await;
    assert!(matches!(result, Err(Error::StoreDegraded)));
    let payload = ContextPayload::from_result(&result);
    assert_eq!(payload.status, PayloadStatus::Unavailable);
    assert!(payload.degraded);

    let blank = engine.retrieve(&RetrievalRequest::new("   ")).await;
    assert!(matches!(blank, Err(Error::StoreDegraded)));
    assert_eq!(ContextPayload::from_result(&blank).status, PayloadStatus::Unavailable);
}

#[tokio::test]
async fn blank_query_on_healthy_store_is_no_material() {
    let config = Arc::new(EngineConfig::default());
    let (store, embedder) = setup(&config);
    let engine = RetrievalEngine::new(store, embedder, Arc::clone(&config)).unwrap();
    let result = engine.retrieve(&RetrievalRequest::new("")).await;
    assert_eq!(ContextPayload::from_result(&result).status, PayloadStatus::NoMaterial);
}

#[tokio::test]
async fn embedder_width_must_match_collection() {
    let config = Arc::new(EngineConfig::default());
    let (store, _) = setup(&config);
    let narrow: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(128, 512));
    let err = RetrievalEngine::new(Arc::clone(&store), Arc::clone(&narrow), Arc::clone(&config)).err().unwrap();
    assert!(matches!(err, Error::DimensionMismatch { expected: 384, actual: 128, .. }));

    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let ingestor = Ingestor::new(&config, store, narrow);
    let err = ingestor.ingest_batch(tmp.path(), LoadCursor::default()).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[tokio::test]
async fn ingest_all_reports_each_batch_and_stops_on_callback_error() {
    let mut config = EngineConfig::default();
    config.documents.batch_size = 2;
    let tmp = TempDir::new().unwrap();
    write_corpus(tmp.path());
    let (store, embedder) = setup(&config);
    let ingestor = Ingestor::new(&config, store, embedder);

    let mut cursors = Vec::new();
    let total = ingestor
        .ingest_all(tmp.path(), LoadCursor::default(), |report, next| {
            assert!(report.summary.examined <= 2);
            cursors.push(next);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(total.batches, 3);
    assert_eq!(total.summary.examined, 6);
    assert_eq!(cursors.last(), Some(&None));

    let mut calls = 0;
    let err = ingestor
        .ingest_all(tmp.path(), LoadCursor::default(), |_, _| {
            calls += 1;
            Err(Error::Io(std::io::Error::other("disk full")))
        })
        .await
        .unwrap_err();
    assert_eq!(calls, 1);
    assert!(matches!(err, Error::Io(_)));
}
