//! Query path: normalize labels, embed, search, rank, assemble.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use lessondb_core::config::EngineConfig;
use lessondb_core::normalize::{normalize_grade, normalize_subject};
use lessondb_core::traits::Embedder;
use lessondb_core::types::{Candidate, Grade, QueryFilter, RankedResult, Subject};
use lessondb_core::{Error, Result};
use lessondb_vector::StoreClient;

use crate::context::{assemble, ContextWindow};
use crate::rank::Ranker;

const DEDUP_PREFIX_CHARS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest {
    pub query: String,
    /// Raw subject label as supplied by the caller.
    pub subject: Option<String>,
    /// Raw grade label as supplied by the caller.
    pub grade: Option<String>,
    pub limit: Option<usize>,
    /// Opaque; only logged.
    pub requester: Option<String>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Self::default() }
    }

    /// Subject that is canonical (or a known alias) and grade that is not `未知`.
    pub fn filter(&self) -> QueryFilter {
        let subject = self
            .subject
            .as_deref()
            .map(normalize_subject)
            .filter(|s| *s != Subject::Other || self.subject.as_deref() == Some(Subject::Other.as_str()));
        let grade = self.grade.as_deref().map(normalize_grade).filter(|g| *g != Grade::Unknown);
        QueryFilter { subject, grade }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    pub results: Vec<RankedResult>,
    pub context: ContextWindow,
    pub candidates_considered: usize,
    pub widened: bool,
    pub sources: Vec<String>,
    pub average_score: f32,
}

pub struct RetrievalEngine {
    store: Arc<StoreClient>,
    embedder: Arc<dyn Embedder>,
    ranker: Ranker,
    config: Arc<EngineConfig>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<StoreClient>, embedder: Arc<dyn Embedder>, config: Arc<EngineConfig>) -> Result<Self> {
        if embedder.dim() != config.embedding.dimensions {
            return Err(Error::DimensionMismatch {
                id: "<embedder>".into(),
                expected: config.embedding.dimensions,
                actual: embedder.dim(),
            });
        }
        let ranker = Ranker::new(&config.search);
        Ok(Self { store, embedder, ranker, config })
    }

    pub fn ranker(&self) -> &Ranker {
        &self.ranker
    }

    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalOutcome> {
        let filter = request.filter();
        let requester = request.requester.as_deref().unwrap_or("-");
        if self.store.is_degraded() {
            return Err(Error::StoreDegraded);
        }
        if request.query.trim().is_empty() {
            debug!(requester, "Empty query text");
            return Ok(self.outcome(Vec::new(), 0, false));
        }

        let vector = self.embed_query(&request.query).await?;
        let top_k = self.config.search.max_limit;

        let mut candidates = dedupe(self.store.query(&vector, top_k, &filter).await?);
        let mut ranked = self.ranker.rank(&candidates, request.limit);
        let mut widened = false;

        if ranked.is_empty() && self.config.search.widen_grade_on_empty {
            if let Some(grade) = filter.grade {
                let wider = QueryFilter { subject: filter.subject, grade: None };
                let nearby: Vec<Candidate> = self
                    .store
                    .query(&vector, top_k, &wider)
                    .await?
                    .into_iter()
                    .filter(|c| c.chunk.grade.is_adjacent(grade))
                    .collect();
                candidates = dedupe(nearby);
                ranked = self.ranker.rank(&candidates, request.limit);
                widened = true;
                debug!(requester, grade = %grade, found = ranked.len(), "Widened to adjacent grades");
            }
        }

        let outcome = self.outcome(ranked, candidates.len(), widened);
        info!(
            requester,
            subject = ?filter.subject,
            grade = ?filter.grade,
            candidates = outcome.candidates_considered,
            results = outcome.results.len(),
            tokens = outcome.context.token_count,
            widened,
            "Retrieved lesson material"
        );
        Ok(outcome)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        tokio::task::spawn_blocking(move || embedder.embed_text(&text))
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?
    }

    fn outcome(&self, results: Vec<RankedResult>, considered: usize, widened: bool) -> RetrievalOutcome {
        let context = assemble(&results, self.config.search.context_max_tokens);
        let mut seen = HashSet::new();
        let sources = results
            .iter()
            .map(|r| r.chunk.source.clone())
            .filter(|s| seen.insert(s.clone()))
            .collect();
        let average_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.combined_score).sum::<f32>() / results.len() as f32
        };
        RetrievalOutcome { results, context, candidates_considered: considered, widened, sources, average_score }
    }
}

/// Keep the most similar candidate among those sharing the same leading text.
fn dedupe(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    let mut seen = HashSet::new();
    candidates.retain(|c| {
        let key: String = c.chunk.text.chars().take(DEDUP_PREFIX_CHARS).collect();
        seen.insert(key)
    });
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadStatus {
    Ok,
    NoMaterial,
    Unavailable,
}

/// What the lesson-planning collaborator receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    pub status: PayloadStatus,
    pub degraded: bool,
    pub context: String,
    pub sources: Vec<String>,
    pub result_count: usize,
    pub skipped: usize,
    pub token_count: usize,
    pub average_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContextPayload {
    pub fn from_result(result: &Result<RetrievalOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                status: if outcome.results.is_empty() { PayloadStatus::NoMaterial } else { PayloadStatus::Ok },
                degraded: false,
                context: outcome.context.render(),
                sources: outcome.sources.clone(),
                result_count: outcome.results.len(),
                skipped: outcome.context.skipped_ids.len(),
                token_count: outcome.context.token_count,
                average_score: outcome.average_score,
                error: None,
            },
            Err(err) => Self {
                status: PayloadStatus::Unavailable,
                degraded: matches!(err, Error::StoreDegraded),
                context: String::new(),
                sources: Vec::new(),
                result_count: 0,
                skipped: 0,
                token_count: 0,
                average_score: 0.0,
                error: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessondb_core::types::DocumentChunk;

    fn cand(id: &str, text: &str, similarity: f32) -> Candidate {
        Candidate {
            chunk: DocumentChunk {
                id: id.into(),
                text: text.into(),
                subject: Subject::Math,
                grade: Grade::Seven,
                quality_score: 0.5,
                size_bytes: 1,
                source: "s.json".into(),
                chunk_index: 0,
                embedding: None,
            },
            similarity,
        }
    }

    #[test]
    fn request_filter_drops_unusable_labels() {
        let mut req = RetrievalRequest::new("方程");
        req.subject = Some("Math".into());
        req.grade = Some("高一".into());
        assert!(req.filter().is_empty());

        req.subject = Some("道德与法治".into());
        req.grade = Some("初二".into());
        let f = req.filter();
        assert_eq!(f.subject, Some(Subject::Politics));
        assert_eq!(f.grade, Some(Grade::Eight));

        req.subject = Some("其他".into());
        assert_eq!(req.filter().subject, Some(Subject::Other));
    }

    #[test]
    fn dedupe_keeps_best_of_shared_prefix() {
        let long = "甲".repeat(120);
        let out = dedupe(vec![
            cand("low", &format!("{long}乙"), 0.4),
            cand("high", &format!("{long}丙"), 0.8),
            cand("other", "不同的内容", 0.5),
        ]);
        let ids: Vec<_> = out.iter().map(|c| c.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "other"]);
    }

    #[test]
    fn payload_statuses() {
        let empty: Result<RetrievalOutcome> = Ok(RetrievalOutcome::default());
        assert_eq!(ContextPayload::from_result(&empty).status, PayloadStatus::NoMaterial);

        let degraded: Result<RetrievalOutcome> = Err(Error::StoreDegraded);
        let p = ContextPayload::from_result(&degraded);
        assert_eq!(p.status, PayloadStatus::Unavailable);
        assert!(p.degraded);

        let down: Result<RetrievalOutcome> = Err(Error::StoreTimeout { timeout_ms: 5000 });
        let p = ContextPayload::from_result(&down);
        assert_eq!(p.status, PayloadStatus::Unavailable);
        assert!(!p.degraded);
    }
}
