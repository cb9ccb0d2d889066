//! Combined-score ranking of store candidates.

use std::cmp::Ordering;

use lessondb_core::config::SearchConfig;
use lessondb_core::types::{Candidate, DocumentChunk, RankedResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Ranker {
    min_similarity: f32,
    similarity_weight: f32,
    quality_weight: f32,
    default_limit: usize,
    max_limit: usize,
}

impl Ranker {
    /// `config` is expected to have passed `EngineConfig::validate`.
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            min_similarity: config.min_similarity_threshold,
            similarity_weight: config.similarity_weight,
            quality_weight: config.quality_score_weight,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    /// Requested limit with the default applied, clamped to `[1, max_limit]`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).clamp(1, self.max_limit.max(1))
    }

    pub fn combined_score(&self, similarity: f32, quality: f32) -> f32 {
        self.similarity_weight * similarity + self.quality_weight * quality
    }

    /// Floor, score, order and truncate. Pure: the same input always gives the same output.
    pub fn rank(&self, candidates: &[Candidate], requested_limit: Option<usize>) -> Vec<RankedResult> {
        let mut ranked: Vec<RankedResult> = candidates
            .iter()
            // NaN fails this comparison and is dropped with the rest.
            .filter(|c| c.similarity >= self.min_similarity)
            .map(|c| RankedResult {
                chunk: c.chunk.clone(),
                similarity: c.similarity,
                quality_score: c.chunk.quality_score,
                combined_score: self.combined_score(c.similarity, c.chunk.quality_score),
            })
            .collect();
        ranked.sort_by(compare);
        ranked.truncate(self.effective_limit(requested_limit));
        ranked
    }

    /// Rank chunks that carry embeddings by their cosine similarity to `query`.
    /// Chunks without an embedding are ignored.
    pub fn rank_by_embedding(
        &self,
        query: &[f32],
        chunks: &[DocumentChunk],
        requested_limit: Option<usize>,
    ) -> Vec<RankedResult> {
        let candidates: Vec<Candidate> = chunks
            .iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_deref()?;
                Some(Candidate { chunk: chunk.clone(), similarity: cosine_similarity(query, embedding) })
            })
            .collect();
        self.rank(&candidates, requested_limit)
    }
}

/// Combined desc, then similarity desc, then id asc.
fn compare(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.combined_score
        .total_cmp(&a.combined_score)
        .then_with(|| b.similarity.total_cmp(&a.similarity))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Zero when either vector has no magnitude or the widths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lessondb_core::types::{Grade, Subject};
    use proptest::prelude::*;

    fn candidate(id: &str, similarity: f32, quality: f32) -> Candidate {
        Candidate {
            chunk: DocumentChunk {
                id: id.into(),
                text: format!("chunk {id}"),
                subject: Subject::Math,
                grade: Grade::Seven,
                quality_score: quality,
                size_bytes: 10,
                source: "s.json".into(),
                chunk_index: 0,
                embedding: None,
            },
            similarity,
        }
    }

    fn ranker() -> Ranker {
        Ranker::new(&SearchConfig::default())
    }

    #[test]
    fn combined_score_scenario() {
        let out = ranker().rank(&[candidate("b", 0.31, 0.2), candidate("a", 0.9, 0.8)], None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.id, "a");
        assert!((out[0].combined_score - 0.87).abs() < 1e-6);
        assert!((out[1].combined_score - 0.277).abs() < 1e-6);
    }

    #[test]
    fn similarity_floor_excludes_regardless_of_quality() {
        let out = ranker().rank(&[candidate("x", 0.29, 1.0), candidate("y", 0.3, 0.0)], None);
        let ids: Vec<_> = out.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["y"]);
    }

    #[test]
    fn nan_similarity_is_discarded() {
        let out = ranker().rank(&[candidate("n", f32::NAN, 0.9), candidate("ok", 0.5, 0.5)], None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk.id, "ok");
    }

    #[test]
    fn ties_break_by_similarity_then_id() {
        // Same combined score (0.7 * 0.6 + 0.3 * 0.6 == 0.7 * 0.6 + 0.3 * 0.6).
        let out = ranker().rank(
            &[candidate("b", 0.6, 0.6), candidate("a", 0.6, 0.6), candidate("c", 0.5, 0.0)],
            None,
        );
        let ids: Vec<_> = out.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn limits_default_and_clamp() {
        let r = ranker();
        assert_eq!(r.effective_limit(None), 5);
        assert_eq!(r.effective_limit(Some(0)), 1);
        assert_eq!(r.effective_limit(Some(50)), 20);
        let many: Vec<_> = (0..30).map(|i| candidate(&format!("c{i:02}"), 0.9, 0.5)).collect();
        assert_eq!(r.rank(&many, None).len(), 5);
        assert_eq!(r.rank(&many, Some(100)).len(), 20);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(ranker().rank(&[], None).is_empty());
        assert!(ranker().rank(&[candidate("z", 0.1, 0.9)], None).is_empty());
    }

    #[test]
    fn ranks_raw_embeddings() {
        let mut near = candidate("near", 0.0, 0.5).chunk;
        near.embedding = Some(vec![1.0, 0.0]);
        let mut far = candidate("far", 0.0, 0.5).chunk;
        far.embedding = Some(vec![0.0, 1.0]);
        let bare = candidate("bare", 0.0, 0.5).chunk;
        let out = ranker().rank_by_embedding(&[1.0, 0.1], &[far, bare, near], None);
        let ids: Vec<_> = out.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["near"]);
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    fn candidates_strategy() -> impl Strategy<Value = Vec<Candidate>> {
        prop::collection::vec((0.0f32..=1.0, 0.0f32..=1.0, 0u8..8), 0..40).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (s, q, tag))| candidate(&format!("{tag}-{i}"), s, q))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn scores_are_non_increasing(cands in candidates_strategy(), limit in prop::option::of(0usize..30)) {
            let out = ranker().rank(&cands, limit);
            prop_assert!(out.len() <= ranker().effective_limit(limit));
            for w in out.windows(2) {
                prop_assert!(w[0].combined_score >= w[1].combined_score);
                if w[0].combined_score == w[1].combined_score && w[0].similarity == w[1].similarity {
                    prop_assert!(w[0].chunk.id < w[1].chunk.id);
                }
            }
            prop_assert!(out.iter().all(|r| r.similarity >= 0.3));
        }

        #[test]
        fn ranking_is_pure(cands in candidates_strategy()) {
            let r = ranker();
            let first = r.rank(&cands, Some(10));
            let mut reversed = cands.clone();
            reversed.reverse();
            prop_assert_eq!(&first, &r.rank(&cands, Some(10)));
            prop_assert_eq!(first, r.rank(&reversed, Some(10)));
        }
    }
}
