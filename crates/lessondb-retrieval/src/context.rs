//! Greedy, token-bounded context assembly.
//!
//! Chunks are taken whole in rank order. A chunk that does not fit the remaining
//! budget is skipped and the walk continues, so a smaller chunk further down can
//! still be included.

use serde::Serialize;

use lessondb_core::tokens::estimate_tokens;
use lessondb_core::types::{ChunkId, RankedResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindow {
    pub texts: Vec<String>,
    pub chunk_ids: Vec<ChunkId>,
    pub sources: Vec<String>,
    pub token_count: usize,
    pub budget: usize,
    pub skipped_ids: Vec<ChunkId>,
}

impl ContextWindow {
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Prompt block with each chunk prefixed by its source.
    pub fn render(&self) -> String {
        self.texts
            .iter()
            .zip(&self.sources)
            .map(|(text, source)| format!("[来源: {source}]\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub fn assemble(ranked: &[RankedResult], token_budget: usize) -> ContextWindow {
    let mut window = ContextWindow { budget: token_budget, ..ContextWindow::default() };
    for result in ranked {
        let cost = estimate_tokens(&result.chunk.text);
        if window.token_count + cost <= token_budget {
            window.token_count += cost;
            window.texts.push(result.chunk.text.clone());
            window.chunk_ids.push(result.chunk.id.clone());
            window.sources.push(result.chunk.source.clone());
        } else {
            window.skipped_ids.push(result.chunk.id.clone());
        }
    }
    window
}
