//! Ingest path: load a batch, fill missing embeddings, upsert.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use lessondb_core::config::EngineConfig;
use lessondb_core::loader::{BatchSummary, DocumentLoader, LoadCursor};
use lessondb_core::traits::Embedder;
use lessondb_core::{Error, Result};
use lessondb_vector::StoreClient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub summary: BatchSummary,
    pub embedded: usize,
    pub upserted: usize,
    pub batches: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: &IngestReport) {
        self.summary.absorb(&other.summary);
        self.embedded += other.embedded;
        self.upserted += other.upserted;
        self.batches += other.batches;
    }
}

pub struct Ingestor {
    loader: DocumentLoader,
    store: Arc<StoreClient>,
    embedder: Arc<dyn Embedder>,
    dimensions: usize,
}

impl Ingestor {
    pub fn new(config: &EngineConfig, store: Arc<StoreClient>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            loader: DocumentLoader::from_config(config),
            store,
            embedder,
            dimensions: config.embedding.dimensions,
        }
    }

    /// One loader batch end to end. Returns the cursor for the next call.
    pub async fn ingest_batch(&self, dir: &Path, cursor: LoadCursor) -> Result<(IngestReport, Option<LoadCursor>)> {
        let (batch, next) = self.loader.load_batch(dir, cursor)?;
        let mut documents = batch.documents;

        let missing: Vec<usize> = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| d.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| documents[i].text.clone()).collect();
            let embedder = Arc::clone(&self.embedder);
            let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
                .await
                .map_err(|e| Error::Embedding(e.to_string()))??;
            if vectors.len() != missing.len() {
                return Err(Error::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    missing.len()
                )));
            }
            for (&i, vector) in missing.iter().zip(vectors) {
                if vector.len() != self.dimensions {
                    return Err(Error::DimensionMismatch {
                        id: documents[i].id.clone(),
                        expected: self.dimensions,
                        actual: vector.len(),
                    });
                }
                documents[i].embedding = Some(vector);
            }
        }

        let upserted = self.store.upsert(&documents).await?;
        let report = IngestReport { summary: batch.summary, embedded: missing.len(), upserted, batches: 1 };
        info!(
            dir = %dir.display(),
            examined = report.summary.examined,
            embedded = report.embedded,
            upserted,
            "Ingested batch"
        );
        Ok((report, next))
    }

    /// Run batches until the directory is exhausted. `on_batch` sees each batch's
    /// report and the cursor to resume from; an error from it stops the run.
    pub async fn ingest_all<F>(&self, dir: &Path, start: LoadCursor, mut on_batch: F) -> Result<IngestReport>
    where
        F: FnMut(&IngestReport, Option<LoadCursor>) -> Result<()>,
    {
        let mut total = IngestReport::default();
        let mut cursor = Some(start);
        while let Some(c) = cursor {
            let (report, next) = self.ingest_batch(dir, c).await?;
            on_batch(&report, next)?;
            total.absorb(&report);
            cursor = next;
        }
        info!(
            batches = total.batches,
            accepted = total.summary.accepted,
            upserted = total.upserted,
            rejected = total.summary.examined - total.summary.accepted,
            "Ingestion finished"
        );
        Ok(total)
    }
}
