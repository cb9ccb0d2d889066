//! Embedded LanceDB backend.
//!
//! A collection is a table keyed by `id`; upsert is a `merge_insert`. The metric,
//! description and width are recorded in the `meta` table on creation.

use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use lessondb_core::types::{Candidate, DocumentChunk, QueryFilter};
use lessondb_core::{Error, Result};

use crate::backend::{CollectionSpec, VectorBackend};
use crate::schema::{batch_to_candidates, build_chunk_schema, chunks_to_batch, filter_predicate, id_predicate};
use crate::table::{ensure_table, get_meta, lance_err, open_db, set_meta, table_exists};

pub struct LanceBackend {
    uri: String,
    conn: OnceCell<Connection>,
}

impl LanceBackend {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), conn: OnceCell::new() }
    }

    async fn conn(&self) -> Result<&Connection> {
        self.conn.get_or_try_init(|| open_db(&self.uri)).await
    }

    async fn table(&self, spec: &CollectionSpec) -> Result<Table> {
        let conn = self.conn().await?;
        conn.open_table(&spec.name).execute().await.map_err(lance_err)
    }
}

fn meta_key(spec: &CollectionSpec, field: &str) -> String {
    format!("{}.{}", spec.name, field)
}

#[async_trait]
impl VectorBackend for LanceBackend {
    fn name(&self) -> &'static str {
        "lance"
    }

    async fn heartbeat(&self) -> Result<()> {
        let conn = self.conn().await?;
        conn.table_names().execute().await.map_err(lance_err)?;
        Ok(())
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let conn = self.conn().await?;
        let created = ensure_table(conn, &spec.name, build_chunk_schema(spec.dimensions)).await?;
        if created {
            set_meta(conn, &meta_key(spec, "metric"), spec.metric.as_str()).await?;
            set_meta(conn, &meta_key(spec, "description"), &spec.description).await?;
            set_meta(conn, &meta_key(spec, "dimensions"), &spec.dimensions.to_string()).await?;
            info!(collection = %spec.name, uri = %self.uri, dimensions = spec.dimensions, "Created collection");
            return Ok(());
        }
        if let Some(stored) = get_meta(conn, &meta_key(spec, "dimensions")).await? {
            let actual: usize = stored
                .parse()
                .map_err(|_| Error::StoreProtocolError(format!("bad dimensions meta `{stored}`")))?;
            if actual != spec.dimensions {
                return Err(Error::DimensionMismatch {
                    id: spec.name.clone(),
                    expected: spec.dimensions,
                    actual,
                });
            }
        }
        debug!(collection = %spec.name, "Attached to existing collection");
        Ok(())
    }

    async fn upsert(&self, spec: &CollectionSpec, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let batch = chunks_to_batch(chunks, spec.dimensions)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let table = self.table(spec).await?;

        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        let _ = mi.execute(reader).await.map_err(lance_err)?;

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        table.count_rows(Some(id_predicate(&ids))).await.map_err(lance_err)
    }

    async fn query(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<Candidate>> {
        let table = self.table(spec).await?;
        let mut query = table
            .vector_search(vector.to_vec())
            .map_err(lance_err)?
            .distance_type(DistanceType::Cosine)
            .limit(top_k);
        if let Some(predicate) = filter_predicate(filter) {
            query = query.only_if(predicate);
        }
        let mut results = query.execute().await.map_err(lance_err)?;

        let mut out = Vec::new();
        while let Some(batch) = results.try_next().await.map_err(lance_err)? {
            out.extend(batch_to_candidates(&batch)?);
        }
        out.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        out.truncate(top_k);
        Ok(out)
    }

    async fn count(&self, spec: &CollectionSpec) -> Result<usize> {
        let conn = self.conn().await?;
        if !table_exists(conn, &spec.name).await? {
            return Ok(0);
        }
        self.table(spec).await?.count_rows(None).await.map_err(lance_err)
    }

    async fn reset(&self, spec: &CollectionSpec) -> Result<()> {
        let conn = self.conn().await?;
        if !table_exists(conn, &spec.name).await? {
            return Ok(());
        }
        let _ = self.table(spec).await?.delete("true").await.map_err(lance_err)?;
        info!(collection = %spec.name, "Removed all chunks");
        Ok(())
    }
}
