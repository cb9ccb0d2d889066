//! Store client shared by the query and ingest paths.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lessondb_core::config::{EngineConfig, HealthCheckConfig};
use lessondb_core::types::{Candidate, DocumentChunk, QueryFilter};
use lessondb_core::{Error, Result};

use crate::backend::{CollectionSpec, VectorBackend};
use crate::health::{check_with_retries, health_channel, HealthMonitor, HealthReport, HealthStatus};
use crate::retry::RetryPolicy;

pub struct StoreClient {
    backend: Arc<dyn VectorBackend>,
    spec: CollectionSpec,
    health_config: HealthCheckConfig,
    retry: RetryPolicy,
    max_batch: usize,
    status: watch::Receiver<HealthStatus>,
}

impl StoreClient {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        spec: CollectionSpec,
        health_config: HealthCheckConfig,
        status: watch::Receiver<HealthStatus>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&health_config);
        Self { backend, spec, health_config, retry, max_batch: usize::MAX, status }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Split upserts into requests of at most `max_batch` chunks.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Attach to (or create) the configured collection and start the health loop.
    pub async fn connect(
        backend: Arc<dyn VectorBackend>,
        config: &EngineConfig,
    ) -> Result<(Arc<StoreClient>, HealthMonitor)> {
        let (tx, rx) = health_channel();
        let client = StoreClient::new(
            Arc::clone(&backend),
            CollectionSpec::from_config(config),
            config.health_check.clone(),
            rx,
        )
        .with_max_batch(config.documents.batch_size);
        client.ensure_collection().await?;
        let monitor = HealthMonitor::spawn(backend, config.health_check.clone(), client.retry, tx);
        info!(backend = client.backend.name(), collection = %client.spec.name, "Store client connected");
        Ok((Arc::new(client), monitor))
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn status(&self) -> HealthStatus {
        *self.status.borrow()
    }

    pub fn is_degraded(&self) -> bool {
        self.status() == HealthStatus::Degraded
    }

    fn gate(&self) -> Result<()> {
        if self.is_degraded() {
            return Err(Error::StoreDegraded);
        }
        Ok(())
    }

    /// One backend call: bounded by the health-check timeout, retried on transient errors.
    async fn call<F, Fut, T>(&self, op: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.health_config.timeout();
        let timeout_ms = self.health_config.timeout_ms;
        self.retry
            .run(op, || {
                let fut = operation();
                async move {
                    match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::StoreTimeout { timeout_ms }),
                    }
                }
            })
            .await
    }

    pub async fn ensure_collection(&self) -> Result<()> {
        let backend = self.backend.as_ref();
        let spec = &self.spec;
        self.call("ensure_collection", move || backend.ensure_collection(spec)).await
    }

    /// Insert-or-replace by id. Every embedding is checked before the store is touched.
    pub async fn upsert(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        self.gate()?;
        let expected = self.spec.dimensions;
        for chunk in chunks {
            let actual = chunk.embedding.as_ref().map_or(0, Vec::len);
            if actual != expected {
                return Err(Error::DimensionMismatch { id: chunk.id.clone(), expected, actual });
            }
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        let backend = self.backend.as_ref();
        let spec = &self.spec;
        let mut applied = 0;
        for part in chunks.chunks(self.max_batch) {
            match self.call("upsert", move || backend.upsert(spec, part)).await {
                Ok(n) => applied += n,
                // Earlier parts are already stored; report how far we got.
                Err(err) if applied > 0 => {
                    warn!(collection = %spec.name, applied, requested = chunks.len(), error = %err, "Upsert stopped part-way");
                    return Err(Error::PartialUpsert { applied, requested: chunks.len() });
                }
                Err(err) => return Err(err),
            }
        }
        if applied < chunks.len() {
            return Err(Error::PartialUpsert { applied, requested: chunks.len() });
        }
        debug!(collection = %spec.name, count = applied, "Upsert complete");
        Ok(applied)
    }

    pub async fn query(&self, vector: &[f32], top_k: usize, filter: &QueryFilter) -> Result<Vec<Candidate>> {
        self.gate()?;
        if vector.len() != self.spec.dimensions {
            return Err(Error::DimensionMismatch {
                id: "<query>".into(),
                expected: self.spec.dimensions,
                actual: vector.len(),
            });
        }
        let backend = self.backend.as_ref();
        let spec = &self.spec;
        let top_k = top_k.max(1);
        let candidates = self.call("query", move || backend.query(spec, vector, top_k, filter)).await?;
        debug!(collection = %spec.name, top_k, returned = candidates.len(), "Query complete");
        Ok(candidates)
    }

    pub async fn count(&self) -> Result<usize> {
        let backend = self.backend.as_ref();
        let spec = &self.spec;
        self.call("count", move || backend.count(spec)).await
    }

    pub async fn reset(&self) -> Result<()> {
        let backend = self.backend.as_ref();
        let spec = &self.spec;
        self.call("reset", move || backend.reset(spec)).await
    }

    /// On-demand probe with the configured timeout and retries.
    pub async fn health_check(&self) -> HealthReport {
        check_with_retries(self.backend.as_ref(), &self.health_config, &self.retry).await
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("backend", &self.backend.name())
            .field("collection", &self.spec.name)
            .field("status", &self.status())
            .finish()
    }
}
