//! ChromaDB backend over the v1 REST API.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

use lessondb_core::normalize::{normalize_grade, normalize_subject};
use lessondb_core::types::{Candidate, DocumentChunk, QueryFilter};
use lessondb_core::{Error, Result};

use crate::backend::{CollectionSpec, VectorBackend};

pub struct ChromaBackend {
    http: Client,
    base_url: String,
    // collection name -> server-side id
    ids: RwLock<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryResponse {
    pub ids: Vec<Vec<String>>,
    #[serde(default)]
    pub documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    pub metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    pub distances: Option<Vec<Vec<Option<f32>>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
}

impl ChromaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ids: RwLock::new(HashMap::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&Value>) -> Result<T> {
        let mut req = self.http.request(method, self.url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(send_err)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_err(status, &text));
        }
        resp.json::<T>().await.map_err(|e| Error::StoreProtocolError(format!("decode {path}: {e}")))
    }

    fn cached_id(&self, name: &str) -> Option<String> {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    async fn collection_id(&self, spec: &CollectionSpec) -> Result<String> {
        if let Some(id) = self.cached_id(&spec.name) {
            return Ok(id);
        }
        self.get_or_create(spec).await
    }

    async fn get_or_create(&self, spec: &CollectionSpec) -> Result<String> {
        let body = json!({
            "name": spec.name,
            "metadata": {
                "hnsw:space": spec.metric.as_str(),
                "description": spec.description,
            },
            "get_or_create": true,
        });
        let info: CollectionInfo = self.send(Method::POST, "/collections", Some(&body)).await?;
        self.ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec.name.clone(), info.id.clone());
        Ok(info.id)
    }
}

fn send_err(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::StoreProtocolError(e.to_string())
    } else {
        Error::StoreUnavailable(e.to_string())
    }
}

pub(crate) fn status_err(status: StatusCode, body: &str) -> Error {
    let msg = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    if status.is_server_error() {
        Error::StoreUnavailable(msg)
    } else {
        Error::StoreProtocolError(msg)
    }
}

/// `where` clause for the query endpoint. Two conditions are joined with `$and`.
pub fn where_clause(filter: &QueryFilter) -> Option<Value> {
    let mut clauses = Vec::new();
    if let Some(subject) = filter.subject {
        clauses.push(json!({ "subject": { "$eq": subject.as_str() } }));
    }
    if let Some(grade) = filter.grade {
        clauses.push(json!({ "grade": { "$eq": grade.as_str() } }));
    }
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    }
}

// Quality key used by collections written by the lesson-planning server; older
// rows of ours used the snake_case form.
const QUALITY_KEY: &str = "qualityScore";
const LEGACY_QUALITY_KEY: &str = "quality_score";

fn chunk_metadata(chunk: &DocumentChunk) -> Value {
    json!({
        "subject": chunk.subject.as_str(),
        "grade": chunk.grade.as_str(),
        "qualityScore": chunk.quality_score,
        "size_bytes": chunk.size_bytes,
        "source": chunk.source,
        "chunk_index": chunk.chunk_index,
    })
}

/// Flatten the first (only) query row of a response into candidates.
pub fn decode_query_response(resp: QueryResponse) -> Result<Vec<Candidate>> {
    let protocol = |msg: &str| Error::StoreProtocolError(format!("query response: {msg}"));
    let ids = resp.ids.into_iter().next().unwrap_or_default();
    let documents = resp.documents.and_then(|d| d.into_iter().next()).unwrap_or_default();
    let metadatas = resp.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default();
    let distances = resp.distances.and_then(|d| d.into_iter().next()).unwrap_or_default();
    if documents.len() != ids.len() || metadatas.len() != ids.len() || distances.len() != ids.len() {
        return Err(protocol("column lengths differ"));
    }

    let mut out = Vec::with_capacity(ids.len());
    for (((id, text), meta), distance) in ids.into_iter().zip(documents).zip(metadatas).zip(distances) {
        let row = |msg: &str| protocol(&format!("row {id}: {msg}"));
        let distance = distance.ok_or_else(|| row("missing distance"))?;
        let text = text.ok_or_else(|| row("missing document"))?;
        let meta = meta.ok_or_else(|| row("missing metadata"))?;
        let str_field = |key: &str| {
            meta.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| row(&format!("missing `{key}`")))
        };
        let quality = meta
            .get(QUALITY_KEY)
            .or_else(|| meta.get(LEGACY_QUALITY_KEY))
            .and_then(Value::as_f64)
            .ok_or_else(|| row(&format!("missing `{QUALITY_KEY}`")))?;
        let chunk_index = meta
            .get("chunk_index")
            .and_then(Value::as_u64)
            .ok_or_else(|| row("missing `chunk_index`"))?;
        // Older collections carry only `content_length`; fall back to the document itself.
        let size_bytes = meta
            .get("size_bytes")
            .and_then(Value::as_u64)
            .unwrap_or(text.len() as u64);
        let subject = normalize_subject(&str_field("subject")?);
        let grade = normalize_grade(&str_field("grade")?);
        let source = str_field("source")?;
        out.push(Candidate {
            chunk: DocumentChunk {
                id,
                text,
                subject,
                grade,
                quality_score: quality as f32,
                size_bytes,
                source,
                chunk_index: chunk_index as usize,
                embedding: None,
            },
            similarity: 1.0 - distance,
        });
    }
    Ok(out)
}

#[async_trait]
impl VectorBackend for ChromaBackend {
    fn name(&self) -> &'static str {
        "chroma"
    }

    async fn heartbeat(&self) -> Result<()> {
        let _: Value = self.send(Method::GET, "/heartbeat", None).await?;
        Ok(())
    }

    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let id = self.get_or_create(spec).await?;
        info!(collection = %spec.name, id = %id, base_url = %self.base_url, "Collection ready");
        Ok(())
    }

    async fn upsert(&self, spec: &CollectionSpec, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let id = self.collection_id(spec).await?;
        let request = UpsertRequest {
            ids: chunks.iter().map(|c| c.id.as_str()).collect(),
            embeddings: chunks.iter().map(|c| c.embedding.as_deref().unwrap_or_default()).collect(),
            documents: chunks.iter().map(|c| c.text.as_str()).collect(),
            metadatas: chunks.iter().map(chunk_metadata).collect(),
        };
        let body = serde_json::to_value(&request).map_err(|e| Error::StoreProtocolError(e.to_string()))?;
        let _: Value = self.send(Method::POST, &format!("/collections/{id}/upsert"), Some(&body)).await?;

        // Read back which ids landed.
        let check = json!({ "ids": request.ids, "include": [] });
        let got: GetResponse = self.send(Method::POST, &format!("/collections/{id}/get"), Some(&check)).await?;
        debug!(collection = %spec.name, requested = chunks.len(), applied = got.ids.len(), "Upserted");
        Ok(got.ids.len())
    }

    async fn query(
        &self,
        spec: &CollectionSpec,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<Candidate>> {
        let id = self.collection_id(spec).await?;
        let mut body = json!({
            "query_embeddings": [vector],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(clause) = where_clause(filter) {
            body["where"] = clause;
        }
        let resp: QueryResponse = self.send(Method::POST, &format!("/collections/{id}/query"), Some(&body)).await?;
        decode_query_response(resp)
    }

    async fn count(&self, spec: &CollectionSpec) -> Result<usize> {
        let id = self.collection_id(spec).await?;
        self.send(Method::GET, &format!("/collections/{id}/count"), None).await
    }

    async fn reset(&self, spec: &CollectionSpec) -> Result<()> {
        let _: Value = self.send(Method::DELETE, &format!("/collections/{}", spec.name), None).await?;
        self.ids.write().unwrap_or_else(|e| e.into_inner()).remove(&spec.name);
        self.get_or_create(spec).await?;
        info!(collection = %spec.name, "Collection reset");
        Ok(())
    }
}
