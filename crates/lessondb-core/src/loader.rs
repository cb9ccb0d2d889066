//! Batched, resumable reads of pre-chunked lesson material.
//!
//! Source files are `.json`, holding either an array of chunk records or an object
//! with a `chunks` array. Files are visited in lexicographic path order and a
//! [`LoadCursor`] marks the next record to examine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DocumentsConfig, EngineConfig};
use crate::error::{Error, Result};
use crate::normalize::{
    infer_grade_from_name, infer_subject_from_name, normalize_grade, normalize_subject,
};
use crate::tokens::estimate_tokens;
use crate::types::{ChunkId, DocumentChunk, Grade, Subject};

const DEFAULT_QUALITY_SCORE: f64 = 0.5;

/// Position of the next record to examine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadCursor {
    pub file_index: usize,
    pub record_index: usize,
}

impl LoadCursor {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// `Ok(None)` when no cursor has been saved yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        let cursor = serde_json::from_slice(&bytes).map_err(|e| Error::MalformedDocument {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(cursor))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub examined: usize,
    pub accepted: usize,
    pub oversized: usize,
    pub below_quality: usize,
    pub malformed: usize,
    pub over_token_limit: usize,
}

impl BatchSummary {
    pub fn absorb(&mut self, other: &BatchSummary) {
        self.examined += other.examined;
        self.accepted += other.accepted;
        self.oversized += other.oversized;
        self.below_quality += other.below_quality;
        self.malformed += other.malformed;
        self.over_token_limit += other.over_token_limit;
    }

    fn record_rejection(&mut self, err: &Error) {
        match err {
            Error::OversizedDocument { .. } => self.oversized += 1,
            Error::BelowQualityThreshold { .. } => self.below_quality += 1,
            _ => self.malformed += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedBatch {
    pub documents: Vec<DocumentChunk>,
    pub summary: BatchSummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    subject: Option<String>,
    grade: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    id: Option<String>,
    content: Option<String>,
    quality_score: Option<f64>,
    subject: Option<String>,
    grade: Option<String>,
    embedding: Option<Vec<f32>>,
    size_bytes: Option<u64>,
    chunk_index: Option<usize>,
    metadata: Option<RawMetadata>,
}

pub struct DocumentLoader {
    batch_size: usize,
    max_document_size: u64,
    min_quality_score: f32,
    max_tokens: usize,
}

impl DocumentLoader {
    pub fn new(documents: &DocumentsConfig, max_tokens: usize) -> Self {
        Self {
            batch_size: documents.batch_size.max(1),
            max_document_size: documents.max_document_size,
            min_quality_score: documents.min_quality_score,
            max_tokens,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.documents, config.embedding.max_tokens)
    }

    /// Supported files under `root`, sorted. Dot-files (such as a saved cursor) are skipped.
    pub fn list_files(root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .filter(|p| {
                !p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
            })
            .collect();
        files.sort();
        files
    }

    /// Examine at most `batch_size` records starting at `cursor`.
    ///
    /// Rejected records are counted and skipped; only a missing source directory
    /// fails the call. A record whose id already appeared in this batch counts as
    /// malformed. The returned cursor is `None` once every file is consumed.
    pub fn load_batch(
        &self,
        source_dir: &Path,
        cursor: LoadCursor,
    ) -> Result<(LoadedBatch, Option<LoadCursor>)> {
        if !source_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("source directory {} not found", source_dir.display()),
            )));
        }
        let files = Self::list_files(source_dir);
        let mut batch = LoadedBatch::default();
        let mut seen_ids: HashSet<ChunkId> = HashSet::new();
        let mut pos = cursor;

        while batch.summary.examined < self.batch_size && pos.file_index < files.len() {
            let path = &files[pos.file_index];
            let source = file_name(path);
            let prefix = id_prefix(source_dir, path);
            let records = match read_records(path) {
                Ok(records) => records,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "Skipping unreadable source file");
                    if pos.record_index == 0 {
                        batch.summary.examined += 1;
                        batch.summary.malformed += 1;
                    }
                    pos = LoadCursor { file_index: pos.file_index + 1, record_index: 0 };
                    continue;
                }
            };

            while batch.summary.examined < self.batch_size && pos.record_index < records.len() {
                let index = pos.record_index;
                pos.record_index += 1;
                batch.summary.examined += 1;
                let parsed = self
                    .parse_record(&records[index], &prefix, &source, index)
                    .and_then(|doc| {
                        if seen_ids.contains(&doc.id) {
                            return Err(Error::MalformedDocument {
                                source_name: format!("{source}#{index}"),
                                reason: format!("duplicate id {}", doc.id),
                            });
                        }
                        seen_ids.insert(doc.id.clone());
                        Ok(doc)
                    });
                match parsed {
                    Ok(doc) => {
                        if estimate_tokens(&doc.text) > self.max_tokens {
                            batch.summary.over_token_limit += 1;
                            warn!(id = %doc.id, max_tokens = self.max_tokens, "Chunk exceeds token limit");
                        }
                        batch.summary.accepted += 1;
                        batch.documents.push(doc);
                    }
                    Err(err) => {
                        match &err {
                            Error::BelowQualityThreshold { .. } => {
                                debug!(source = %source, record = index, error = %err, "Rejected document");
                            }
                            _ => warn!(source = %source, record = index, error = %err, "Rejected document"),
                        }
                        batch.summary.record_rejection(&err);
                    }
                }
            }

            if pos.record_index >= records.len() {
                pos = LoadCursor { file_index: pos.file_index + 1, record_index: 0 };
            }
        }

        let next = (pos.file_index < files.len()).then_some(pos);
        info!(
            examined = batch.summary.examined,
            accepted = batch.summary.accepted,
            oversized = batch.summary.oversized,
            below_quality = batch.summary.below_quality,
            malformed = batch.summary.malformed,
            "Loaded batch"
        );
        Ok((batch, next))
    }

    /// Load every remaining batch. Convenience for small corpora and tests.
    pub fn load_all(&self, source_dir: &Path) -> Result<LoadedBatch> {
        let mut all = LoadedBatch::default();
        let mut cursor = Some(LoadCursor::default());
        while let Some(c) = cursor {
            let (batch, next) = self.load_batch(source_dir, c)?;
            all.summary.absorb(&batch.summary);
            all.documents.extend(batch.documents);
            cursor = next;
        }
        Ok(all)
    }

    fn parse_record(
        &self,
        value: &Value,
        id_prefix: &str,
        source: &str,
        index: usize,
    ) -> Result<DocumentChunk> {
        let malformed = |reason: String| Error::MalformedDocument {
            source_name: format!("{source}#{index}"),
            reason,
        };
        if !value.is_object() {
            return Err(malformed("record is not an object".into()));
        }
        let raw: RawRecord =
            serde_json::from_value(value.clone()).map_err(|e| malformed(e.to_string()))?;

        let id = raw
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{id_prefix}_chunk_{index}"));

        let size = match raw.size_bytes {
            Some(size) => size,
            None => serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(0),
        };
        if size > self.max_document_size {
            return Err(Error::OversizedDocument { id, size, limit: self.max_document_size });
        }

        let text = raw
            .content
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| malformed("missing or empty content".into()))?;

        let quality = raw.quality_score.unwrap_or(DEFAULT_QUALITY_SCORE);
        if !(0.0..=1.0).contains(&quality) {
            return Err(malformed(format!("quality score {quality} outside [0, 1]")));
        }
        let quality = quality as f32;
        if quality < self.min_quality_score {
            return Err(Error::BelowQualityThreshold { id, score: quality, min: self.min_quality_score });
        }

        let metadata = raw.metadata.unwrap_or_default();
        let subject = match raw.subject.or(metadata.subject) {
            Some(label) => normalize_subject(&label),
            None => infer_subject_from_name(source).unwrap_or(Subject::Other),
        };
        let grade = match raw.grade.or(metadata.grade) {
            Some(label) => normalize_grade(&label),
            None => infer_grade_from_name(source).unwrap_or(Grade::Unknown),
        };

        Ok(DocumentChunk {
            id,
            text,
            subject,
            grade,
            quality_score: quality,
            size_bytes: size,
            source: source.to_string(),
            chunk_index: raw.chunk_index.unwrap_or(index),
            embedding: raw.embedding,
        })
    }
}

fn read_records(path: &Path) -> Result<Vec<Value>> {
    let bytes = fs::read(path)?;
    let malformed = |reason: String| Error::MalformedDocument {
        source_name: path.display().to_string(),
        reason,
    };
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;
    match value {
        Value::Array(records) => Ok(records),
        Value::Object(mut obj) => match obj.remove("chunks") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(malformed("expected an array or an object with a `chunks` array".into())),
        },
        _ => Err(malformed("expected an array or an object with a `chunks` array".into())),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Path under `root` without its extension, `/`-separated. Generated ids build on
/// this so same-named files in different folders stay distinct.
fn id_prefix(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn loader(batch_size: usize) -> DocumentLoader {
        let docs = DocumentsConfig { batch_size, ..DocumentsConfig::default() };
        DocumentLoader::new(&docs, 512)
    }

    fn write(dir: &Path, name: &str, value: &Value) {
        fs::write(dir.join(name), serde_json::to_vec(value).unwrap()).unwrap();
    }

    #[test]
    fn defaults_ids_and_quality() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "七年级数学.json", &json!([{ "content": "有理数的加法" }]));
        let (batch, next) = loader(100).load_batch(tmp.path(), LoadCursor::default()).unwrap();
        assert!(next.is_none());
        let doc = &batch.documents[0];
        assert_eq!(doc.id, "七年级数学_chunk_0");
        assert_eq!(doc.quality_score, 0.5);
        assert_eq!(doc.subject, Subject::Math);
        assert_eq!(doc.grade, Grade::Seven);
        assert_eq!(doc.source, "七年级数学.json");
    }

    #[test]
    fn explicit_labels_beat_file_name() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "七年级数学.json",
            &json!({ "chunks": [
                { "id": "a", "content": "x", "metadata": { "subject": "物理", "grade": "初二" } },
                { "id": "b", "content": "y", "subject": "Physics", "grade": "高一" }
            ]}),
        );
        let (batch, _) = loader(100).load_batch(tmp.path(), LoadCursor::default()).unwrap();
        assert_eq!(batch.documents[0].subject, Subject::Physics);
        assert_eq!(batch.documents[0].grade, Grade::Eight);
        assert_eq!(batch.documents[1].subject, Subject::Other);
        assert_eq!(batch.documents[1].grade, Grade::Unknown);
    }

    #[test]
    fn malformed_records_do_not_abort() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a.json",
            &json!([
                "not an object",
                { "content": "" },
                { "content": "ok", "embedding": ["x"] },
                { "content": "ok", "qualityScore": 1.5 },
                { "content": "fine" }
            ]),
        );
        fs::write(tmp.path().join("b.json"), b"{ not json").unwrap();
        let (batch, next) = loader(100).load_batch(tmp.path(), LoadCursor::default()).unwrap();
        assert!(next.is_none());
        assert_eq!(batch.summary.examined, 6);
        assert_eq!(batch.summary.malformed, 5);
        assert_eq!(batch.summary.accepted, 1);
    }

    #[test]
    fn same_file_name_in_sibling_folders_gets_distinct_ids() {
        let tmp = TempDir::new().unwrap();
        for edition in ["人教版", "北师大版"] {
            fs::create_dir(tmp.path().join(edition)).unwrap();
            write(&tmp.path().join(edition), "七年级数学.json", &json!([{ "content": edition }]));
        }
        let (batch, _) = loader(100).load_batch(tmp.path(), LoadCursor::default()).unwrap();
        let ids: Vec<_> = batch.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["人教版/七年级数学_chunk_0", "北师大版/七年级数学_chunk_0"]);
        assert_eq!(batch.summary.malformed, 0);
    }

    #[test]
    fn repeated_id_in_a_batch_is_counted_as_malformed() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.json", &json!([{ "id": "dup", "content": "一" }, { "id": "x", "content": "二" }]));
        write(tmp.path(), "b.json", &json!([{ "id": "dup", "content": "三" }]));
        let (batch, next) = loader(100).load_batch(tmp.path(), LoadCursor::default()).unwrap();
        assert!(next.is_none());
        assert_eq!(batch.summary.examined, 3);
        assert_eq!(batch.summary.accepted, 2);
        assert_eq!(batch.summary.malformed, 1);
        let ids: Vec<_> = batch.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["dup", "x"]);
        assert_eq!(batch.documents[0].text, "一");
    }

    #[test]
    fn quality_floor_is_strict() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "a.json",
            &json!([
                { "id": "at", "content": "x", "qualityScore": 0.3 },
                { "id": "below", "content": "y", "qualityScore": 0.29 }
            ]),
        );
        let (batch, _) = loader(100).load_batch(tmp.path(), LoadCursor::default()).unwrap();
        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0].id, "at");
        assert_eq!(batch.summary.below_quality, 1);
    }

    #[test]
    fn cursor_resumes_across_files() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "a.json", &json!([{ "content": "1" }, { "content": "2" }, { "content": "3" }]));
        write(tmp.path(), "b.json", &json!([{ "content": "4" }, { "content": "5" }]));
        let l = loader(2);

        let (b1, c1) = l.load_batch(tmp.path(), LoadCursor::default()).unwrap();
        assert_eq!(b1.documents.len(), 2);
        assert_eq!(c1, Some(LoadCursor { file_index: 0, record_index: 2 }));

        let (b2, c2) = l.load_batch(tmp.path(), c1.unwrap()).unwrap();
        let ids: Vec<_> = b2.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a_chunk_2", "b_chunk_0"]);

        let (b3, c3) = l.load_batch(tmp.path(), c2.unwrap()).unwrap();
        assert_eq!(b3.documents.len(), 1);
        assert!(c3.is_none());
    }

    #[test]
    fn cursor_persists_as_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".ingest_cursor.json");
        assert_eq!(LoadCursor::load(&path).unwrap(), None);
        let cursor = LoadCursor { file_index: 3, record_index: 7 };
        cursor.save(&path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("fileIndex"));
        assert_eq!(LoadCursor::load(&path).unwrap(), Some(cursor));
        assert!(DocumentLoader::list_files(tmp.path()).is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = loader(10).load_batch(&tmp.path().join("nope"), LoadCursor::default());
        assert!(matches!(err, Err(Error::Io(_))));
    }
}
