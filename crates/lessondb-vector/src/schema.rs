//! Arrow layout of a lesson-chunk table and conversions to and from it.

use arrow_array::{
    types::Float32Type, Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array,
    RecordBatch, StringArray,
};
use arrow_schema::{ArrowError, DataType, Field, Schema};
use std::sync::Arc;

use lessondb_core::normalize::{normalize_grade, normalize_subject};
use lessondb_core::types::{Candidate, DocumentChunk, QueryFilter};
use lessondb_core::{Error, Result};

pub fn build_chunk_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("subject", DataType::Utf8, false),
        Field::new("grade", DataType::Utf8, false),
        Field::new("quality_score", DataType::Float32, false),
        Field::new("size_bytes", DataType::Int64, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32),
            true,
        ),
    ]))
}

pub(crate) fn arrow_err(e: ArrowError) -> Error {
    Error::StoreProtocolError(format!("arrow: {e}"))
}

/// Chunks must already carry `dim`-wide embeddings.
pub fn chunks_to_batch(chunks: &[DocumentChunk], dim: usize) -> Result<RecordBatch> {
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let embedding = chunk.embedding.as_deref().unwrap_or_default();
        if embedding.len() != dim {
            return Err(Error::DimensionMismatch {
                id: chunk.id.clone(),
                expected: dim,
                actual: embedding.len(),
            });
        }
        vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
    }

    RecordBatch::try_new(
        build_chunk_schema(dim),
        vec![
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.text.as_str()))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.subject.as_str()))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.grade.as_str()))),
            Arc::new(Float32Array::from_iter_values(chunks.iter().map(|c| c.quality_score))),
            Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.size_bytes as i64))),
            Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.source.as_str()))),
            Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.chunk_index as i32))),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                vectors.into_iter(),
                dim as i32,
            )),
        ],
    )
    .map_err(arrow_err)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::StoreProtocolError(format!("column `{name}` missing or mistyped")))
}

/// Decode a vector-search result batch. Rows come back without embeddings.
pub fn batch_to_candidates(batch: &RecordBatch) -> Result<Vec<Candidate>> {
    let ids = column::<StringArray>(batch, "id")?;
    let texts = column::<StringArray>(batch, "text")?;
    let subjects = column::<StringArray>(batch, "subject")?;
    let grades = column::<StringArray>(batch, "grade")?;
    let qualities = column::<Float32Array>(batch, "quality_score")?;
    let sizes = column::<Int64Array>(batch, "size_bytes")?;
    let sources = column::<StringArray>(batch, "source")?;
    let indices = column::<Int32Array>(batch, "chunk_index")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if distances.is_null(i) {
            continue;
        }
        out.push(Candidate {
            chunk: DocumentChunk {
                id: ids.value(i).to_string(),
                text: texts.value(i).to_string(),
                subject: normalize_subject(subjects.value(i)),
                grade: normalize_grade(grades.value(i)),
                quality_score: qualities.value(i),
                size_bytes: sizes.value(i).max(0) as u64,
                source: sources.value(i).to_string(),
                chunk_index: indices.value(i).max(0) as usize,
                embedding: None,
            },
            similarity: 1.0 - distances.value(i),
        });
    }
    Ok(out)
}

pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// SQL prefilter for `only_if`; `None` when the filter is empty.
pub fn filter_predicate(filter: &QueryFilter) -> Option<String> {
    let mut clauses = Vec::new();
    if let Some(subject) = filter.subject {
        clauses.push(format!("subject = {}", quote(subject.as_str())));
    }
    if let Some(grade) = filter.grade {
        clauses.push(format!("grade = {}", quote(grade.as_str())));
    }
    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

pub fn id_predicate(ids: &[&str]) -> String {
    let list: Vec<String> = ids.iter().map(|id| quote(id)).collect();
    format!("id IN ({})", list.join(", "))
}
