//! LanceDB connection and housekeeping helpers.
//!
//! Provides the database open function, an ensure helper for tables, and a simple
//! key/value metadata table recording each collection's metric, description and width.

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, TimeUnit};
use chrono::Utc;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use std::sync::Arc;

use lessondb_core::{Error, Result};

use crate::schema::{arrow_err, quote};

pub const META_TABLE: &str = "meta";

/// Map an embedded-store error onto the store taxonomy.
pub(crate) fn lance_err(e: lancedb::Error) -> Error {
    match e {
        lancedb::Error::InvalidInput { .. }
        | lancedb::Error::Schema { .. }
        | lancedb::Error::Arrow { .. } => Error::StoreProtocolError(e.to_string()),
        other => Error::StoreUnavailable(other.to_string()),
    }
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(lance_err)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(lance_err)?;
    Ok(names.iter().any(|n| n == name))
}

/// Create an empty table with `schema` unless one named `name` exists. Returns true when created.
pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<bool> {
    if table_exists(conn, name).await? {
        return Ok(false);
    }
    let iter = RecordBatchIterator::new(Vec::<std::result::Result<RecordBatch, ArrowError>>::new(), schema);
    conn.create_table(name, Box::new(iter)).execute().await.map_err(lance_err)?;
    Ok(true)
}

fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

pub async fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    ensure_table(conn, META_TABLE, build_meta_schema()).await?;
    let t = conn.open_table(META_TABLE).execute().await.map_err(lance_err)?;
    let rb = RecordBatch::try_new(
        build_meta_schema(),
        vec![
            Arc::new(StringArray::from(vec![key.to_string()])),
            Arc::new(StringArray::from(vec![value.to_string()])),
            Arc::new(TimestampMillisecondArray::from(vec![Utc::now().timestamp_millis()])),
        ],
    )
    .map_err(arrow_err)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), build_meta_schema()));
    // key is unique
    let mut mi = t.merge_insert(&["key"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    let _ = mi.execute(reader).await.map_err(lance_err)?;
    Ok(())
}

pub async fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    if !table_exists(conn, META_TABLE).await? {
        return Ok(None);
    }
    let t = conn.open_table(META_TABLE).execute().await.map_err(lance_err)?;
    let mut stream = t
        .query()
        .only_if(format!("key = {}", quote(key)))
        .execute()
        .await
        .map_err(lance_err)?;
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(lance_err)? {
        if batch.num_rows() == 0 {
            continue;
        }
        let val = batch
            .column_by_name("value")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| Error::StoreProtocolError("meta.value column missing".into()))?;
        return Ok(Some(val.value(0).to_string()));
    }
    Ok(None)
}
