use thiserror::Error;

use crate::types::ChunkId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed document in {source_name}: {reason}")]
    MalformedDocument { source_name: String, reason: String },

    #[error("Document {id} is {size} bytes, over the {limit} byte limit")]
    OversizedDocument { id: ChunkId, size: u64, limit: u64 },

    #[error("Document {id} has quality score {score}, below the {min} floor")]
    BelowQualityThreshold { id: ChunkId, score: f32, min: f32 },

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Vector store is degraded; search temporarily unavailable")]
    StoreDegraded,

    #[error("Vector store call timed out after {timeout_ms}ms")]
    StoreTimeout { timeout_ms: u64 },

    #[error("Vector store protocol error: {0}")]
    StoreProtocolError(String),

    #[error("Upsert only partially applied: {applied} of {requested} chunks")]
    PartialUpsert { applied: usize, requested: usize },

    #[error("Embedding for {id} has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { id: ChunkId, expected: usize, actual: usize },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Configuration invariant violated: {0}")]
    ConfigInvariantViolation(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient store failures that a bounded retry may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::StoreTimeout { .. })
    }

    /// Per-document rejections produced by the loader.
    pub fn is_document_rejection(&self) -> bool {
        matches!(
            self,
            Error::MalformedDocument { .. }
                | Error::OversizedDocument { .. }
                | Error::BelowQualityThreshold { .. }
        )
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_errors_retry() {
        assert!(Error::StoreUnavailable("refused".into()).is_retryable());
        assert!(Error::StoreTimeout { timeout_ms: 5000 }.is_retryable());
        assert!(!Error::StoreProtocolError("bad json".into()).is_retryable());
        assert!(!Error::StoreDegraded.is_retryable());
        assert!(!Error::PartialUpsert { applied: 1, requested: 2 }.is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = Error::OversizedDocument { id: "a_chunk_0".into(), size: 11, limit: 10 };
        let msg = err.to_string();
        assert!(msg.contains("a_chunk_0"));
        assert!(msg.contains("11"));
        assert!(err.is_document_rejection());
    }
}
