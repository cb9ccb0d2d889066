#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Retrieval orchestration over the lesson-material store: ranking, context
//! assembly, the query engine and the ingestor.

pub mod context;
pub mod engine;
pub mod ingest;
pub mod rank;

pub use context::{assemble, ContextWindow};
pub use engine::{ContextPayload, PayloadStatus, RetrievalEngine, RetrievalOutcome, RetrievalRequest};
pub use ingest::{IngestReport, Ingestor};
pub use rank::Ranker;
