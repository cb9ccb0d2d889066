#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

//! Vector store access: the backend seam, ChromaDB and LanceDB backends, and
//! the client that adds timeouts, retries and the degraded gate.

pub mod backend;
pub mod chroma;
pub mod client;
pub mod health;
pub mod lance;
pub mod retry;
pub mod schema;
pub mod table;

use std::sync::Arc;

use lessondb_core::config::{EngineConfig, StoreBackendKind};

pub use backend::{CollectionSpec, VectorBackend};
pub use client::StoreClient;
pub use health::{HealthMonitor, HealthReport, HealthStatus};

/// Backend selected by `store.backend`. Relative lance paths resolve against `base`.
pub fn backend_from_config(config: &EngineConfig, base: &std::path::Path) -> Arc<dyn VectorBackend> {
    match config.store.backend {
        StoreBackendKind::Chroma => Arc::new(chroma::ChromaBackend::new(config.store.base_url())),
        StoreBackendKind::Lance => {
            let uri = config.lance_uri(base);
            Arc::new(lance::LanceBackend::new(uri.to_string_lossy().into_owned()))
        }
    }
}
