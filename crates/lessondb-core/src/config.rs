//! Engine configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml` +
//! `APP_*` env vars (`__` separates nested keys, e.g. `APP_STORE__PORT=8001`).
//! The merged value is validated once and then shared read-only.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    Chroma,
    Lance,
}

/// Only cosine is supported; any other value fails extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub name: String,
    pub metric: DistanceMetric,
    pub description: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: "lesson_materials".into(),
            metric: DistanceMetric::Cosine,
            description: "教学资料向量数据库".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub host: String,
    pub port: u16,
    pub lance_uri: String,
    pub collection: CollectionConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Chroma,
            host: "localhost".into(),
            port: 8000,
            lance_uri: "./rag_data/lancedb".into(),
            collection: CollectionConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimensions: usize,
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            dimensions: 384,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub min_similarity_threshold: f32,
    pub similarity_weight: f32,
    pub quality_score_weight: f32,
    pub context_max_tokens: usize,
    pub widen_grade_on_empty: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 20,
            min_similarity_threshold: 0.3,
            similarity_weight: 0.7,
            quality_score_weight: 0.3,
            context_max_tokens: 2000,
            widen_grade_on_empty: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub rag_data_dir: String,
    pub batch_size: usize,
    pub max_document_size: u64,
    pub min_quality_score: f32,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            rag_data_dir: "./rag_data/chunks".into(),
            batch_size: 100,
            max_document_size: 10 * 1024 * 1024,
            min_quality_score: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub timeout_ms: u64,
    pub retries: u32,
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000, retries: 3, interval_ms: 30_000 }
    }
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub documents: DocumentsConfig,
    pub health_check: HealthCheckConfig,
}

impl EngineConfig {
    /// Layered sources for the current `RUST_ENV` (defaults to `dev`).
    pub fn figment() -> Figment {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn load() -> Result<Self> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: EngineConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Startup invariants. Runs once; components trust the result afterwards.
    pub fn validate(&self) -> Result<()> {
        let s = &self.search;
        let weight_sum = s.similarity_weight + s.quality_score_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(violation(format!(
                "search weights must sum to 1.0, got {} + {} = {}",
                s.similarity_weight, s.quality_score_weight, weight_sum
            )));
        }
        for (name, value) in [
            ("search.similarity_weight", s.similarity_weight),
            ("search.quality_score_weight", s.quality_score_weight),
            ("search.min_similarity_threshold", s.min_similarity_threshold),
            ("documents.min_quality_score", self.documents.min_quality_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(violation(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        if s.default_limit == 0 || s.default_limit > s.max_limit {
            return Err(violation(format!(
                "search.default_limit must satisfy 1 <= {} <= max_limit {}",
                s.default_limit, s.max_limit
            )));
        }
        let non_zero = [
            ("search.context_max_tokens", s.context_max_tokens as u64),
            ("embedding.dimensions", self.embedding.dimensions as u64),
            ("embedding.max_tokens", self.embedding.max_tokens as u64),
            ("documents.batch_size", self.documents.batch_size as u64),
            ("documents.max_document_size", self.documents.max_document_size),
            ("health_check.timeout_ms", self.health_check.timeout_ms),
            ("health_check.retries", u64::from(self.health_check.retries)),
            ("health_check.interval_ms", self.health_check.interval_ms),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(violation(format!("{name} must be non-zero")));
        }
        if self.store.collection.name.trim().is_empty() {
            return Err(violation("store.collection.name must not be empty".into()));
        }
        Ok(())
    }

    pub fn rag_data_dir(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.documents.rag_data_dir)
    }

    pub fn lance_uri(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.store.lance_uri)
    }
}

fn violation(msg: String) -> Error {
    Error::ConfigInvariantViolation(msg)
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
