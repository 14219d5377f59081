//! Process-wide model runtime.
//!
//! Models are expensive to load, so they are created lazily, at most once,
//! and shared by every request through an `Arc<ModelRegistry>`. Concurrent
//! first callers wait on the same initialization. Model files live in a
//! [`CacheDir`] that is either configured or a temporary directory removed on
//! shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::ModelSettings;
use crate::embedding::fastembed::{parse_embedding_model, FastEmbedProvider};
use crate::embedding::EmbeddingError;
use crate::keywords::{EmbeddingKeywordExtractor, KeywordError, KeywordExtractor, KeywordResult};
use crate::models::{RerankStrategy, SearchRequest, WorkSummary};
use crate::rerank::cross_encoder::parse_reranker_model;
use crate::rerank::{
    build_query_space, rerank_with, Aggregation, CrossEncoderScorer, EmbeddingScorer,
    FastEmbedCrossEncoder, RerankError,
};

/// Errors raised while obtaining or using a shared model.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Configured model name is not supported
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Embedding model error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Rerank error: {0}")]
    Rerank(#[from] RerankError),

    /// Loader task panicked or was cancelled
    #[error("Model loader failed: {0}")]
    Loader(String),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Directory holding downloaded model files.
#[derive(Debug)]
pub struct CacheDir {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl CacheDir {
    /// Use `configured` (created if missing) or a fresh `hf-cache-*` temporary
    /// directory.
    pub fn new(configured: Option<&Path>) -> std::io::Result<Self> {
        match configured {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Ok(Self {
                    path: path.to_path_buf(),
                    temp: None,
                })
            }
            None => {
                let temp = tempfile::Builder::new().prefix("hf-cache-").tempdir()?;
                Ok(Self {
                    path: temp.path().to_path_buf(),
                    temp: Some(temp),
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Remove the directory if it is temporary. Configured directories are kept.
    pub fn cleanup(self) -> std::io::Result<()> {
        match self.temp {
            Some(temp) => temp.close(),
            None => Ok(()),
        }
    }
}

/// Lazily-loaded bi-encoder and cross-encoder shared across requests.
pub struct ModelRegistry {
    embedding_model: String,
    reranker_model: String,
    cache_dir: PathBuf,
    aggregation: Aggregation,
    embedder: OnceCell<Arc<FastEmbedProvider>>,
    cross_encoder: OnceCell<Arc<FastEmbedCrossEncoder>>,
}

impl ModelRegistry {
    /// Create a registry. No model is loaded until first use.
    pub fn new(settings: &ModelSettings, cache_dir: &Path) -> Self {
        Self {
            embedding_model: settings.embedding_model.clone(),
            reranker_model: settings.reranker_model.clone(),
            cache_dir: cache_dir.to_path_buf(),
            aggregation: settings.aggregation,
            embedder: OnceCell::new(),
            cross_encoder: OnceCell::new(),
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// The shared bi-encoder, loading it on first call.
    pub async fn embedder(&self) -> RegistryResult<Arc<FastEmbedProvider>> {
        self.embedder
            .get_or_try_init(|| async {
                let model = parse_embedding_model(&self.embedding_model)
                    .ok_or_else(|| RegistryError::UnknownModel(self.embedding_model.clone()))?;
                let cache_dir = self.cache_dir.clone();
                info!("Initializing embedding model {}", self.embedding_model);
                let provider = tokio::task::spawn_blocking(move || {
                    FastEmbedProvider::new(Some(model), Some(cache_dir))
                })
                .await
                .map_err(|e| RegistryError::Loader(e.to_string()))??;
                Ok::<_, RegistryError>(Arc::new(provider))
            })
            .await
            .cloned()
    }

    /// The shared cross-encoder, loading it on first call.
    pub async fn cross_encoder(&self) -> RegistryResult<Arc<FastEmbedCrossEncoder>> {
        self.cross_encoder
            .get_or_try_init(|| async {
                let model = parse_reranker_model(&self.reranker_model)
                    .ok_or_else(|| RegistryError::UnknownModel(self.reranker_model.clone()))?;
                let cache_dir = self.cache_dir.clone();
                info!("Initializing cross-encoder model {}", self.reranker_model);
                let encoder = tokio::task::spawn_blocking(move || {
                    FastEmbedCrossEncoder::new(Some(model), Some(cache_dir))
                })
                .await
                .map_err(|e| RegistryError::Loader(e.to_string()))??;
                Ok::<_, RegistryError>(Arc::new(encoder))
            })
            .await
            .cloned()
    }

    /// Whether each model has been loaded, as (embedder, cross-encoder).
    pub fn loaded(&self) -> (bool, bool) {
        (self.embedder.initialized(), self.cross_encoder.initialized())
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("embedding_model", &self.embedding_model)
            .field("reranker_model", &self.reranker_model)
            .field("cache_dir", &self.cache_dir)
            .field("loaded", &self.loaded())
            .finish()
    }
}

/// Reorders candidates with a relevance model chosen per call.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        strategy: RerankStrategy,
        request: &SearchRequest,
        works: Vec<WorkSummary>,
    ) -> RegistryResult<Vec<WorkSummary>>;
}

#[async_trait]
impl Reranker for ModelRegistry {
    /// Inputs that rerank to themselves (no works, no query text) return
    /// without loading any model.
    async fn rerank(
        &self,
        strategy: RerankStrategy,
        request: &SearchRequest,
        works: Vec<WorkSummary>,
    ) -> RegistryResult<Vec<WorkSummary>> {
        if works.is_empty() || build_query_space(request).is_empty() {
            return Ok(works);
        }

        let reranked = match strategy {
            RerankStrategy::Embedding => {
                let scorer = EmbeddingScorer::new(self.embedder().await?);
                rerank_with(&scorer, request, works, self.aggregation).await?
            }
            RerankStrategy::CrossEncoder => {
                let scorer = CrossEncoderScorer::new(self.cross_encoder().await?);
                rerank_with(&scorer, request, works, self.aggregation).await?
            }
        };
        Ok(reranked)
    }
}

#[async_trait]
impl KeywordExtractor for ModelRegistry {
    async fn extract(&self, text: &str, top_n: usize) -> KeywordResult<Vec<String>> {
        let embedder = self
            .embedder()
            .await
            .map_err(|e| KeywordError::Unavailable(e.to_string()))?;
        EmbeddingKeywordExtractor::new(embedder).extract(text, top_n).await
    }
}
