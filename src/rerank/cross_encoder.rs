//! Cross-encoder scorer using FastEmbed rerankers.
//!
//! Each (query, document) pair is scored jointly by the model, which yields a
//! raw logit. Logits are not normalized; only their order matters.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tokio::sync::Mutex;

use super::{RerankError, RerankResult, Scorer};
use crate::models::WorkSummary;

/// Resolve a configured reranker name (the fastembed variant name).
pub fn parse_reranker_model(name: &str) -> Option<RerankerModel> {
    let model = match name.to_ascii_lowercase().as_str() {
        "bgererankerbase" | "bge-reranker-base" => RerankerModel::BGERerankerBase,
        "bgererankerv2m3" | "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
        _ => return None,
    };
    Some(model)
}

/// A model that scores a query against many documents at once.
#[async_trait]
pub trait PairwiseModel: Send + Sync {
    /// One logit per document, in document order.
    async fn predict(&self, query: &str, documents: &[&str]) -> RerankResult<Vec<f32>>;

    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: PairwiseModel + ?Sized> PairwiseModel for Arc<T> {
    async fn predict(&self, query: &str, documents: &[&str]) -> RerankResult<Vec<f32>> {
        (**self).predict(query, documents).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// FastEmbed `TextRerank` wrapper.
#[derive(Clone)]
pub struct FastEmbedCrossEncoder {
    model: Arc<Mutex<TextRerank>>,
    model_name: String,
}

impl FastEmbedCrossEncoder {
    /// Load a reranker model (default `BGERerankerBase`).
    ///
    /// Blocking; downloads the model on first use.
    ///
    /// # Errors
    /// Returns `RerankError::Model` if initialization fails
    pub fn new(model: Option<RerankerModel>, cache_dir: Option<PathBuf>) -> RerankResult<Self> {
        let model_type = model.unwrap_or(RerankerModel::BGERerankerBase);
        let model_name = format!("{:?}", model_type);

        let mut init_options = RerankInitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        tracing::info!("Loading cross-encoder model {}", model_name);
        let text_rerank = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::Model(format!("Failed to initialize reranker: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_rerank)),
            model_name,
        })
    }
}

#[async_trait]
impl PairwiseModel for FastEmbedCrossEncoder {
    async fn predict(&self, query: &str, documents: &[&str]) -> RerankResult<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.lock().await;
        let results = model
            .rerank(query, documents.to_vec(), false, None)
            .map_err(|e| RerankError::Model(format!("Reranking failed: {}", e)))?;

        // Results come back sorted by score; put them back in document order.
        let mut scores = vec![0.0; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedCrossEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedCrossEncoder")
            .field("model_name", &self.model_name)
            .finish()
    }
}

/// Document text a work is paired with: title followed by abstract.
pub fn document_text(work: &WorkSummary) -> String {
    format!("{} {}", work.title, work.abstract_text).trim().to_string()
}

/// Scores works with a pairwise model.
#[derive(Debug, Clone)]
pub struct CrossEncoderScorer<M> {
    model: M,
}

impl<M: PairwiseModel> CrossEncoderScorer<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: PairwiseModel> Scorer for CrossEncoderScorer<M> {
    async fn score(&self, queries: &[String], works: &[WorkSummary]) -> RerankResult<Vec<Vec<f32>>> {
        let documents: Vec<String> = works.iter().map(document_text).collect();
        let refs: Vec<&str> = documents.iter().map(String::as_str).collect();

        let mut matrix = Vec::with_capacity(queries.len());
        for query in queries {
            matrix.push(self.model.predict(query, &refs).await?);
        }
        Ok(matrix)
    }

    fn name(&self) -> &str {
        self.model.model_name()
    }
}
