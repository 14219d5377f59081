//! Bi-encoder scorer.
//!
//! Queries and documents are embedded independently with the shared
//! `EmbeddingProvider` and compared by cosine similarity.

use async_trait::async_trait;

use super::{RerankResult, Scorer};
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::WorkSummary;

/// Document text a work is embedded as: its keywords followed by its abstract,
/// lower-cased.
pub fn document_text(work: &WorkSummary) -> String {
    format!(
        "{} {}",
        work.keywords.trim().to_lowercase(),
        work.abstract_text.trim().to_lowercase()
    )
    .trim()
    .to_string()
}

/// Scores works by embedding cosine similarity.
#[derive(Debug, Clone)]
pub struct EmbeddingScorer<E> {
    provider: E,
}

impl<E: EmbeddingProvider> EmbeddingScorer<E> {
    pub fn new(provider: E) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<E: EmbeddingProvider> Scorer for EmbeddingScorer<E> {
    async fn score(&self, queries: &[String], works: &[WorkSummary]) -> RerankResult<Vec<Vec<f32>>> {
        let query_refs: Vec<&str> = queries.iter().map(String::as_str).collect();
        let query_embeddings = self.provider.embed_batch(&query_refs).await?;

        // Works with no keywords and no abstract are not embedded and score 0.
        let documents: Vec<String> = works.iter().map(document_text).collect();
        let present: Vec<usize> = documents
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_empty())
            .map(|(i, _)| i)
            .collect();
        let present_refs: Vec<&str> = present.iter().map(|&i| documents[i].as_str()).collect();
        let present_embeddings = self.provider.embed_batch(&present_refs).await?;

        let mut document_embeddings: Vec<Option<&[f32]>> = vec![None; works.len()];
        for (&i, embedding) in present.iter().zip(present_embeddings.iter()) {
            document_embeddings[i] = Some(embedding.as_slice());
        }

        Ok(query_embeddings
            .iter()
            .map(|q| {
                document_embeddings
                    .iter()
                    .map(|d| d.map_or(0.0, |d| cosine_similarity(q, d)))
                    .collect()
            })
            .collect())
    }

    fn name(&self) -> &str {
        self.provider.model_name()
    }
}
