//! Embedding provider abstraction.
//!
//! This module defines the interface for text embedding generation used by the
//! bi-encoder reranker and the keyword extractor, along with the text
//! normalization and similarity helpers both rely on.
//!
//! The abstraction allows swapping the local fastembed model for a test double
//! (or another backend) without touching the scoring logic.

pub mod fastembed;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Invalid input text (e.g., empty)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Model could not be loaded or configured
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Inference failed
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors map text to fixed-size vectors whose cosine similarity
/// approximates semantic relevance. The trait is async so implementations can
/// hold their model behind an async lock.
///
/// # Example Usage
/// ```ignore
/// let provider = FastEmbedProvider::new(None, None)?;
/// let text = normalize_text("Graph Neural Networks");
/// let embedding = provider.embed(&text).await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError::InvalidInput` for blank text, or another
    /// variant if inference fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single batch.
    ///
    /// # Returns
    /// One vector per input, in input order
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any text is blank or inference fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Number of dimensions in produced vectors.
    fn dimension(&self) -> usize;

    /// Identifier of the underlying model.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Normalizes text for consistent embedding generation.
///
/// Lower-cases, trims and collapses runs of whitespace to a single space.
///
/// # Example
/// ```
/// use research_finder::embedding::normalize_text;
/// assert_eq!(normalize_text("  Hello   World  "), "hello world");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cosine similarity between two vectors.
///
/// Returns `0.0` when the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
