//! Keyword extraction from free-text abstracts.
//!
//! Abstracts are never sent to OpenAlex verbatim. Each one is reduced to a
//! handful of representative phrases: candidate n-grams are taken from the
//! text (stop words removed), embedded alongside the whole document, and
//! ranked by cosine similarity to it.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::embedding::{cosine_similarity, normalize_text, EmbeddingError, EmbeddingProvider};

/// Errors that can occur during keyword extraction.
#[derive(Debug, Error)]
pub enum KeywordError {
    /// The backing embedding model failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// The backing model could not be loaded
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// Result type for keyword extraction.
pub type KeywordResult<T> = Result<T, KeywordError>;

/// Trait for phrase extractors.
///
/// Implementations must be deterministic for a given model version.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    /// Extract up to `top_n` phrases from `text`, most representative first.
    async fn extract(&self, text: &str, top_n: usize) -> KeywordResult<Vec<String>>;
}

#[async_trait]
impl<T: KeywordExtractor + ?Sized> KeywordExtractor for Arc<T> {
    async fn extract(&self, text: &str, top_n: usize) -> KeywordResult<Vec<String>> {
        (**self).extract(text, top_n).await
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "et",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "however", "i", "if", "in", "into", "is", "it",
    "its", "itself", "just", "may", "me", "might", "more", "most", "must", "my", "myself", "no",
    "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
    "ourselves", "out", "over", "own", "paper", "same", "she", "should", "so", "some", "such",
    "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these",
    "they", "this", "those", "through", "thus", "to", "too", "under", "until", "up", "upon",
    "us", "using", "very", "was", "we", "were", "what", "when", "where", "whether", "which",
    "while", "who", "whom", "why", "will", "with", "within", "without", "would", "you", "your",
    "yours", "yourself", "yourselves",
];

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Regex is a literal known to compile.
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("token regex literal is valid"))
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Candidate phrases of 1 to `max_ngram` words, in first-seen order.
///
/// Tokens are lower-cased words of at least two characters; stop words are
/// removed before n-grams are formed.
pub fn candidate_phrases(text: &str, max_ngram: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| !is_stop_word(t))
        .collect();

    let mut seen = HashSet::new();
    let mut phrases = Vec::new();
    for n in 1..=max_ngram.max(1) {
        for window in tokens.windows(n) {
            let phrase = window.join(" ");
            if seen.insert(phrase.clone()) {
                phrases.push(phrase);
            }
        }
    }
    phrases
}

/// Embedding-based phrase extractor.
///
/// Scores every candidate phrase by cosine similarity between its embedding
/// and the embedding of the whole text. Ties keep first-seen order.
#[derive(Debug, Clone)]
pub struct EmbeddingKeywordExtractor<E> {
    provider: E,
    max_ngram: usize,
}

impl<E: EmbeddingProvider> EmbeddingKeywordExtractor<E> {
    /// Create an extractor producing phrases of up to two words.
    pub fn new(provider: E) -> Self {
        Self {
            provider,
            max_ngram: 2,
        }
    }

    /// Set the longest candidate phrase length in words.
    pub fn with_max_ngram(mut self, max_ngram: usize) -> Self {
        self.max_ngram = max_ngram.max(1);
        self
    }
}

#[async_trait]
impl<E: EmbeddingProvider> KeywordExtractor for EmbeddingKeywordExtractor<E> {
    async fn extract(&self, text: &str, top_n: usize) -> KeywordResult<Vec<String>> {
        let document = normalize_text(text);
        if document.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let candidates = candidate_phrases(&document, self.max_ngram);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let document_embedding = self.provider.embed(&document).await?;
        let refs: Vec<&str> = candidates.iter().map(String::as_str).collect();
        let candidate_embeddings = self.provider.embed_batch(&refs).await?;

        let mut scored: Vec<(usize, f32)> = candidate_embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(&document_embedding, e)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_n)
            .map(|(i, _)| candidates[i].clone())
            .collect())
    }
}
