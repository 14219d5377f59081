//! Candidate provider module.
//!
//! This module defines the interface for fetching candidate works given a
//! filter expression, and the OpenAlex implementation used in production.
//!
//! The `WorksProvider` trait keeps the relaxation loop independent of the HTTP
//! transport, so tests can drive it with scripted providers.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::RawWork;
use crate::query::FilterExpression;

pub mod openalex;

pub use openalex::OpenAlexClient;

/// Errors that can occur when fetching works from a provider.
///
/// Every variant means "the upstream could not answer"; an empty result set is
/// never an error.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network or connection error after retries were exhausted
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Upstream kept rate-limiting after retries were exhausted
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status}: {body}")]
    StatusError { status: u16, body: String },

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Trait for sourcing candidate works.
///
/// # Design Notes
///
/// - Implementations own retries, backoff and rate-limit handling
/// - `page_size` is a hint; implementations clamp it to what the upstream accepts
/// - Records come back in upstream order (relevance order for OpenAlex)
#[async_trait]
pub trait WorksProvider: Send + Sync {
    /// Fetch up to `max_pages` pages of works matching `filter`.
    ///
    /// An empty filter means an unfiltered fetch.
    ///
    /// # Errors
    /// Returns `ProviderError` if the upstream is unreachable, keeps failing,
    /// or returns an undecodable body
    async fn fetch(
        &self,
        filter: &FilterExpression,
        page_size: usize,
        max_pages: usize,
    ) -> ProviderResult<Vec<RawWork>>;

    /// Human-readable provider name, for logging.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: WorksProvider + ?Sized> WorksProvider for std::sync::Arc<T> {
    async fn fetch(
        &self,
        filter: &FilterExpression,
        page_size: usize,
        max_pages: usize,
    ) -> ProviderResult<Vec<RawWork>> {
        (**self).fetch(filter, page_size, max_pages).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
