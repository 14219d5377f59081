//! Research Finder - adaptive OpenAlex search with relevance reranking.
//!
//! This library turns a loose description of a research interest (keywords
//! and example abstracts) into OpenAlex filter queries, relaxes them until
//! candidates come back, and reorders the candidates with local relevance
//! models.
//!
//! # Architecture
//!
//! - **models**: Request, response and raw OpenAlex record types
//! - **query**: Text normalization and boolean filter construction
//! - **keywords**: Key-phrase extraction from abstracts
//! - **provider**: Works providers (the OpenAlex HTTP client)
//! - **search**: Relaxation loop and the search service
//! - **assembler**: Raw record to `WorkSummary` conversion
//! - **embedding**: Text embedding providers
//! - **rerank**: Bi-encoder and cross-encoder scorers, ranking
//! - **runtime**: Lazily loaded shared models and their cache directory
//! - **config**: Layered settings
//! - **server**: HTTP API
//! - **fixture**: Offline evaluation fixtures and P@k
//!
//! # Workflow
//!
//! 1. Extract key phrases from each abstract
//! 2. Build a filter requiring `n` of the keywords, starting high
//! 3. Fetch; on an empty page lower `n` and retry
//! 4. Assemble the raw records into summaries
//! 5. Optionally rerank with the embedding or cross-encoder scorer
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use research_finder::{
//!     config::Settings,
//!     provider::OpenAlexClient,
//!     runtime::{CacheDir, ModelRegistry},
//!     search::{SearchOptions, SearchService},
//!     SearchRequest,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let cache = CacheDir::new(None)?;
//!     let registry = Arc::new(ModelRegistry::new(&settings.models, cache.path()));
//!     let client = OpenAlexClient::new(&settings.openalex)?;
//!     let service = SearchService::new(client, registry, SearchOptions::default());
//!
//!     let request = SearchRequest::new(vec!["graph neural networks".into()], vec![]);
//!     for work in service.search(&request).await?.works {
//!         println!("{}", work.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod config;
pub mod embedding;
pub mod fixture;
pub mod keywords;
pub mod models;
pub mod provider;
pub mod query;
pub mod rerank;
pub mod runtime;
pub mod search;
pub mod server;

pub use config::Settings;
pub use embedding::EmbeddingProvider;
pub use keywords::KeywordExtractor;
pub use models::{Author, RerankStrategy, SearchRequest, WorkSummary, WorksSearchResponse};
pub use provider::WorksProvider;
pub use rerank::{Aggregation, Scorer};
pub use runtime::{ModelRegistry, Reranker};
pub use search::SearchService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
