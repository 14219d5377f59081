//! HTTP API.
//!
//! Exposes the adaptive search, two rerank-only endpoints used by offline
//! evaluation, and a health probe:
//!
//! | Method | Path                                               | Body                          |
//! |--------|----------------------------------------------------|-------------------------------|
//! | POST   | `/api/works/search`                                | `SearchRequest`               |
//! | POST   | `/api/__test__/rerank_only_sentence_transformer`   | `{ query, works }`            |
//! | POST   | `/api/__test__/rerank_only_cross_encoder`          | `{ query, works }`            |
//! | GET    | `/health`                                          |                               |
//!
//! Every successful response is a `{ "results": [...] }` envelope. Failures
//! are `{ "detail": "..." }` with 502 for upstream errors and 500 for model
//! errors.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use crate::keywords::KeywordExtractor;
use crate::models::{RerankStrategy, SearchRequest, WorksSearchResponse};
use crate::provider::WorksProvider;
use crate::runtime::{RegistryError, Reranker};
use crate::search::{SearchError, SearchService};

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// OpenAlex could not answer
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A relevance model failed to load or score
    #[error("Model error: {0}")]
    Model(String),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

impl From<SearchError> for ServerError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Upstream(e) => ServerError::Upstream(e.to_string()),
        }
    }
}

impl From<RegistryError> for ServerError {
    fn from(err: RegistryError) -> Self {
        ServerError::Model(err.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("Request failed: {}", self);
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Search service as the server holds it: provider and extractor erased.
pub type DynSearchService = SearchService<Arc<dyn WorksProvider>, Arc<dyn KeywordExtractor>>;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<DynSearchService>,
    pub reranker: Arc<dyn Reranker>,
}

impl AppState {
    pub fn new(search: DynSearchService, reranker: Arc<dyn Reranker>) -> Self {
        Self {
            search: Arc::new(search),
            reranker,
        }
    }
}

/// Body of the rerank-only endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankOnlyRequest {
    pub query: SearchRequest,
    pub works: WorksSearchResponse,
}

/// Build the application router.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/works/search", post(search_works))
        .route(
            "/api/__test__/rerank_only_sentence_transformer",
            post(rerank_only_embedding),
        )
        .route(
            "/api/__test__/rerank_only_cross_encoder",
            post(rerank_only_cross_encoder),
        )
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn search_works(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> ServerResult<Json<WorksSearchResponse>> {
    let outcome = state.search.search(&request).await?;
    let works = match request.rerank {
        Some(strategy) => state.reranker.rerank(strategy, &request, outcome.works).await?,
        None => outcome.works,
    };
    info!("Returning {} works", works.len());
    Ok(Json(WorksSearchResponse::new(works)))
}

async fn rerank_only(
    state: &AppState,
    strategy: RerankStrategy,
    body: RerankOnlyRequest,
) -> ServerResult<Json<WorksSearchResponse>> {
    let works = state
        .reranker
        .rerank(strategy, &body.query, body.works.results)
        .await?;
    Ok(Json(WorksSearchResponse::new(works)))
}

async fn rerank_only_embedding(
    State(state): State<AppState>,
    Json(body): Json<RerankOnlyRequest>,
) -> ServerResult<Json<WorksSearchResponse>> {
    rerank_only(&state, RerankStrategy::Embedding, body).await
}

async fn rerank_only_cross_encoder(
    State(state): State<AppState>,
    Json(body): Json<RerankOnlyRequest>,
) -> ServerResult<Json<WorksSearchResponse>> {
    rerank_only(&state, RerankStrategy::CrossEncoder, body).await
}
