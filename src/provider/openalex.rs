//! OpenAlex `/works` client.
//!
//! Sends filtered, relevance-sorted requests with retry and exponential
//! backoff on transport errors and 429/5xx responses, honors `Retry-After` on
//! rate limiting, clamps the page size to the API's 1..=200 range and walks
//! pages until a short page or the page cap.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ProviderError, ProviderResult, WorksProvider};
use crate::assembler::OPENALEX_SELECT_FIELDS;
use crate::config::OpenAlexSettings;
use crate::models::RawWork;
use crate::query::FilterExpression;

/// Largest page OpenAlex serves.
pub const MAX_PAGE_SIZE: usize = 200;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF_SECS: f64 = 60.0;

const RETRYABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Clamp a requested page size to the range OpenAlex accepts.
pub fn clamp_page_size(page_size: usize) -> usize {
    page_size.clamp(1, MAX_PAGE_SIZE)
}

/// One page of the `/works` response.
///
/// Records stay as JSON until [`WorksPage::into_works`] so that one malformed
/// record cannot fail the page.
#[derive(Debug, Deserialize)]
pub struct WorksPage {
    #[serde(default)]
    pub meta: Option<serde_json::Value>,

    #[serde(default)]
    pub results: Option<Vec<serde_json::Value>>,
}

impl WorksPage {
    /// Decode every record, defaulting fields that do not parse.
    pub fn into_works(self) -> Vec<RawWork> {
        self.results
            .unwrap_or_default()
            .into_iter()
            .map(RawWork::from_json_lenient)
            .collect()
    }
}

/// HTTP client for the OpenAlex API.
#[derive(Debug, Clone)]
pub struct OpenAlexClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    backoff_factor: f64,
    mailto: Option<String>,
}

impl OpenAlexClient {
    /// Build a client from settings.
    ///
    /// # Errors
    /// Returns `ProviderError::ConfigError` if the base URL is empty or the
    /// HTTP client cannot be constructed
    pub fn new(settings: &OpenAlexSettings) -> ProviderResult<Self> {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ProviderError::ConfigError("base_url cannot be empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("research-finder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            max_retries: settings.max_retries,
            backoff_factor: settings.backoff_factor,
            mailto: settings.mailto.clone().filter(|m| !m.is_empty()),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff_factor.is_nan() || self.backoff_factor <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = (self.backoff_factor * 2f64.powi(exponent)).min(MAX_BACKOFF_SECS);
        let jitter = rand::random::<u64>() % 50;
        Duration::from_secs_f64(secs) + Duration::from_millis(jitter)
    }

    fn retry_after(response: &reqwest::Response) -> Option<Duration> {
        let secs = response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;
        Some(Duration::from_secs(secs.clamp(1, 5)))
    }

    async fn get_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> ProviderResult<reqwest::Response> {
        let mut attempt = 0u32;

        loop {
            match self.http.get(url).query(params).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if RETRYABLE_STATUSES.contains(&response.status())
                        && attempt < self.max_retries =>
                {
                    let delay = if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        Self::retry_after(&response).unwrap_or_else(|| self.backoff_delay(attempt))
                    } else {
                        self.backoff_delay(attempt)
                    };
                    warn!(
                        "OpenAlex returned {} (attempt {}), retrying in {:?}",
                        response.status(),
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => {
                    let status = response.status();
                    let body: String = response
                        .text()
                        .await
                        .unwrap_or_default()
                        .chars()
                        .take(500)
                        .collect();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(ProviderError::RateLimitExceeded(body));
                    }
                    return Err(ProviderError::StatusError {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "OpenAlex request failed (attempt {}): {}, retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(ProviderError::NetworkError(e.to_string())),
            }
            attempt += 1;
        }
    }

    /// Fetch a single page of works.
    pub async fn works_page(
        &self,
        filter: &FilterExpression,
        page: usize,
        per_page: usize,
    ) -> ProviderResult<WorksPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("per-page", clamp_page_size(per_page).to_string()),
            ("sort", "relevance_score:desc".to_string()),
            ("select", OPENALEX_SELECT_FIELDS.to_string()),
        ];
        if !filter.is_empty() {
            params.push(("filter", filter.to_string()));
        }
        if let Some(mailto) = &self.mailto {
            params.push(("mailto", mailto.clone()));
        }

        let url = format!("{}/works", self.base_url);
        debug!("GET {} page={} filter={}", url, page, filter);

        let response = self.get_with_retry(&url, &params).await?;
        response
            .json::<WorksPage>()
            .await
            .map_err(|e| ProviderError::ParseError(format!("Failed to decode JSON from OpenAlex: {}", e)))
    }
}

#[async_trait]
impl WorksProvider for OpenAlexClient {
    async fn fetch(
        &self,
        filter: &FilterExpression,
        page_size: usize,
        max_pages: usize,
    ) -> ProviderResult<Vec<RawWork>> {
        let per_page = clamp_page_size(page_size);
        let max_pages = max_pages.max(1);
        let mut works = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.works_page(filter, page, per_page).await?.into_works();
            let short_page = batch.len() < per_page;
            works.extend(batch);
            if short_page || page >= max_pages {
                break;
            }
            page += 1;
        }

        Ok(works)
    }

    fn name(&self) -> &str {
        "openalex"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: &str, max_retries: u32) -> OpenAlexSettings {
        OpenAlexSettings {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            max_retries,
            backoff_factor: 0.0,
            mailto: None,
        }
    }

    fn page_body(ids: &[&str]) -> serde_json::Value {
        let results: Vec<_> = ids
            .iter()
            .map(|id| json!({"id": id, "display_name": format!("Title {}", id)}))
            .collect();
        json!({"meta": {"count": ids.len()}, "results": results})
    }

    #[test]
    fn test_clamp_page_size() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(40), 40);
        assert_eq!(clamp_page_size(500), 200);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let mut s = settings("http://localhost", 0);
        s.backoff_factor = 0.5;
        let client = OpenAlexClient::new(&s).unwrap();
        assert!(client.backoff_delay(0) < Duration::from_secs(1));
        assert!(client.backoff_delay(5000) <= Duration::from_secs(61));

        s.backoff_factor = f64::INFINITY;
        let client = OpenAlexClient::new(&s).unwrap();
        assert!(client.backoff_delay(3) <= Duration::from_secs(61));

        s.backoff_factor = 0.0;
        let client = OpenAlexClient::new(&s).unwrap();
        assert_eq!(client.backoff_delay(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = OpenAlexClient::new(&settings("", 0));
        assert!(matches!(result, Err(ProviderError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_fetch_sends_filter_and_select() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("filter", "title_and_abstract.search:(\"graph\")"))
            .and(query_param("select", OPENALEX_SELECT_FIELDS))
            .and(query_param("sort", "relevance_score:desc"))
            .and(query_param("per-page", "40"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["W1", "W2"])))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let filter = FilterExpression::new("title_and_abstract.search:(\"graph\")".to_string());
        let works = client.fetch(&filter, 40, 1).await.unwrap();

        let ids: Vec<_> = works.iter().map(|w| w.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["W1", "W2"]);
    }

    #[tokio::test]
    async fn test_fetch_paginates_until_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["W1", "W2"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["W3"])))
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let works = client.fetch(&FilterExpression::default(), 2, 10).await.unwrap();
        assert_eq!(works.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_respects_max_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["W1", "W2"])))
            .expect(2)
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let works = client.fetch(&FilterExpression::default(), 2, 2).await.unwrap();
        assert_eq!(works.len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_clamps_page_size() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("per-page", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&[])))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let works = client.fetch(&FilterExpression::default(), 1000, 3).await.unwrap();
        assert!(works.is_empty());
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["W1"])))
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 3)).unwrap();
        let works = client.fetch(&FilterExpression::default(), 20, 1).await.unwrap();
        assert_eq!(works.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .expect(3)
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 2)).unwrap();
        let result = client.fetch(&FilterExpression::default(), 20, 1).await;
        match result {
            Err(ProviderError::StatusError { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("upstream down"));
            }
            other => panic!("Expected StatusError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad filter"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 3)).unwrap();
        let result = client.fetch(&FilterExpression::default(), 20, 1).await;
        assert!(matches!(result, Err(ProviderError::StatusError { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_rate_limit_honors_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["W9"])))
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 1)).unwrap();
        let started = std::time::Instant::now();
        let works = client.fetch(&FilterExpression::default(), 20, 1).await.unwrap();
        assert_eq!(works.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let result = client.fetch(&FilterExpression::default(), 20, 1).await;
        assert!(matches!(result, Err(ProviderError::RateLimitExceeded(_))));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let result = client.fetch(&FilterExpression::default(), 20, 1).await;
        assert!(matches!(result, Err(ProviderError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_fail_page() {
        let server = MockServer::start().await;
        let body = json!({
            "results": [
                {"id": "W1", "display_name": "Clean"},
                {"id": "W2", "publication_year": "2020",
                 "abstract_inverted_index": {"bad": [-1], "ok": [0]}},
                "not a record",
                {"id": "W3", "publication_year": 2021}
            ]
        });
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = OpenAlexClient::new(&settings(&server.uri(), 0)).unwrap();
        let works = client.fetch(&FilterExpression::default(), 20, 1).await.unwrap();

        assert_eq!(works.len(), 4);
        assert_eq!(works[0].id.as_deref(), Some("W1"));
        assert_eq!(works[1].id.as_deref(), Some("W2"));
        assert!(works[1].publication_year.is_none());
        assert_eq!(
            crate::assembler::decode_inverted_index(works[1].abstract_inverted_index.as_ref()),
            "ok"
        );
        assert_eq!(works[2], RawWork::default());
        assert_eq!(works[3].publication_year, Some(2021));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let client = OpenAlexClient::new(&settings("http://127.0.0.1:1", 0)).unwrap();
        let result = client.fetch(&FilterExpression::default(), 20, 1).await;
        assert!(matches!(result, Err(ProviderError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_mailto_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("mailto", "dev@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&[])))
            .expect(1)
            .mount(&server)
            .await;

        let mut s = settings(&server.uri(), 0);
        s.mailto = Some("dev@example.org".to_string());
        let client = OpenAlexClient::new(&s).unwrap();
        client.fetch(&FilterExpression::default(), 20, 1).await.unwrap();
    }
}
