//! Adaptive search.
//!
//! A request is turned into filter parameters (keywords capped, abstracts
//! reduced to extracted phrases) and then fetched under progressively looser
//! keyword-match requirements until OpenAlex returns something:
//!
//! ```text
//! Attempting(max(1, kw - 1)) --empty--> Attempting(n - 1) --empty--> ... --> Exhausted
//!            |                                  |
//!         results                            results
//!            v                                  v
//!          Found                              Found
//! ```
//!
//! Only the keyword clause is relaxed; abstract phrases are always OR-ed and
//! dates and types always apply.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assembler::assemble_all;
use crate::config::SearchSettings;
use crate::keywords::KeywordExtractor;
use crate::models::{RawWork, SearchRequest, WorkSummary};
use crate::provider::{ProviderError, WorksProvider};
use crate::query::{build_filter, FilterParams};

/// Keywords beyond this many are ignored.
pub const MAX_KEYWORDS: usize = 5;

/// Extracted abstract phrases kept across all abstracts.
pub const MAX_ABSTRACT_TERMS: usize = 9;

/// Phrases requested from the extractor per abstract.
pub const PHRASES_PER_ABSTRACT: usize = 10;

/// Abstracts with fewer words are skipped.
pub const MIN_ABSTRACT_WORDS: usize = 3;

/// Page size when neither the request nor the settings give one.
pub const DEFAULT_PAGE_SIZE: usize = 40;

/// Errors that can occur during a search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The candidate fetcher could not answer
    #[error("Upstream error: {0}")]
    Upstream(#[from] ProviderError),
}

/// Result type for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// State of the relaxation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationState {
    /// Fetch with this many keywords required per match
    Attempting(usize),
    Found,
    Exhausted,
}

impl RelaxationState {
    /// Initial state for a request with `keyword_count` keywords.
    pub fn start(keyword_count: usize) -> Self {
        RelaxationState::Attempting(keyword_count.saturating_sub(1).max(1))
    }

    /// Transition after an attempt that did (or did not) return results.
    pub fn next(self, found: bool) -> Self {
        match self {
            RelaxationState::Attempting(_) if found => RelaxationState::Found,
            RelaxationState::Attempting(n) if n > 1 => RelaxationState::Attempting(n - 1),
            RelaxationState::Attempting(_) => RelaxationState::Exhausted,
            terminal => terminal,
        }
    }
}

/// What the relaxation loop fetched and how it got there.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationOutcome {
    /// Records from the successful attempt, empty if exhausted
    pub works: Vec<RawWork>,
    /// Match count of the successful attempt
    pub matched_at: Option<usize>,
    /// Number of fetches issued
    pub attempts: usize,
}

/// Run the relaxation loop.
///
/// Issues at most `max(1, keywords - 1)` fetches, each a single page. A
/// fetch error stops the loop and is returned as is.
pub async fn relax<P: WorksProvider + ?Sized>(
    provider: &P,
    base: &FilterParams,
    page_size: usize,
) -> Result<RelaxationOutcome, ProviderError> {
    let mut state = RelaxationState::start(base.keywords.len());
    let mut outcome = RelaxationOutcome {
        works: Vec::new(),
        matched_at: None,
        attempts: 0,
    };

    while let RelaxationState::Attempting(n) = state {
        let filter = build_filter(&base.with_min_match_count(n));
        outcome.attempts += 1;
        debug!("Attempt {} (min_match={}): filter={}", outcome.attempts, n, filter);

        let batch = provider.fetch(&filter, page_size, 1).await?;
        let found = !batch.is_empty();
        if found {
            outcome.works = batch;
            outcome.matched_at = Some(n);
        }
        state = state.next(found);
    }

    Ok(outcome)
}

/// Reduce abstracts to a deduplicated list of extracted phrases.
///
/// Short abstracts are skipped, as is any abstract the extractor fails on.
/// Phrases keep first-seen order; at most [`MAX_ABSTRACT_TERMS`] are kept.
pub async fn extract_abstract_terms<K: KeywordExtractor + ?Sized>(
    extractor: &K,
    abstracts: &[String],
) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();

    for text in abstracts {
        if terms.len() >= MAX_ABSTRACT_TERMS {
            break;
        }
        if text.split_whitespace().count() < MIN_ABSTRACT_WORDS {
            continue;
        }

        let phrases = match extractor.extract(text, PHRASES_PER_ABSTRACT).await {
            Ok(phrases) => phrases,
            Err(e) => {
                warn!("Skipping abstract, keyword extraction failed: {}", e);
                continue;
            }
        };

        for phrase in phrases {
            if terms.len() >= MAX_ABSTRACT_TERMS {
                break;
            }
            if !terms.contains(&phrase) {
                terms.push(phrase);
            }
        }
    }

    terms
}

/// Search behaviour not carried by the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub page_size: usize,
    pub exact_no_stem: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            exact_no_stem: false,
        }
    }
}

impl From<&SearchSettings> for SearchOptions {
    fn from(settings: &SearchSettings) -> Self {
        Self {
            page_size: settings.page_size,
            exact_no_stem: settings.exact_no_stem,
        }
    }
}

/// Assembled results of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub works: Vec<WorkSummary>,
    pub matched_at: Option<usize>,
    pub attempts: usize,
}

/// Candidate search over a provider, with phrase extraction for abstracts.
pub struct SearchService<P, K> {
    provider: P,
    extractor: K,
    options: SearchOptions,
}

impl<P, K> SearchService<P, K>
where
    P: WorksProvider,
    K: KeywordExtractor,
{
    pub fn new(provider: P, extractor: K, options: SearchOptions) -> Self {
        Self {
            provider,
            extractor,
            options,
        }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// Build the un-relaxed filter parameters for a request.
    pub async fn prepare(&self, request: &SearchRequest) -> FilterParams {
        let keywords: Vec<String> = request.keywords.iter().take(MAX_KEYWORDS).cloned().collect();
        let abstract_terms = if request.abstracts.is_empty() {
            Vec::new()
        } else {
            extract_abstract_terms(&self.extractor, &request.abstracts).await
        };

        FilterParams {
            keywords,
            abstract_terms,
            start_date: request.start_date.clone(),
            end_date: request.end_date.clone(),
            work_types: request.work_types.clone(),
            exact_no_stem: self.options.exact_no_stem,
            ..FilterParams::default()
        }
    }

    /// Fetch and assemble candidates for a request.
    ///
    /// An exhausted search is an empty, successful outcome.
    ///
    /// # Errors
    /// Returns `SearchError::Upstream` if a fetch fails
    pub async fn search(&self, request: &SearchRequest) -> SearchResult<SearchOutcome> {
        let params = self.prepare(request).await;
        let page_size = request.page_size.unwrap_or(self.options.page_size);

        info!(
            "Searching {} with {} keywords and {} abstract terms",
            self.provider.name(),
            params.keywords.len(),
            params.abstract_terms.len()
        );

        let outcome = relax(&self.provider, &params, page_size).await?;
        match outcome.matched_at {
            Some(n) => info!(
                "Found {} works at min_match={} after {} attempts",
                outcome.works.len(),
                n,
                outcome.attempts
            ),
            None => info!("No works found after {} attempts", outcome.attempts),
        }

        Ok(SearchOutcome {
            works: assemble_all(outcome.works),
            matched_at: outcome.matched_at,
            attempts: outcome.attempts,
        })
    }
}
