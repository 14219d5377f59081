//! Relevance reranking.
//!
//! A request is turned into a small "query space" (one text per abstract, or a
//! single keyword-only text), a [`Scorer`] produces a `queries × works` score
//! matrix, and the per-work scores are combined by an [`Aggregation`] policy
//! before a stable descending sort.
//!
//! The bi-encoder and cross-encoder paths only differ in their `Scorer`; all
//! of the plumbing here is shared.

pub mod cross_encoder;
pub mod embedding;

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::embedding::EmbeddingError;
use crate::models::{SearchRequest, WorkSummary};

pub use cross_encoder::{CrossEncoderScorer, FastEmbedCrossEncoder, PairwiseModel};
pub use embedding::EmbeddingScorer;

/// Errors that can occur while scoring candidates.
#[derive(Debug, Error)]
pub enum RerankError {
    /// Bi-encoder failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Cross-encoder could not be loaded or failed during inference
    #[error("Model error: {0}")]
    Model(String),

    /// Scorer returned a matrix that does not match its inputs
    #[error("Score matrix shape mismatch: {0}")]
    Shape(String),
}

/// Result type for rerank operations.
pub type RerankResult<T> = Result<T, RerankError>;

/// How scores from several query representations are combined per work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Arithmetic mean over query representations
    #[default]
    Mean,

    /// Best score over query representations
    Max,
}

impl Aggregation {
    /// Combine one work's scores. An empty slice combines to `0.0`.
    pub fn combine(&self, scores: &[f32]) -> f32 {
        if scores.is_empty() {
            return 0.0;
        }
        match self {
            Aggregation::Mean => scores.iter().sum::<f32>() / scores.len() as f32,
            Aggregation::Max => scores.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

/// A work together with its aggregated relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredWork {
    pub work: WorkSummary,
    pub score: f32,
}

/// Trait for relevance scorers.
///
/// # Returns
/// `score` returns one row per query and one column per work, in input order.
/// Higher means more relevant; scales differ between implementations.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, queries: &[String], works: &[WorkSummary]) -> RerankResult<Vec<Vec<f32>>>;

    /// Scorer name, for logging.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: Scorer + ?Sized> Scorer for Arc<T> {
    async fn score(&self, queries: &[String], works: &[WorkSummary]) -> RerankResult<Vec<Vec<f32>>> {
        (**self).score(queries, works).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the query representations for a request.
///
/// The keyword string is the trimmed, lower-cased keywords joined by spaces.
/// Each abstract yields `keywords + " " + abstract`; without abstracts a
/// non-empty keyword string is the single representation. Blank entries are
/// dropped.
pub fn build_query_space(request: &SearchRequest) -> Vec<String> {
    let keyword_text = request
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if request.abstracts.is_empty() {
        if keyword_text.is_empty() {
            return Vec::new();
        }
        return vec![keyword_text];
    }

    request
        .abstracts
        .iter()
        .map(|a| format!("{} {}", keyword_text, a.trim().to_lowercase()).trim().to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Score and sort `works` for `request`.
///
/// With no works or an empty query space the works come back in input order
/// with a score of `0.0` and the scorer is not invoked. Otherwise the sort is
/// stable: ties keep input order.
pub async fn rank_works<S: Scorer + ?Sized>(
    scorer: &S,
    request: &SearchRequest,
    works: Vec<WorkSummary>,
    aggregation: Aggregation,
) -> RerankResult<Vec<ScoredWork>> {
    let queries = build_query_space(request);
    if works.is_empty() || queries.is_empty() {
        return Ok(works
            .into_iter()
            .map(|work| ScoredWork { work, score: 0.0 })
            .collect());
    }

    debug!(
        "Scoring {} works against {} query representations with {}",
        works.len(),
        queries.len(),
        scorer.name()
    );
    let matrix = scorer.score(&queries, &works).await?;

    if matrix.len() != queries.len() {
        return Err(RerankError::Shape(format!(
            "expected {} rows, got {}",
            queries.len(),
            matrix.len()
        )));
    }
    if let Some(row) = matrix.iter().find(|row| row.len() != works.len()) {
        return Err(RerankError::Shape(format!(
            "expected {} columns, got {}",
            works.len(),
            row.len()
        )));
    }

    let mut scored: Vec<ScoredWork> = works
        .into_iter()
        .enumerate()
        .map(|(j, work)| {
            let column: Vec<f32> = matrix.iter().map(|row| row[j]).collect();
            ScoredWork {
                work,
                score: aggregation.combine(&column),
            }
        })
        .collect();

    scored.sort_by(|a, b| descending(a.score, b.score));
    Ok(scored)
}

// NaN sorts last so the comparator stays a total order.
fn descending(a: f32, b: f32) -> Ordering {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s };
    key(b).total_cmp(&key(a))
}

/// Rerank `works` for `request`, dropping the scores.
pub async fn rerank_with<S: Scorer + ?Sized>(
    scorer: &S,
    request: &SearchRequest,
    works: Vec<WorkSummary>,
    aggregation: Aggregation,
) -> RerankResult<Vec<WorkSummary>> {
    Ok(rank_works(scorer, request, works, aggregation)
        .await?
        .into_iter()
        .map(|scored| scored.work)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Scores a work by how many query words appear in its title.
    struct TitleOverlapScorer {
        calls: AtomicUsize,
    }

    impl TitleOverlapScorer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Scorer for TitleOverlapScorer {
        async fn score(&self, queries: &[String], works: &[WorkSummary]) -> RerankResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(queries
                .iter()
                .map(|q| {
                    works
                        .iter()
                        .map(|w| {
                            let title = w.title.to_lowercase();
                            q.split_whitespace().filter(|t| title.contains(t)).count() as f32
                        })
                        .collect()
                })
                .collect())
        }

        fn name(&self) -> &str {
            "title-overlap"
        }
    }

    /// Returns a fixed matrix regardless of input.
    struct FixedScorer(Vec<Vec<f32>>);

    #[async_trait]
    impl Scorer for FixedScorer {
        async fn score(&self, _queries: &[String], _works: &[WorkSummary]) -> RerankResult<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn work(id: &str, title: &str) -> WorkSummary {
        WorkSummary {
            id: id.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn ids(works: &[WorkSummary]) -> Vec<&str> {
        works.iter().map(|w| w.id.as_str()).collect()
    }

    #[test]
    fn test_query_space_keywords_only() {
        let request = SearchRequest::new(vec!["  Graph ".into(), "NEURAL".into()], vec![]);
        assert_eq!(build_query_space(&request), vec!["graph neural"]);
    }

    #[test]
    fn test_query_space_one_entry_per_abstract() {
        let request = SearchRequest::new(
            vec!["graph".into()],
            vec!["First Abstract ".into(), "second".into()],
        );
        assert_eq!(
            build_query_space(&request),
            vec!["graph first abstract", "graph second"]
        );
    }

    #[test]
    fn test_query_space_abstracts_without_keywords() {
        let request = SearchRequest::new(vec![], vec!["Only Abstract".into(), "  ".into()]);
        assert_eq!(build_query_space(&request), vec!["only abstract"]);
    }

    #[test]
    fn test_query_space_empty() {
        let request = SearchRequest::new(vec![], vec![]);
        assert!(build_query_space(&request).is_empty());
    }

    #[test]
    fn test_aggregation() {
        assert!((Aggregation::Mean.combine(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-6);
        assert_eq!(Aggregation::Max.combine(&[1.0, 3.0, 2.0]), 3.0);
        assert_eq!(Aggregation::Mean.combine(&[]), 0.0);
        assert_eq!(Aggregation::default(), Aggregation::Mean);
    }

    #[tokio::test]
    async fn test_rerank_five_candidates_single_keyword() {
        let scorer = TitleOverlapScorer::new();
        let request = SearchRequest::new(vec!["graph".into()], vec![]);
        let works = vec![
            work("W1", "Weather models"),
            work("W2", "Graph networks"),
            work("W3", "Protein folding"),
            work("W4", "Graph graph theory"),
            work("W5", "Random walks"),
        ];

        let ranked = rank_works(&scorer, &request, works, Aggregation::Mean).await.unwrap();
        assert_eq!(ranked.len(), 5);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));

        let got: HashSet<_> = ranked.iter().map(|s| s.work.id.clone()).collect();
        let want: HashSet<_> = ["W1", "W2", "W3", "W4", "W5"].iter().map(|s| s.to_string()).collect();
        assert_eq!(got, want);

        let order: Vec<_> = ranked.iter().map(|s| s.work.id.as_str()).collect();
        assert_eq!(order, vec!["W2", "W4", "W1", "W3", "W5"]);
    }

    #[tokio::test]
    async fn test_ties_keep_input_order() {
        let scorer = FixedScorer(vec![vec![0.5, 0.5, 0.9, 0.5]]);
        let request = SearchRequest::new(vec!["x".into()], vec![]);
        let works = vec![work("a", ""), work("b", ""), work("c", ""), work("d", "")];

        let out = rerank_with(&scorer, &request, works, Aggregation::Mean).await.unwrap();
        assert_eq!(ids(&out), vec!["c", "a", "b", "d"]);
    }

    #[tokio::test]
    async fn test_order_independent_of_input_permutation() {
        let scorer = TitleOverlapScorer::new();
        let request = SearchRequest::new(vec!["alpha beta gamma".into()], vec![]);
        let base = vec![
            work("3", "alpha beta gamma"),
            work("2", "alpha beta"),
            work("1", "alpha"),
            work("0", "none"),
        ];
        let mut reversed = base.clone();
        reversed.reverse();

        let a = rerank_with(&scorer, &request, base, Aggregation::Mean).await.unwrap();
        let b = rerank_with(&scorer, &request, reversed, Aggregation::Mean).await.unwrap();
        assert_eq!(ids(&a), vec!["3", "2", "1", "0"]);
        assert_eq!(ids(&a), ids(&b));
    }

    #[tokio::test]
    async fn test_empty_inputs_are_identity() {
        let scorer = TitleOverlapScorer::new();

        let request = SearchRequest::new(vec![], vec![]);
        let works = vec![work("b", "graph"), work("a", "other")];
        let out = rerank_with(&scorer, &request, works.clone(), Aggregation::Mean).await.unwrap();
        assert_eq!(out, works);

        let request = SearchRequest::new(vec!["graph".into()], vec![]);
        let out = rerank_with(&scorer, &request, vec![], Aggregation::Mean).await.unwrap();
        assert!(out.is_empty());

        assert_eq!(scorer.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mean_vs_max_aggregation() {
        // Two query representations; w1 is good for one, w2 is decent for both.
        let matrix = vec![vec![1.0, 0.6], vec![0.0, 0.6]];
        let request = SearchRequest::new(vec!["k".into()], vec!["a".into(), "b".into()]);
        let works = vec![work("w1", ""), work("w2", "")];

        let mean = rerank_with(&FixedScorer(matrix.clone()), &request, works.clone(), Aggregation::Mean)
            .await
            .unwrap();
        assert_eq!(ids(&mean), vec!["w2", "w1"]);

        let max = rerank_with(&FixedScorer(matrix), &request, works, Aggregation::Max)
            .await
            .unwrap();
        assert_eq!(ids(&max), vec!["w1", "w2"]);
    }

    #[tokio::test]
    async fn test_nan_scores_sort_last() {
        let scorer = FixedScorer(vec![vec![f32::NAN, 1.0, 0.0]]);
        let request = SearchRequest::new(vec!["k".into()], vec![]);
        let works = vec![work("a", ""), work("b", ""), work("c", "")];
        let out = rerank_with(&scorer, &request, works, Aggregation::Mean).await.unwrap();
        assert_eq!(ids(&out), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_error() {
        let request = SearchRequest::new(vec!["k".into()], vec![]);
        let works = vec![work("a", ""), work("b", "")];

        let short_row = FixedScorer(vec![vec![1.0]]);
        let result = rank_works(&short_row, &request, works.clone(), Aggregation::Mean).await;
        assert!(matches!(result, Err(RerankError::Shape(_))));

        let extra_row = FixedScorer(vec![vec![1.0, 2.0], vec![1.0, 2.0]]);
        let result = rank_works(&extra_row, &request, works, Aggregation::Mean).await;
        assert!(matches!(result, Err(RerankError::Shape(_))));
    }
}
