//! Core data models for the research finder.
//!
//! This module contains the request and response types shared by the search
//! pipeline, the rerankers and the HTTP API, plus the raw OpenAlex record
//! shapes consumed by the result assembler.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Which relevance model reorders the candidates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategy {
    /// Bi-encoder cosine similarity between query and document embeddings
    Embedding,

    /// Pairwise cross-encoder logits
    CrossEncoder,
}

/// A caller's description of a research interest.
///
/// Keywords are matched against title and abstract, abstracts are converted to
/// extracted phrases and matched against the abstract only. Both lists keep
/// caller order. Leaving both empty produces an unfiltered fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    /// Keywords searched in title and abstract
    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,

    /// Free-text abstracts describing the interest
    #[serde(default, deserialize_with = "null_as_default")]
    pub abstracts: Vec<String>,

    /// Start publication date (YYYY-MM-DD), forwarded verbatim
    #[serde(default)]
    pub start_date: Option<String>,

    /// End publication date (YYYY-MM-DD), forwarded verbatim
    #[serde(default)]
    pub end_date: Option<String>,

    /// Page size hint for each fetch attempt
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Optional allow-list of OpenAlex work types (e.g. "article")
    #[serde(default, deserialize_with = "null_as_default")]
    pub work_types: Vec<String>,

    /// Rerank the fetched candidates with this strategy
    #[serde(default)]
    pub rerank: Option<RerankStrategy>,
}

impl SearchRequest {
    /// Create a request from keyword and abstract lists with no other constraints.
    pub fn new(keywords: Vec<String>, abstracts: Vec<String>) -> Self {
        Self {
            keywords,
            abstracts,
            ..Self::default()
        }
    }

    /// Whether the request carries any textual query signal.
    pub fn has_terms(&self) -> bool {
        self.keywords.iter().any(|k| !k.trim().is_empty())
            || self.abstracts.iter().any(|a| !a.trim().is_empty())
    }
}

/// One author of a work, flattened from an OpenAlex authorship.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    /// Display name of the author
    pub name: String,

    /// First listed institution, if any
    #[serde(default)]
    pub affiliation: Option<String>,
}

/// Internal summary of one candidate document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkSummary {
    /// OpenAlex identifier (URL form)
    #[serde(default)]
    pub id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Comma-joined concept names
    #[serde(default)]
    pub keywords: String,

    /// Abstract reconstructed from the inverted index
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,

    /// Year of publication
    #[serde(default)]
    pub publication_year: Option<i32>,

    /// Authors in byline order
    #[serde(default, deserialize_with = "null_as_default")]
    pub authors: Vec<Author>,
}

/// Results envelope returned by every search and rerank operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorksSearchResponse {
    /// Works in ranked order
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<WorkSummary>,
}

impl WorksSearchResponse {
    pub fn new(results: Vec<WorkSummary>) -> Self {
        Self { results }
    }

    /// Identifiers in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|w| w.id.as_str()).collect()
    }
}

/// A concept attached to a raw OpenAlex work.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawConcept {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub score: Option<f64>,
}

/// Author reference inside a raw authorship.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawAuthorRef {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,
}

/// Institution reference inside a raw authorship.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawInstitution {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One entry of a raw work's `authorships` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawAuthorship {
    #[serde(default)]
    pub author_position: Option<String>,

    #[serde(default)]
    pub author: Option<RawAuthorRef>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub institutions: Vec<RawInstitution>,
}

/// A work record as returned by the OpenAlex `/works` endpoint.
///
/// Every field is optional; the assembler supplies defaults so that one
/// partial record never aborts a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawWork {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub concepts: Option<Vec<RawConcept>>,

    /// Abstract encoded as word → zero-based positions
    #[serde(default)]
    pub abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,

    #[serde(default)]
    pub publication_year: Option<i32>,

    #[serde(default)]
    pub authorships: Option<Vec<RawAuthorship>>,
}

/// Take `key` out of a record, dropping it with a warning if it has the wrong shape.
fn lenient_field<T: DeserializeOwned>(record: &mut Map<String, Value>, key: &str) -> Option<T> {
    match record.remove(key)? {
        Value::Null => None,
        value => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Ignoring malformed OpenAlex field {}: {}", key, e);
                None
            }
        },
    }
}

/// Keep the well-formed entries of an inverted index.
///
/// Words whose value is not a list are dropped; within a list, positions that
/// are not non-negative integers are dropped.
fn lenient_inverted_index(value: Value) -> Option<HashMap<String, Vec<usize>>> {
    let Value::Object(entries) = value else {
        if !value.is_null() {
            warn!("Ignoring malformed OpenAlex field abstract_inverted_index");
        }
        return None;
    };

    let mut dropped = 0usize;
    let index: HashMap<String, Vec<usize>> = entries
        .into_iter()
        .filter_map(|(word, positions)| {
            let Value::Array(positions) = positions else {
                dropped += 1;
                return None;
            };
            let kept: Vec<usize> = positions
                .iter()
                .filter_map(|p| p.as_u64().and_then(|p| usize::try_from(p).ok()))
                .collect();
            dropped += positions.len() - kept.len();
            Some((word, kept))
        })
        .collect();

    if dropped > 0 {
        warn!("Dropped {} malformed abstract_inverted_index entries", dropped);
    }
    Some(index)
}

impl RawWork {
    /// Decode one record field by field.
    ///
    /// A field of the wrong type becomes `None` instead of failing the record,
    /// and a non-object record becomes an empty one.
    pub fn from_json_lenient(value: Value) -> Self {
        let Value::Object(mut record) = value else {
            warn!("Ignoring OpenAlex record that is not an object");
            return Self::default();
        };

        Self {
            id: lenient_field(&mut record, "id"),
            display_name: lenient_field(&mut record, "display_name"),
            concepts: lenient_field(&mut record, "concepts"),
            abstract_inverted_index: record
                .remove("abstract_inverted_index")
                .and_then(lenient_inverted_index),
            publication_year: lenient_field(&mut record, "publication_year"),
            authorships: lenient_field(&mut record, "authorships"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_accepts_nulls() {
        let json = r#"{"keywords": null, "abstracts": ["deep nets"], "start_date": null}"#;
        let req: SearchRequest = serde_json::from_str(json).unwrap();
        assert!(req.keywords.is_empty());
        assert_eq!(req.abstracts, vec!["deep nets".to_string()]);
        assert!(req.start_date.is_none());
        assert!(req.rerank.is_none());
    }

    #[test]
    fn test_search_request_rerank_strategy() {
        let json = r#"{"keywords": ["a"], "rerank": "cross_encoder"}"#;
        let req: SearchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.rerank, Some(RerankStrategy::CrossEncoder));
    }

    #[test]
    fn test_has_terms() {
        assert!(!SearchRequest::default().has_terms());
        assert!(!SearchRequest::new(vec!["  ".into()], vec![]).has_terms());
        assert!(SearchRequest::new(vec![], vec!["text".into()]).has_terms());
    }

    #[test]
    fn test_work_summary_abstract_field_name() {
        let work = WorkSummary {
            id: "W1".into(),
            abstract_text: "body".into(),
            ..WorkSummary::default()
        };
        let value = serde_json::to_value(&work).unwrap();
        assert_eq!(value["abstract"], "body");
        assert!(value.get("abstract_text").is_none());
    }

    #[test]
    fn test_raw_work_tolerates_missing_fields() {
        let raw: RawWork = serde_json::from_str(r#"{"id": "https://openalex.org/W1"}"#).unwrap();
        assert_eq!(raw.id.as_deref(), Some("https://openalex.org/W1"));
        assert!(raw.display_name.is_none());
        assert!(raw.abstract_inverted_index.is_none());
    }

    #[test]
    fn test_lenient_record_defaults_bad_fields() {
        let value = serde_json::json!({
            "id": "https://openalex.org/W2",
            "display_name": 42,
            "publication_year": "2020",
            "concepts": [{"display_name": "Graph"}],
            "abstract_inverted_index": {
                "graphs": [0, -1],
                "are": [1, "two"],
                "everywhere": "3",
                "now": [2]
            }
        });
        let raw = RawWork::from_json_lenient(value);
        assert_eq!(raw.id.as_deref(), Some("https://openalex.org/W2"));
        assert!(raw.display_name.is_none());
        assert!(raw.publication_year.is_none());
        assert_eq!(raw.concepts.map(|c| c.len()), Some(1));

        let index = raw.abstract_inverted_index.unwrap();
        assert_eq!(index["graphs"], vec![0]);
        assert_eq!(index["are"], vec![1]);
        assert_eq!(index["now"], vec![2]);
        assert!(!index.contains_key("everywhere"));
    }

    #[test]
    fn test_lenient_record_non_object() {
        assert_eq!(RawWork::from_json_lenient(serde_json::json!("W1")), RawWork::default());
        assert_eq!(RawWork::from_json_lenient(Value::Null), RawWork::default());
    }
}
