//! Query synthesis.
//!
//! This module turns keyword and abstract-term lists into OpenAlex filter
//! expressions. Terms are normalized by [`text`] and combined by [`filter`];
//! the relaxation loop in [`crate::search`] rebuilds the filter with a lower
//! `min_match_count` until results come back.
//!
//! # Usage
//!
//! ```
//! use research_finder::query::filter::{build_filter, FilterParams};
//!
//! let params = FilterParams {
//!     keywords: vec!["A".into(), "B".into(), "C".into()],
//!     min_match_count: 2,
//!     ..FilterParams::default()
//! };
//! let filter = build_filter(&params);
//! assert_eq!(
//!     filter.as_str(),
//!     r#"title_and_abstract.search:(("A" AND "B") OR ("A" AND "C") OR ("B" AND "C"))"#
//! );
//! ```

pub mod filter;
pub mod text;

use std::fmt;

pub use filter::{build_filter, combinatorial_join, or_join, FilterParams};
pub use text::{quote_term, sanitize_term};

/// An OpenAlex filter string.
///
/// Opaque to everything except the builder that produced it and the client
/// that sends it. An empty expression means an unfiltered fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FilterExpression(String);

impl FilterExpression {
    pub fn new(expr: String) -> Self {
        Self(expr)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
