//! Boolean filter construction for the OpenAlex `/works` endpoint.
//!
//! A filter is a comma-separated list of fielded clauses (OpenAlex treats the
//! comma as AND). Inside the keyword clause terms are combined
//! combinatorially: every group of `r` keywords is AND-ed and the groups are
//! OR-ed, so lowering `min_match_count` widens recall without the caller
//! supplying a different query.

use itertools::Itertools;

use super::text::quote_term;
use super::FilterExpression;

/// Field searched by keywords (title and abstract).
pub const KEYWORD_FIELD: &str = "title_and_abstract.search";

/// Field searched by abstract-derived phrases.
pub const ABSTRACT_FIELD: &str = "abstract.search";

/// Inputs to [`build_filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    /// Keywords joined combinatorially
    pub keywords: Vec<String>,

    /// Abstract-derived phrases joined with plain OR
    pub abstract_terms: Vec<String>,

    /// Lower publication date bound, forwarded verbatim
    pub start_date: Option<String>,

    /// Upper publication date bound, forwarded verbatim
    pub end_date: Option<String>,

    /// Allowed work types
    pub work_types: Vec<String>,

    /// Language code filter (e.g. "en")
    pub language: Option<String>,

    /// Open-access filter
    pub is_oa: Option<bool>,

    /// Minimum number of keywords that must co-occur in one AND-group
    pub min_match_count: usize,

    /// Use the `.no_stem` variants of the search fields
    pub exact_no_stem: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            abstract_terms: Vec::new(),
            start_date: None,
            end_date: None,
            work_types: Vec::new(),
            language: None,
            is_oa: None,
            min_match_count: 1,
            exact_no_stem: false,
        }
    }
}

impl FilterParams {
    /// Same parameters with a different combinatorial strictness.
    pub fn with_min_match_count(&self, min_match_count: usize) -> Self {
        Self {
            min_match_count,
            ..self.clone()
        }
    }
}

fn quoted_terms<S: AsRef<str>>(terms: &[S]) -> Vec<String> {
    terms
        .iter()
        .map(|t| quote_term(t.as_ref()))
        .filter(|q| !q.is_empty())
        .collect()
}

/// Join terms combinatorially.
///
/// With two or more usable terms, every combination of
/// `max(2, min_match_count)` terms is AND-ed inside parentheses and all
/// combinations are OR-ed. A `min_match_count` of 1 (or 0) also OR-s in each
/// single term. Returns `None` when no term survives sanitization.
///
/// # Example
/// ```
/// use research_finder::query::filter::combinatorial_join;
/// let clause = combinatorial_join(&["A", "B", "C"], 2).unwrap();
/// assert_eq!(clause, r#"("A" AND "B") OR ("A" AND "C") OR ("B" AND "C")"#);
/// ```
pub fn combinatorial_join<S: AsRef<str>>(terms: &[S], min_match_count: usize) -> Option<String> {
    let quoted = quoted_terms(terms);
    match quoted.len() {
        0 => None,
        1 => quoted.into_iter().next(),
        n => {
            let r = min_match_count.max(2).min(n);
            let mut groups: Vec<String> = quoted
                .iter()
                .combinations(r)
                .map(|combo| format!("({})", combo.into_iter().join(" AND ")))
                .collect();
            if min_match_count <= 1 {
                groups.extend(quoted.iter().cloned());
            }
            Some(groups.join(" OR "))
        }
    }
}

/// Join terms with plain OR. Returns `None` when no term survives sanitization.
pub fn or_join<S: AsRef<str>>(terms: &[S]) -> Option<String> {
    let quoted = quoted_terms(terms);
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

fn field_name(base: &str, exact_no_stem: bool) -> String {
    if exact_no_stem {
        format!("{}.no_stem", base)
    } else {
        base.to_string()
    }
}

/// Compose the full filter expression.
///
/// Clauses appear in a fixed order (keywords, abstract terms, start date, end
/// date, work types, language, open access) and empty ones are omitted. Dates
/// are not validated here; OpenAlex rejects malformed ones.
pub fn build_filter(params: &FilterParams) -> FilterExpression {
    let mut clauses: Vec<String> = Vec::new();

    if let Some(expr) = combinatorial_join(&params.keywords, params.min_match_count) {
        clauses.push(format!(
            "{}:({})",
            field_name(KEYWORD_FIELD, params.exact_no_stem),
            expr
        ));
    }

    if let Some(expr) = or_join(&params.abstract_terms) {
        clauses.push(format!(
            "{}:({})",
            field_name(ABSTRACT_FIELD, params.exact_no_stem),
            expr
        ));
    }

    if let Some(start) = params.start_date.as_deref().filter(|d| !d.is_empty()) {
        clauses.push(format!("from_publication_date:{}", start));
    }
    if let Some(end) = params.end_date.as_deref().filter(|d| !d.is_empty()) {
        clauses.push(format!("to_publication_date:{}", end));
    }

    let types: Vec<String> = params
        .work_types
        .iter()
        .map(|t| super::text::sanitize_term(t).to_lowercase().replace(' ', "-"))
        .filter(|t| !t.is_empty())
        .collect();
    if !types.is_empty() {
        clauses.push(format!("type:{}", types.join("|")));
    }

    if let Some(language) = params.language.as_deref().filter(|l| !l.is_empty()) {
        clauses.push(format!("language:{}", language));
    }
    if let Some(is_oa) = params.is_oa {
        clauses.push(format!("is_oa:{}", is_oa));
    }

    FilterExpression::new(clauses.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binomial(n: usize, k: usize) -> usize {
        (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
    }

    fn terms(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("term{}", i)).collect()
    }

    #[test]
    fn test_three_keywords_pairwise() {
        let clause = combinatorial_join(&["A", "B", "C"], 2).unwrap();
        assert_eq!(clause, r#"("A" AND "B") OR ("A" AND "C") OR ("B" AND "C")"#);
    }

    #[test]
    fn test_group_counts_match_binomial() {
        for size in 2..=5 {
            for m in 1..size {
                let clause = combinatorial_join(&terms(size), m).unwrap();
                let groups = clause.matches('(').count();
                assert_eq!(groups, binomial(size, m.max(2)), "size={} m={}", size, m);

                let singles = clause
                    .split(" OR ")
                    .filter(|part| !part.starts_with('('))
                    .count();
                let expected_singles = if m == 1 { size } else { 0 };
                assert_eq!(singles, expected_singles, "size={} m={}", size, m);
            }
        }
    }

    #[test]
    fn test_min_match_one_appends_singles() {
        let clause = combinatorial_join(&["A", "B"], 1).unwrap();
        assert_eq!(clause, r#"("A" AND "B") OR "A" OR "B""#);
    }

    #[test]
    fn test_single_and_empty_terms() {
        assert_eq!(combinatorial_join(&["only"], 3).unwrap(), "\"only\"");
        assert_eq!(combinatorial_join(&["only", "!!!"], 2).unwrap(), "\"only\"");
        assert!(combinatorial_join::<&str>(&[], 1).is_none());
        assert!(combinatorial_join(&["", "  ", "??"], 1).is_none());
    }

    #[test]
    fn test_match_count_above_term_count_is_clamped() {
        let clause = combinatorial_join(&["A", "B", "C"], 7).unwrap();
        assert_eq!(clause, r#"("A" AND "B" AND "C")"#);
    }

    #[test]
    fn test_or_join() {
        assert_eq!(or_join(&["x", "y z"]).unwrap(), r#""x" OR "y z""#);
        assert!(or_join(&["", "%%"]).is_none());
    }

    #[test]
    fn test_build_filter_full() {
        let params = FilterParams {
            keywords: vec!["graph".into(), "neural".into()],
            abstract_terms: vec!["message passing".into()],
            start_date: Some("2020-01-01".into()),
            end_date: Some("2023-12-31".into()),
            work_types: vec!["Article".into(), "book chapter".into()],
            min_match_count: 2,
            ..FilterParams::default()
        };
        let filter = build_filter(&params);
        assert_eq!(
            filter.as_str(),
            "title_and_abstract.search:((\"graph\" AND \"neural\")),\
             abstract.search:(\"message passing\"),\
             from_publication_date:2020-01-01,\
             to_publication_date:2023-12-31,\
             type:article|book-chapter"
        );
    }

    #[test]
    fn test_build_filter_omits_empty_fields() {
        let params = FilterParams {
            abstract_terms: vec!["diffusion".into()],
            ..FilterParams::default()
        };
        assert_eq!(build_filter(&params).as_str(), "abstract.search:(\"diffusion\")");
        assert!(build_filter(&FilterParams::default()).is_empty());
    }

    #[test]
    fn test_build_filter_dates_are_verbatim() {
        let params = FilterParams {
            start_date: Some("not-a-date".into()),
            ..FilterParams::default()
        };
        assert_eq!(build_filter(&params).as_str(), "from_publication_date:not-a-date");
    }

    #[test]
    fn test_build_filter_no_stem_language_and_oa() {
        let params = FilterParams {
            keywords: vec!["llm".into()],
            abstract_terms: vec!["agents".into()],
            language: Some("en".into()),
            is_oa: Some(true),
            exact_no_stem: true,
            ..FilterParams::default()
        };
        assert_eq!(
            build_filter(&params).as_str(),
            "title_and_abstract.search.no_stem:(\"llm\"),\
             abstract.search.no_stem:(\"agents\"),language:en,is_oa:true"
        );
    }

    #[test]
    fn test_with_min_match_count() {
        let params = FilterParams {
            keywords: vec!["a".into()],
            ..FilterParams::default()
        };
        let relaxed = params.with_min_match_count(4);
        assert_eq!(relaxed.min_match_count, 4);
        assert_eq!(relaxed.keywords, params.keywords);
    }
}
