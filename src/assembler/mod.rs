//! Conversion of raw OpenAlex records into [`WorkSummary`] values.
//!
//! OpenAlex does not store abstracts verbatim; it ships an inverted index
//! mapping each distinct word to the zero-based positions it occupies. The
//! assembler rebuilds the text, flattens concepts into a keyword string and
//! defaults every missing field so a partial record never aborts a batch.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{Author, RawAuthorship, RawConcept, RawWork, WorkSummary};

/// Fields requested from OpenAlex for every work.
pub const OPENALEX_SELECT_FIELDS: &str =
    "id,display_name,concepts,abstract_inverted_index,publication_year,authorships";

/// Positions at or beyond this are treated as corrupt and skipped.
pub const MAX_ABSTRACT_POSITIONS: usize = 100_000;

/// Rebuild an abstract from its inverted index.
///
/// The output has `max position + 1` slots; positions no word claims are left
/// as empty tokens. An absent or empty index yields an empty string. Positions
/// of [`MAX_ABSTRACT_POSITIONS`] or more are dropped.
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use research_finder::assembler::decode_inverted_index;
///
/// let index = HashMap::from([
///     ("the".to_string(), vec![0, 2]),
///     ("cat".to_string(), vec![1]),
/// ]);
/// assert_eq!(decode_inverted_index(Some(&index)), "the cat the");
/// ```
pub fn decode_inverted_index(index: Option<&HashMap<String, Vec<usize>>>) -> String {
    let Some(index) = index else {
        return String::new();
    };
    let in_range = |p: &usize| *p < MAX_ABSTRACT_POSITIONS;

    let Some(max_position) = index.values().flatten().copied().filter(in_range).max() else {
        return String::new();
    };
    let skipped = index.values().flatten().filter(|p| !in_range(p)).count();
    if skipped > 0 {
        debug!("Skipped {} out-of-range abstract positions", skipped);
    }

    let mut words = vec![""; max_position + 1];
    for (word, positions) in index {
        for &position in positions.iter().filter(|p| in_range(p)) {
            words[position] = word.as_str();
        }
    }
    words.join(" ")
}

/// Comma-join the display names of a concept list, skipping unnamed concepts.
pub fn concepts_to_keywords(concepts: &[RawConcept]) -> String {
    concepts
        .iter()
        .filter_map(|c| c.display_name.as_deref())
        .collect::<Vec<_>>()
        .join(", ")
}

fn authorship_to_author(authorship: &RawAuthorship) -> Option<Author> {
    let name = authorship.author.as_ref()?.display_name.clone()?;
    let affiliation = authorship
        .institutions
        .iter()
        .find_map(|i| i.display_name.clone());
    Some(Author { name, affiliation })
}

/// Convert one raw record into a summary.
pub fn assemble(raw: RawWork) -> WorkSummary {
    WorkSummary {
        keywords: raw
            .concepts
            .as_deref()
            .map(concepts_to_keywords)
            .unwrap_or_default(),
        abstract_text: decode_inverted_index(raw.abstract_inverted_index.as_ref()),
        authors: raw
            .authorships
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(authorship_to_author)
            .collect(),
        id: raw.id.unwrap_or_default(),
        title: raw.display_name.unwrap_or_default(),
        publication_year: raw.publication_year,
    }
}

/// Convert a batch of raw records, preserving fetch order.
pub fn assemble_all(raw: Vec<RawWork>) -> Vec<WorkSummary> {
    raw.into_iter().map(assemble).collect()
}
