//! Search-safe normalization of free-text terms.
//!
//! OpenAlex filter values are embedded inside a comma-separated filter string,
//! so every term is folded to ASCII and stripped of anything that could break
//! the filter grammar before it is quoted.

use unicode_normalization::UnicodeNormalization;

/// Sanitize a raw term into a token safe to embed in a filter clause.
///
/// Applies, in order: NFKD decomposition with non-ASCII characters dropped,
/// commas replaced by spaces, removal of every character outside
/// `[A-Za-z0-9.\- ]`, whitespace collapse and trim. Input made only of
/// punctuation normalizes to the empty string, which callers discard.
///
/// # Example
/// ```
/// use research_finder::query::text::sanitize_term;
/// assert_eq!(sanitize_term("Café, résumé!"), "Cafe resume");
/// ```
pub fn sanitize_term(raw: &str) -> String {
    let folded: String = raw
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == ',' { ' ' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ' '))
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sanitize a term and wrap it in double quotes.
///
/// Returns an empty string when nothing survives sanitization so callers can
/// filter it out before joining.
pub fn quote_term(raw: &str) -> String {
    let term = sanitize_term(raw);
    if term.is_empty() {
        return String::new();
    }
    format!("\"{}\"", term.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_ascii_folding() {
        assert_eq!(sanitize_term("naïve Bayes"), "naive Bayes");
        assert_eq!(sanitize_term("Schrödinger"), "Schrodinger");
        assert_eq!(sanitize_term("北京 graph"), "graph");
    }

    #[test]
    fn test_sanitize_commas_and_punctuation() {
        assert_eq!(sanitize_term("graphs,networks"), "graphs networks");
        assert_eq!(sanitize_term("C++ (language)"), "C language");
        assert_eq!(sanitize_term("state-of-the-art v2.0"), "state-of-the-art v2.0");
        assert_eq!(sanitize_term("\"quoted\" term"), "quoted term");
    }

    #[test]
    fn test_sanitize_whitespace() {
        assert_eq!(sanitize_term("  many    spaces  "), "many spaces");
        assert_eq!(sanitize_term(""), "");
        assert_eq!(sanitize_term("!!! ??? ,,,"), "");
    }

    #[test]
    fn test_quote_term() {
        assert_eq!(quote_term("machine learning"), "\"machine learning\"");
        assert_eq!(quote_term("  Déjà vu "), "\"Deja vu\"");
        assert_eq!(quote_term("@#$"), "");
        assert_eq!(quote_term(""), "");
    }
}
