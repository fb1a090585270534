//! Write-time keyword generation and the search capability built on it.
//!
//! Every word of the indexed fields is stored as all of its non-empty
//! prefixes, so "caden" yields `c, ca, cad, cade, caden`. Lookup is a
//! case-insensitive substring match over those tokens, or over the fields
//! displayed for the document.

use std::collections::HashSet;

/// A search capability over already-fetched documents.
///
/// Implementations decide which tokens are stored per document and how a
/// query is matched against them. The contract callers rely on is that a
/// query matching a substring of a displayed field always matches.
pub trait TextSearchIndex: Send + Sync {
    /// Tokens to store on a document built from `fields`.
    fn index_terms(&self, fields: &[&str]) -> Vec<String>;

    /// Whether a document with stored `terms` and `displayed` fields matches.
    fn matches(&self, terms: &[String], displayed: &[&str], query: &str) -> bool;
}

/// The prefix-keyword scheme used by the hosted content documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixKeywordIndex;

impl TextSearchIndex for PrefixKeywordIndex {
    fn index_terms(&self, fields: &[&str]) -> Vec<String> {
        prefix_keywords(fields)
    }

    fn matches(&self, terms: &[String], displayed: &[&str], query: &str) -> bool {
        let query = normalize_query(query);
        if query.is_empty() {
            return false;
        }
        terms.iter().any(|t| t.contains(&query))
            || displayed.iter().any(|d| d.to_lowercase().contains(&query))
    }
}

/// Lowercase, split on whitespace and emit every non-empty prefix of each
/// word. Duplicate tokens are dropped; first occurrence order is kept.
pub fn prefix_keywords(fields: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for field in fields {
        for word in field.to_lowercase().split_whitespace() {
            let ends = word
                .char_indices()
                .map(|(i, c)| i + c.len_utf8());
            for end in ends {
                let prefix = &word[..end];
                if seen.insert(prefix.to_string()) {
                    out.push(prefix.to_string());
                }
            }
        }
    }
    out
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_prefix_of_every_word() {
        assert_eq!(
            prefix_keywords(&["Caden"]),
            vec!["c", "ca", "cad", "cade", "caden"]
        );
    }

    #[test]
    fn multiple_fields_share_dedup() {
        let kws = prefix_keywords(&["Taco Night", "Tanya"]);
        assert_eq!(
            kws,
            vec!["t", "ta", "tac", "taco", "n", "ni", "nig", "nigh", "night", "tan", "tany", "tanya"]
        );
    }

    #[test]
    fn multibyte_words_split_on_char_boundaries() {
        assert_eq!(prefix_keywords(&["Café"]), vec!["c", "ca", "caf", "café"]);
    }

    #[test]
    fn empty_fields_emit_nothing() {
        assert!(prefix_keywords(&["", "   "]).is_empty());
    }

    #[test]
    fn matches_on_terms_or_displayed_fields() {
        let index = PrefixKeywordIndex;
        let terms = index.index_terms(&["Caden Smith"]);
        assert!(index.matches(&terms, &[], "CAD"));
        assert!(index.matches(&terms, &[], "  smi "));
        assert!(!index.matches(&terms, &[], "jones"));
        // Multi-word queries match through the displayed text.
        assert!(index.matches(&terms, &["Caden Smith", "Springfield"], "caden smith"));
        assert!(index.matches(&terms, &["Springfield"], "field"));
        assert!(!index.matches(&terms, &["Springfield"], ""));
    }
}
