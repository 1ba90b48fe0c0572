//! Term-overlap ranking shared by the retrieval store implementations.
//!
//! Documents are scored by the number of distinct query terms they contain,
//! normalized by `sqrt(|query| * |document|)`. Documents sharing no term with
//! the query are never returned.

use std::collections::BTreeSet;

/// Default number of documents returned per search.
pub const DEFAULT_TOP_K: usize = 3;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Lowercased alphanumeric terms, stop words removed.
pub fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Similarity in `[0, 1]` between precomputed term sets.
pub fn score(query: &BTreeSet<String>, document: &BTreeSet<String>) -> f64 {
    if query.is_empty() || document.is_empty() {
        return 0.0;
    }
    let shared = query.intersection(document).count() as f64;
    shared / ((query.len() * document.len()) as f64).sqrt()
}

/// Rank `documents` against `query` and keep the best `top_k`.
/// Ties keep insertion order.
pub fn rank<'a, I>(query: &str, documents: I, top_k: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let query_terms = terms(query);
    let mut scored: Vec<(f64, usize, &str)> = documents
        .into_iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let s = score(&query_terms, &terms(doc));
            (s > 0.0).then_some((s, i, doc))
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    scored
        .into_iter()
        .take(top_k)
        .map(|(_, _, doc)| doc.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_drop_stop_words_and_case() {
        let t = terms("The Meeting is at 10am, with Boss!");
        assert!(t.contains("meeting"));
        assert!(t.contains("10am"));
        assert!(t.contains("boss"));
        assert!(!t.contains("the"));
        assert!(!t.contains("is"));
    }

    #[test]
    fn rank_orders_by_overlap() {
        let docs = [
            "Invoice for March was paid",
            "Meeting with boss moved to Friday",
            "Boss confirmed the meeting agenda and meeting room",
            "Lunch menu",
        ];
        let ranked = rank("boss meeting time", docs.iter().copied(), 3);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|d| d.contains("oss")));
    }

    #[test]
    fn rank_respects_top_k_and_skips_unrelated() {
        let docs = ["alpha beta", "alpha gamma", "alpha delta", "zeta"];
        let ranked = rank("alpha", docs.iter().copied(), 2);
        assert_eq!(ranked, vec!["alpha beta", "alpha gamma"]);
        assert!(rank("omega", docs.iter().copied(), 3).is_empty());
    }
}
