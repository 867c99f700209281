//! TF-IDF keyword signal
//!
//! The query is placed in the first slot of the corpus so it shares the
//! vocabulary and document frequencies of the candidates it is compared
//! against. Sparse rows are kept sorted by term index, which keeps the
//! floating point summation order (and therefore the scores) stable.

use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashSet};

lazy_static! {
    static ref STOP_WORDS: HashSet<&'static str> = [
        "a", "about", "above", "after", "again", "against", "all", "almost", "also", "am",
        "among", "an", "and", "any", "are", "around", "as", "at", "be", "because", "been",
        "before", "being", "below", "between", "both", "but", "by", "can", "cannot", "could",
        "did", "do", "does", "doing", "done", "down", "during", "each", "either", "else",
        "enough", "etc", "even", "ever", "every", "few", "for", "from", "further", "had",
        "has", "have", "having", "he", "her", "here", "hers", "herself", "him", "himself",
        "his", "how", "however", "ie", "if", "in", "into", "is", "it", "its", "itself",
        "just", "least", "less", "many", "may", "me", "might", "more", "most", "much", "must",
        "my", "myself", "neither", "no", "nor", "not", "now", "of", "off", "often", "on",
        "once", "one", "only", "or", "other", "others", "otherwise", "our", "ours",
        "ourselves", "out", "over", "own", "per", "perhaps", "please", "rather", "same",
        "several", "she", "should", "since", "so", "some", "still", "such", "than", "that",
        "the", "their", "theirs", "them", "themselves", "then", "there", "therefore",
        "these", "they", "this", "those", "though", "through", "thus", "to", "too", "under",
        "until", "up", "upon", "us", "very", "via", "was", "we", "well", "were", "what",
        "whatever", "when", "whenever", "where", "whereas", "whether", "which", "while",
        "who", "whoever", "whom", "whose", "why", "will", "with", "within", "without",
        "would", "yet", "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect();
}

/// Lowercased word tokens of two or more word characters
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Unigrams and bigrams over the stop-word-filtered tokens
fn analyze(text: &str) -> Vec<String> {
    let tokens: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .collect();

    let mut terms = tokens.clone();
    terms.extend(tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
    terms
}

type SparseRow = Vec<(usize, f64)>;

/// Cosine similarity of the query against each candidate, scaled so the
/// best keyword match scores 1.0. Candidates sharing no vocabulary with
/// the query score 0.0.
pub fn keyword_scores(query: &str, contents: &[&str], max_features: usize) -> Vec<f64> {
    if contents.is_empty() {
        return Vec::new();
    }

    let corpus: Vec<Vec<String>> = std::iter::once(query)
        .chain(contents.iter().copied())
        .map(analyze)
        .collect();

    let vocabulary = build_vocabulary(&corpus, max_features);
    if vocabulary.is_empty() {
        return vec![0.0; contents.len()];
    }

    let idf = inverse_document_frequency(&corpus, &vocabulary);
    let rows: Vec<SparseRow> = corpus
        .iter()
        .map(|terms| tfidf_row(terms, &vocabulary, &idf))
        .collect();

    let query_row = &rows[0];
    let similarities: Vec<f64> = rows[1..].iter().map(|row| dot(query_row, row)).collect();

    let max_similarity = similarities.iter().cloned().fold(0.0_f64, f64::max);
    let divisor = if max_similarity > 0.0 { max_similarity } else { 1.0 };

    similarities.into_iter().map(|s| s / divisor).collect()
}

/// Term → column index. When the vocabulary exceeds `max_features` only
/// the most frequent terms across the corpus are kept.
fn build_vocabulary(corpus: &[Vec<String>], max_features: usize) -> BTreeMap<String, usize> {
    let mut frequencies: BTreeMap<&str, usize> = BTreeMap::new();
    for terms in corpus {
        for term in terms {
            *frequencies.entry(term.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = frequencies.into_iter().collect();
    if max_features > 0 && ranked.len() > max_features {
        // Ties resolve alphabetically (BTreeMap order + stable sort)
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(max_features);
    }

    let mut kept: Vec<&str> = ranked.into_iter().map(|(term, _)| term).collect();
    kept.sort_unstable();

    kept.into_iter()
        .enumerate()
        .map(|(index, term)| (term.to_string(), index))
        .collect()
}

/// Smoothed idf: ln((1 + n) / (1 + df)) + 1
fn inverse_document_frequency(corpus: &[Vec<String>], vocabulary: &BTreeMap<String, usize>) -> Vec<f64> {
    let mut document_frequency = vec![0usize; vocabulary.len()];

    for terms in corpus {
        let unique: HashSet<&str> = terms.iter().map(String::as_str).collect();
        for term in unique {
            if let Some(&index) = vocabulary.get(term) {
                document_frequency[index] += 1;
            }
        }
    }

    let n = corpus.len() as f64;
    document_frequency
        .into_iter()
        .map(|df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
        .collect()
}

/// Raw counts weighted by idf, L2-normalized
fn tfidf_row(terms: &[String], vocabulary: &BTreeMap<String, usize>, idf: &[f64]) -> SparseRow {
    let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
    for term in terms {
        if let Some(&index) = vocabulary.get(term.as_str()) {
            *counts.entry(index).or_insert(0.0) += 1.0;
        }
    }

    let mut row: SparseRow = counts
        .into_iter()
        .map(|(index, count)| (index, count * idf[index]))
        .collect();

    let norm = row.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, weight) in row.iter_mut() {
            *weight /= norm;
        }
    }
    row
}

/// Dot product of two index-sorted sparse rows
fn dot(a: &SparseRow, b: &SparseRow) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;

    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_single_characters() {
        assert_eq!(tokenize("A refund, e.g. for Policy-42!"), vec!["refund", "for", "policy", "42"]);
    }

    #[test]
    fn test_analyze_builds_bigrams_after_stop_words() {
        let terms = analyze("the cancellation of the policy");
        assert_eq!(terms, vec!["cancellation", "policy", "cancellation policy"]);
    }

    #[test]
    fn test_best_match_scores_one() {
        let docs = [
            "Refund requests are processed within 14 days of cancellation.",
            "Our branches open at nine in the morning.",
            "Cancellation fees apply to annual plans.",
        ];
        let scores = keyword_scores("refund after cancellation", &docs, 1000);

        assert_eq!(scores.len(), 3);
        assert!((scores[0] - 1.0).abs() < 1e-9);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0 && scores[2] < 1.0);
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        let scores = keyword_scores("mortgage", &["credit card limits", "travel insurance"], 1000);
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_stop_word_only_corpus() {
        let scores = keyword_scores("the and of", &["is it", "to be"], 1000);
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_vocabulary_cap_keeps_frequent_terms() {
        let corpus = vec![
            analyze("premium premium premium refund"),
            analyze("premium claim"),
        ];
        let vocabulary = build_vocabulary(&corpus, 1);
        assert_eq!(vocabulary.len(), 1);
        assert!(vocabulary.contains_key("premium"));
    }
}
