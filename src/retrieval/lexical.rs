//! Lexical relevance scoring
//!
//! BM25 of a query against the current candidate pool. The pool is the
//! corpus: document frequencies and average length come from it, so raw
//! scores are only comparable within one retrieval call and are min-max
//! normalized afterwards.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
        "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not",
        "of", "on", "or", "our", "she", "so", "than", "that", "the", "their", "them", "then",
        "there", "these", "they", "this", "to", "too", "was", "we", "were", "what", "when",
        "which", "who", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, split on non-alphanumerics, drop stop words and single chars
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// BM25 scorer over a fixed set of documents
#[derive(Debug, Clone)]
pub struct Bm25Scorer {
    k1: f64,
    b: f64,
    doc_terms: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

impl Bm25Scorer {
    /// Index the documents
    pub fn new<S: AsRef<str>>(documents: &[S], k1: f64, b: f64) -> Self {
        let mut doc_terms = Vec::with_capacity(documents.len());
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc.as_ref());
            doc_lengths.push(tokens.len());

            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_terms.push(tf);
        }

        let total: usize = doc_lengths.iter().sum();
        let avg_len = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f64 / doc_lengths.len() as f64
        };

        Self {
            k1,
            b,
            doc_terms,
            doc_lengths,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_terms.is_empty()
    }

    /// Raw BM25 score of every document, in input order
    pub fn score_all(&self, query: &str) -> Vec<f64> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        (0..self.doc_terms.len())
            .map(|i| self.score_doc(i, &query_terms))
            .collect()
    }

    fn score_doc(&self, index: usize, query_terms: &[String]) -> f64 {
        let n = self.doc_terms.len() as f64;
        let tf_map = &self.doc_terms[index];
        let len_ratio = if self.avg_len > 0.0 {
            self.doc_lengths[index] as f64 / self.avg_len
        } else {
            0.0
        };

        query_terms
            .iter()
            .filter_map(|term| {
                let tf = *tf_map.get(term)? as f64;
                let df = *self.doc_freq.get(term).unwrap_or(&0) as f64;
                // BM25+ style idf, never negative
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                let denom = tf + self.k1 * (1.0 - self.b + self.b * len_ratio);
                Some(idf * tf * (self.k1 + 1.0) / denom)
            })
            .sum()
    }
}
