use crate::error::IngestError;
use crate::traits::KeywordExtractor;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

const STOPWORDS: [&str; 69] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did", "will", "would",
    "could", "should", "this", "that", "these", "those", "i", "you", "he", "she", "it", "we",
    "they", "them", "their", "there", "where", "when", "what", "which", "who", "how", "can", "may",
    "must", "shall", "also", "just", "only", "even", "still", "now", "then", "here", "very",
    "more", "most", "much", "many", "some", "any",
];

/// Scores terms by their frequency divided by the number of terms in the text.
#[derive(Debug, Clone)]
pub struct TermFrequencyExtractor {
    top_n: usize,
    term_re: Regex,
    stopwords: BTreeSet<&'static str>,
}

impl TermFrequencyExtractor {
    pub fn new(top_n: usize) -> Result<Self, IngestError> {
        if top_n == 0 {
            return Err(IngestError::InvalidArgument(
                "keyword count must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            top_n,
            term_re: Regex::new(r"\b\p{Alphabetic}{2,}\b")?,
            stopwords: STOPWORDS.into_iter().collect(),
        })
    }

    /// Keywords with their normalized term-frequency score, best first.
    /// Equal scores are ordered alphabetically.
    pub fn scored_terms(&self, text: &str) -> Vec<(String, f64)> {
        let lowered = text.to_lowercase();
        let terms = self
            .term_re
            .find_iter(&lowered)
            .map(|found| found.as_str())
            .filter(|term| !self.stopwords.contains(*term))
            .collect::<Vec<_>>();

        if terms.is_empty() {
            return Vec::new();
        }

        let mut counts = HashMap::<&str, usize>::new();
        for term in terms.iter().copied() {
            *counts.entry(term).or_default() += 1;
        }

        let total = terms.len() as f64;
        let mut scored = counts
            .into_iter()
            .map(|(term, count)| (term.to_string(), count as f64 / total))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| left.0.cmp(&right.0))
        });
        scored.truncate(self.top_n);
        scored
    }
}

impl KeywordExtractor for TermFrequencyExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        self.scored_terms(text)
            .into_iter()
            .map(|(term, _)| term)
            .collect()
    }
}

/// Fraction of `query` keywords that also appear in `chunk`.
pub fn keyword_overlap(query: &BTreeSet<String>, chunk: &[String]) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let shared = chunk.iter().filter(|term| query.contains(*term)).count();
    shared as f32 / query.len() as f32
}
