//! ROUGE overlap scores between a document and its summary.
//!
//! The document is the reference and the summary the candidate. Tokens
//! are lower-cased alphanumeric runs. Each score is an F-measure in
//! `[0, 1]`; the scores are advisory metadata and never gate ingestion.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::RougeScores;

/// Computes the quality score stored with each document.
///
/// Scoring is quadratic in document length; runtimes that must not block
/// (the service) supply an implementation that moves it off the async
/// threads.
#[async_trait]
pub trait SummaryScorer: Send + Sync {
    async fn score(&self, content: &str, summary: Option<&str>) -> RougeScores;
}

/// Scores on the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScorer;

#[async_trait]
impl SummaryScorer for InlineScorer {
    async fn score(&self, content: &str, summary: Option<&str>) -> RougeScores {
        score_optional(content, summary)
    }
}

/// Score `summary` against `content`. Returns zeros if either is empty.
pub fn rouge_scores(content: &str, summary: &str) -> RougeScores {
    let reference = tokenize(content);
    let candidate = tokenize(summary);
    if reference.is_empty() || candidate.is_empty() {
        return RougeScores::default();
    }
    RougeScores {
        rouge1: rouge_n(&reference, &candidate, 1),
        rouge2: rouge_n(&reference, &candidate, 2),
        rouge_l: rouge_l(&reference, &candidate),
    }
}

/// Score only when a non-blank summary is present.
pub fn score_optional(content: &str, summary: Option<&str>) -> RougeScores {
    match summary {
        Some(s) if !s.trim().is_empty() => rouge_scores(content, s),
        _ => RougeScores::default(),
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn ngrams(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

fn f_measure(overlap: usize, candidate_total: usize, reference_total: usize) -> f64 {
    if overlap == 0 || candidate_total == 0 || reference_total == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / candidate_total as f64;
    let recall = overlap as f64 / reference_total as f64;
    2.0 * precision * recall / (precision + recall)
}

fn rouge_n(reference: &[String], candidate: &[String], n: usize) -> f64 {
    let ref_grams = ngrams(reference, n);
    let cand_grams = ngrams(candidate, n);
    let overlap: usize = cand_grams
        .iter()
        .map(|(gram, count)| (*count).min(ref_grams.get(gram).copied().unwrap_or(0)))
        .sum();
    f_measure(
        overlap,
        cand_grams.values().sum(),
        ref_grams.values().sum(),
    )
}

/// Longest-common-subsequence F-measure, two-row DP.
fn rouge_l(reference: &[String], candidate: &[String]) -> f64 {
    let mut prev = vec![0usize; candidate.len() + 1];
    let mut cur = vec![0usize; candidate.len() + 1];
    for r in reference {
        for (j, c) in candidate.iter().enumerate() {
            cur[j + 1] = if r == c {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let lcs = prev[candidate.len()];
    f_measure(lcs, candidate.len(), reference.len())
}
