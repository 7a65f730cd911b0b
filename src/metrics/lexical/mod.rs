//! Token-overlap metrics: ROUGE-1/2/L, BLEU and set-based token F1

#[cfg(test)]
mod tests;

use itertools::Itertools;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const BLEU_MAX_ORDER: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RougeScore {
    pub precision: f64,
    pub recall: f64,
    pub fmeasure: f64,
}

impl RougeScore {
    fn from_overlap(overlap: usize, candidate_total: usize, reference_total: usize) -> Self {
        let precision = overlap as f64 / candidate_total.max(1) as f64;
        let recall = overlap as f64 / reference_total.max(1) as f64;
        let fmeasure = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            fmeasure,
        }
    }
}

/// Lowercase, then split on anything that is not an ASCII letter or digit
#[inline]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn ngram_counts<T: AsRef<str>>(tokens: &[T], n: usize) -> HashMap<Vec<&str>, usize> {
    if n == 0 {
        return HashMap::new();
    }
    tokens
        .windows(n)
        .map(|window| window.iter().map(|token| token.as_ref()).collect::<Vec<&str>>())
        .counts()
}

fn clipped_overlap(
    candidate: &HashMap<Vec<&str>, usize>,
    reference: &HashMap<Vec<&str>, usize>,
) -> usize {
    candidate
        .iter()
        .map(|(gram, count)| (*count).min(reference.get(gram).copied().unwrap_or(0)))
        .sum()
}

/// ROUGE-N between a reference and a candidate text
#[inline]
pub fn rouge_n(reference: &str, candidate: &str, n: usize) -> RougeScore {
    let reference_tokens = tokenize(reference);
    let candidate_tokens = tokenize(candidate);
    let reference = ngram_counts(&reference_tokens, n);
    let candidate = ngram_counts(&candidate_tokens, n);

    RougeScore::from_overlap(
        clipped_overlap(&candidate, &reference),
        candidate.values().sum(),
        reference.values().sum(),
    )
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];

    for token_a in a {
        for (j, token_b) in b.iter().enumerate() {
            current[j + 1] = if token_a == token_b {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// ROUGE-L (longest common subsequence) between a reference and a candidate text
#[inline]
pub fn rouge_l(reference: &str, candidate: &str) -> RougeScore {
    let reference = tokenize(reference);
    let candidate = tokenize(candidate);

    RougeScore::from_overlap(
        lcs_length(&reference, &candidate),
        candidate.len(),
        reference.len(),
    )
}

/// Sentence BLEU with uniform weights up to 4-grams and a brevity penalty.
///
/// Unsmoothed: a candidate with no matching n-gram at some order scores 0.0.
#[inline]
pub fn sentence_bleu<T: AsRef<str>>(reference: &[T], candidate: &[T]) -> f64 {
    if candidate.is_empty() {
        return 0.0;
    }

    let mut log_precision_sum = 0.0;
    for n in 1..=BLEU_MAX_ORDER {
        let candidate_grams = ngram_counts(candidate, n);
        let reference_grams = ngram_counts(reference, n);

        let matched = clipped_overlap(&candidate_grams, &reference_grams);
        if matched == 0 {
            return 0.0;
        }
        let total: usize = candidate_grams.values().sum();
        log_precision_sum += (matched as f64 / total as f64).ln();
    }

    let candidate_len = candidate.len() as f64;
    let reference_len = reference.len() as f64;
    let brevity_penalty = if candidate_len > reference_len {
        1.0
    } else {
        (1.0 - reference_len / candidate_len).exp()
    };

    brevity_penalty * (log_precision_sum / BLEU_MAX_ORDER as f64).exp()
}

/// F1 over the sets of whitespace-separated tokens, case sensitive
#[inline]
pub fn token_f1(reference: &str, candidate: &str) -> f64 {
    let reference: HashSet<&str> = reference.split_whitespace().collect();
    let candidate: HashSet<&str> = candidate.split_whitespace().collect();

    if reference.is_empty() || candidate.is_empty() {
        return 0.0;
    }

    let common = reference.intersection(&candidate).count() as f64;
    let precision = common / candidate.len() as f64;
    let recall = common / reference.len() as f64;

    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}
