//! Embedding similarity and token-overlap scores for generated answers, plus the
//! CSV metrics log

#[cfg(test)]
mod tests;

pub mod lexical;
pub mod log;

use anyhow::{Context, Result};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::warn;

use crate::corpus::MedicationRecord;
use crate::embeddings::EmbeddingProvider;
use crate::retrieval::{cosine_similarity, round4};

pub use lexical::{RougeScore, rouge_l, rouge_n, sentence_bleu, token_f1, tokenize};
pub use log::{MetricsLog, MetricsLogEntry, NO_MATCH};

pub const NO_VALID_MEDICATION_MATCH: &str = "No valid medication match found";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CosineScores {
    pub query_reference: f64,
    pub query_generated: f64,
    pub reference_generated: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RougeScores {
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
}

impl RougeScores {
    /// ROUGE-1, ROUGE-2 and ROUGE-L F-measures, rounded to 4 places
    #[inline]
    pub fn between(reference: &str, generated: &str) -> Self {
        Self {
            rouge1: round4(rouge_n(reference, generated, 1).fmeasure),
            rouge2: round4(rouge_n(reference, generated, 2).fmeasure),
            rouge_l: round4(rouge_l(reference, generated).fmeasure),
        }
    }
}

/// Quality of a generated answer against the query and the matched reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsReport {
    pub cosine_similarity: CosineScores,
    /// Semantic similarity between the query and the generated answer
    pub sts_similarity: f64,
    pub rouge_scores: RougeScores,
}

/// Lexical scores of the batch evaluator, on whitespace tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LexicalScores {
    pub bleu: f64,
    pub token_f1: f64,
}

impl LexicalScores {
    #[inline]
    pub fn between(reference: &str, generated: &str) -> Self {
        let reference_tokens: Vec<&str> = reference.split_whitespace().collect();
        let generated_tokens: Vec<&str> = generated.split_whitespace().collect();
        Self {
            bleu: round4(sentence_bleu(&reference_tokens, &generated_tokens)),
            token_f1: round4(token_f1(reference, generated)),
        }
    }
}

/// Relevance of a medication match to the question that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MedicationScore {
    Scored {
        bleu: f64,
        cosine_similarity: f64,
        /// The cosine could not be computed and was reported as 0.0
        degraded: bool,
    },
    NoValidMatch,
}

impl Serialize for MedicationScore {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::Scored {
                bleu,
                cosine_similarity,
                degraded,
            } => {
                let mut state = serializer.serialize_struct("MedicationScore", 3)?;
                state.serialize_field("BLEU", &bleu)?;
                state.serialize_field("cosine_similarity", &cosine_similarity)?;
                state.serialize_field("degraded", &degraded)?;
                state.end()
            }
            Self::NoValidMatch => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", NO_VALID_MEDICATION_MATCH)?;
                map.end()
            }
        }
    }
}

/// Scores generated answers with the same embedder used for retrieval
#[derive(Clone)]
pub struct MetricsEngine {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for MetricsEngine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEngine")
            .field("dimension", &self.embedder.dimension())
            .finish()
    }
}

fn cosine_or_zero(a: &[f32], b: &[f32], pair: &str) -> f64 {
    match cosine_similarity(a, b) {
        Some(similarity) => round4(f64::from(similarity)),
        None => {
            warn!("Degenerate embeddings for {} similarity, using 0.0", pair);
            0.0
        }
    }
}

impl MetricsEngine {
    #[inline]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Embed the three texts and compare them. Blocks on the embedder.
    #[inline]
    pub fn score(&self, query: &str, reference: &str, generated: &str) -> Result<MetricsReport> {
        let query_embedding = self
            .embedder
            .embed(query)
            .context("Failed to embed query for scoring")?;
        let reference_embedding = self
            .embedder
            .embed(reference)
            .context("Failed to embed reference for scoring")?;
        let generated_embedding = self
            .embedder
            .embed(generated)
            .context("Failed to embed generated answer for scoring")?;

        let cosine = CosineScores {
            query_reference: cosine_or_zero(
                &query_embedding,
                &reference_embedding,
                "query/reference",
            ),
            query_generated: cosine_or_zero(
                &query_embedding,
                &generated_embedding,
                "query/generated",
            ),
            reference_generated: cosine_or_zero(
                &reference_embedding,
                &generated_embedding,
                "reference/generated",
            ),
        };

        Ok(MetricsReport {
            cosine_similarity: cosine,
            sts_similarity: cosine.query_generated,
            rouge_scores: RougeScores::between(reference, generated),
        })
    }

    /// Relevance of `best_match` to `question`. Never fails.
    ///
    /// BLEU compares the lowercased question (reference) with the drug name
    /// (candidate), so it measures lexical relevance only.
    #[inline]
    pub fn score_medication(
        &self,
        question: &str,
        best_match: Option<&MedicationRecord>,
    ) -> MedicationScore {
        let Some(record) = best_match.filter(|r| !r.drug.trim().is_empty()) else {
            return MedicationScore::NoValidMatch;
        };

        let question_lower = question.to_lowercase();
        let drug_lower = record.drug.to_lowercase();
        let reference: Vec<&str> = question_lower.split_whitespace().collect();
        let candidate: Vec<&str> = drug_lower.split_whitespace().collect();
        let bleu = round4(sentence_bleu(&reference, &candidate));

        let cosine = self
            .embedder
            .embed(question)
            .and_then(|q| self.embedder.embed(&record.drug).map(|d| (q, d)))
            .map(|(q, d)| cosine_similarity(&q, &d));

        let (cosine_similarity, degraded) = match cosine {
            Ok(Some(similarity)) => (round4(f64::from(similarity)), false),
            Ok(None) => {
                warn!(
                    "Degenerate embeddings for medication {}, using 0.0",
                    record.drug
                );
                (0.0, true)
            }
            Err(e) => {
                warn!("Failed to embed medication relevance inputs: {:#}", e);
                (0.0, true)
            }
        };

        MedicationScore::Scored {
            bleu,
            cosine_similarity,
            degraded,
        }
    }
}
