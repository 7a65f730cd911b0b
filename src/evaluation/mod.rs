//! Batch evaluation over held-out question/answer pairs
//!
//! Each sampled pair goes through the full answer pipeline. The generated
//! answer is scored against the held-out reference, and optionally graded by
//! the model on the fixed rubric. A failing item is skipped with its reason and
//! the batch carries on.


use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::corpus::QuestionAnswer;
use crate::generation::{PromptTemplate, RUBRIC_CRITERIA, RUBRIC_MAX_SCORE};
use crate::metrics::{LexicalScores, MetricsReport};
use crate::retrieval::round4;
use crate::service::Assistant;
use crate::{RagError, Result};

#[derive(Debug, Error, PartialEq)]
pub enum RubricParseError {
    #[error("Expected {expected} scores, found {found}")]
    WrongCount { expected: usize, found: usize },
    #[error("Score is not a number: {0:?}")]
    NotANumber(String),
    #[error("Score {0} is outside 0-10")]
    OutOfRange(f64),
}

/// Parse a comma-separated list of exactly one score per rubric criterion
#[inline]
pub fn parse_rubric_scores(response: &str) -> std::result::Result<Vec<f64>, RubricParseError> {
    let scores = response
        .split([',', '\n'])
        .map(|piece| piece.trim().trim_end_matches('.'))
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            let score: f64 = piece
                .parse()
                .map_err(|_| RubricParseError::NotANumber(piece.to_string()))?;
            if !(0.0..=RUBRIC_MAX_SCORE).contains(&score) {
                return Err(RubricParseError::OutOfRange(score));
            }
            Ok(score)
        })
        .collect::<std::result::Result<Vec<f64>, _>>()?;

    if scores.len() != RUBRIC_CRITERIA.len() {
        return Err(RubricParseError::WrongCount {
            expected: RUBRIC_CRITERIA.len(),
            found: scores.len(),
        });
    }

    Ok(scores)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Generation,
    Scoring,
    Rubric,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub question: String,
    pub stage: SkipStage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedItem {
    pub question: String,
    pub reference_answer: String,
    pub generated_answer: String,
    /// Whether the answer was grounded in a matched corpus entry
    pub grounded: bool,
    pub metrics: MetricsReport,
    pub lexical: LexicalScores,
    pub rubric_scores: Option<Vec<f64>>,
}

/// Arithmetic means over the evaluated items
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricAverages {
    pub bleu: f64,
    pub token_f1: f64,
    /// Reference answer against generated answer
    pub cosine_similarity: f64,
    pub sts_similarity: f64,
    pub rouge1: f64,
    pub rouge2: f64,
    #[serde(rename = "rougeL")]
    pub rouge_l: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriterionAverage {
    pub criterion: &'static str,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub started_at: DateTime<Utc>,
    pub sampled: usize,
    pub items: Vec<EvaluatedItem>,
    pub skipped: Vec<SkippedItem>,
    pub averages: Option<MetricAverages>,
    pub rubric_averages: Option<Vec<CriterionAverage>>,
}

impl EvaluationReport {
    #[inline]
    pub fn evaluated(&self) -> usize {
        self.items.len()
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| round4(sum / count as f64))
}

fn average_metrics(items: &[EvaluatedItem]) -> Option<MetricAverages> {
    let average = |f: fn(&EvaluatedItem) -> f64| mean(items.iter().map(f));

    Some(MetricAverages {
        bleu: average(|i| i.lexical.bleu)?,
        token_f1: average(|i| i.lexical.token_f1)?,
        cosine_similarity: average(|i| i.metrics.cosine_similarity.reference_generated)?,
        sts_similarity: average(|i| i.metrics.sts_similarity)?,
        rouge1: average(|i| i.metrics.rouge_scores.rouge1)?,
        rouge2: average(|i| i.metrics.rouge_scores.rouge2)?,
        rouge_l: average(|i| i.metrics.rouge_scores.rouge_l)?,
    })
}

fn average_rubric(items: &[EvaluatedItem]) -> Option<Vec<CriterionAverage>> {
    let graded: Vec<&Vec<f64>> = items.iter().filter_map(|i| i.rubric_scores.as_ref()).collect();
    if graded.is_empty() {
        return None;
    }

    RUBRIC_CRITERIA
        .into_iter()
        .enumerate()
        .map(|(index, criterion)| {
            mean(graded.iter().map(|scores| scores[index])).map(|score| CriterionAverage {
                criterion,
                score,
            })
        })
        .collect()
}

/// Runs sampled questions through an [`Assistant`] and aggregates their scores
#[derive(Debug)]
pub struct Evaluator {
    assistant: Arc<Assistant>,
    rubric_grading: bool,
    language: Option<String>,
    show_progress: bool,
}

impl Evaluator {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            rubric_grading: false,
            language: None,
            show_progress: false,
        }
    }

    #[inline]
    pub fn with_rubric_grading(mut self, enabled: bool) -> Self {
        self.rubric_grading = enabled;
        self
    }

    #[inline]
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Draw a progress bar on stderr when a terminal is attached
    #[inline]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, length: usize) -> ProgressBar {
        if self.show_progress && console::user_attended_stderr() {
            let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Evaluating {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            ProgressBar::new(length as u64).with_style(style)
        } else {
            ProgressBar::hidden()
        }
    }

    /// Evaluate `sample_size` random pairs from the question/answer table
    #[inline]
    pub async fn run(&self, sample_size: usize) -> Result<EvaluationReport> {
        let started_at = Utc::now();
        let table = &self.assistant.retrieval_config().qa_table;

        let pairs = self
            .assistant
            .corpus()
            .source()
            .sample_pairs(table, sample_size)
            .await
            .map_err(|e| RagError::Database(format!("Failed to sample {table}: {e:#}")))?;

        info!("Evaluating {} sampled questions", pairs.len());

        let bar = self.progress_bar(pairs.len());
        let mut items = Vec::with_capacity(pairs.len());
        let mut skipped = Vec::new();

        for pair in &pairs {
            match self.evaluate_pair(pair).await {
                Ok(item) => items.push(item),
                Err((stage, reason)) => {
                    warn!("Skipping {:?} at {:?}: {}", pair.question, stage, reason);
                    skipped.push(SkippedItem {
                        question: pair.question.clone(),
                        stage,
                        reason,
                    });
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            "Evaluation finished: {} evaluated, {} skipped",
            items.len(),
            skipped.len()
        );

        Ok(EvaluationReport {
            started_at,
            sampled: pairs.len(),
            averages: average_metrics(&items),
            rubric_averages: average_rubric(&items),
            items,
            skipped,
        })
    }

    async fn evaluate_pair(
        &self,
        pair: &QuestionAnswer,
    ) -> std::result::Result<EvaluatedItem, (SkipStage, String)> {
        let composed = self
            .assistant
            .compose(&pair.question, self.language.as_deref())
            .await
            .map_err(|e| (SkipStage::Generation, e.to_string()))?;

        let metrics = self
            .assistant
            .score_answer(&pair.question, &pair.answer, &composed.answer)
            .await
            .map_err(|e| (SkipStage::Scoring, e.to_string()))?;

        let rubric_scores = if self.rubric_grading {
            let response = self
                .assistant
                .run_prompt(PromptTemplate::RubricGrading {
                    question: &pair.question,
                    expected_answer: &pair.answer,
                    generated_answer: &composed.answer,
                })
                .await
                .map_err(|e| (SkipStage::Rubric, e.to_string()))?;
            Some(parse_rubric_scores(&response).map_err(|e| (SkipStage::Rubric, e.to_string()))?)
        } else {
            None
        };

        Ok(EvaluatedItem {
            question: pair.question.clone(),
            reference_answer: pair.answer.clone(),
            lexical: LexicalScores::between(&pair.answer, &composed.answer),
            generated_answer: composed.answer,
            grounded: composed.best_match.is_some(),
            metrics,
            rubric_scores,
        })
    }
}
