//! Request-level pipeline: embed the question, match it against the cached
//! corpus, generate an answer and score it.
//!
//! Blocking model calls run on the blocking thread pool under a per-call
//! timeout. Retrieval failures are returned as errors; generation failures are
//! reported in the response so a caller always gets an answer payload.

#[cfg(test)]
mod tests;

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, RetrievalConfig};
use crate::corpus::{CorpusCache, CorpusRecord, LoadReport, MedicationRecord, QaRecord};
use crate::database::Database;
use crate::embeddings::{EmbeddingProvider, OllamaClient, provider_from_config};
use crate::generation::{PromptTemplate, TextGenerator};
use crate::metrics::{
    MedicationScore, MetricsEngine, MetricsLog, MetricsLogEntry, MetricsReport, NO_MATCH,
};
use crate::retrieval::{MatchOutcome, ScoredRecord, TopMatches, apply_policy, round4};
use crate::{RagError, Result};

pub const NO_CONTEXT_DISCLAIMER: &str =
    "I couldn't find relevant information. Answering based on general knowledge.";
pub const NO_MEDICATION_DISCLAIMER: &str =
    "I couldn't find relevant medication information. Answering based on general knowledge.";
pub const GENERATION_FALLBACK: &str =
    "Sorry, I could not generate an answer right now. Please try again later.";

const DEFAULT_LANGUAGE: &str = "english";

/// How an answer was produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome<S, M> {
    /// Answer composed from a matched corpus entry
    Grounded {
        answer: String,
        source: S,
        metrics: Option<M>,
    },
    /// Nothing matched; the model answered from general knowledge
    Ungrounded {
        answer: String,
        disclaimer: &'static str,
        metrics: Option<M>,
    },
    /// The model could not be reached or did not answer in time
    Failed { message: String },
}

impl<S, M> AnswerOutcome<S, M> {
    #[inline]
    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Grounded { answer, .. } | Self::Ungrounded { answer, .. } => Some(answer),
            Self::Failed { .. } => None,
        }
    }
}

pub type QaAnswer = AnswerOutcome<ScoredRecord<QaRecord>, MetricsReport>;
pub type MedicationAnswer = AnswerOutcome<TopMatches<MedicationRecord>, MedicationScore>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResponse<O> {
    pub question: String,
    pub outcome: O,
    /// Seconds, rounded to 4 places
    pub response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MedicationInfo {
    pub top_n_avg_similarity: f64,
    pub top_matches: Vec<ScoredRecord<MedicationRecord>>,
    pub response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LabelOutcome {
    Success {
        corrected_name: String,
        medication_info: String,
    },
    Error {
        message: String,
    },
}

/// A generated answer before scoring, as used by the evaluation harness
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedAnswer {
    pub answer: String,
    pub best_match: Option<ScoredRecord<QaRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRefresh {
    pub table: String,
    #[serde(flatten)]
    pub report: LoadReport,
}

pub struct Assistant {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn TextGenerator>,
    corpus: Arc<CorpusCache>,
    metrics: MetricsEngine,
    metrics_log: Option<Arc<MetricsLog>>,
    retrieval: RetrievalConfig,
    language: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for Assistant {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("corpus", &self.corpus)
            .field("retrieval", &self.retrieval)
            .field("language", &self.language)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Assistant {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn TextGenerator>,
        corpus: Arc<CorpusCache>,
        retrieval: RetrievalConfig,
    ) -> Self {
        let request_timeout = Duration::from_secs(retrieval.request_timeout_seconds);
        Self {
            metrics: MetricsEngine::new(Arc::clone(&embedder)),
            embedder,
            generator,
            corpus,
            metrics_log: None,
            retrieval,
            language: DEFAULT_LANGUAGE.to_string(),
            request_timeout,
        }
    }

    /// Wire the service to the configured database, embedder and Ollama server
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let database = Database::initialize_from_config_dir(config.get_base_dir())
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        let embedder = provider_from_config(config)?;
        let generator: Arc<dyn TextGenerator> = Arc::new(OllamaClient::new(config)?);

        let corpus = CorpusCache::new(Arc::new(database))
            .with_capacity(config.retrieval.cache_capacity)
            .with_load_timeout(Duration::from_secs(config.retrieval.request_timeout_seconds));

        let mut assistant = Self::new(
            embedder,
            generator,
            Arc::new(corpus),
            config.retrieval.clone(),
        )
        .with_language(&config.evaluation.language);

        if config.retrieval.log_metrics {
            assistant = assistant.with_metrics_log(MetricsLog::new(config.metrics_log_path()));
        }

        Ok(assistant)
    }

    #[inline]
    pub fn with_metrics_log(mut self, log: MetricsLog) -> Self {
        self.metrics_log = Some(Arc::new(log));
        self
    }

    /// Default answer language when a request does not name one
    #[inline]
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    #[inline]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[inline]
    pub fn corpus(&self) -> &CorpusCache {
        &self.corpus
    }

    #[inline]
    pub fn metrics(&self) -> &MetricsEngine {
        &self.metrics
    }

    #[inline]
    pub fn retrieval_config(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    async fn run_blocking<T, F>(
        &self,
        what: &str,
        kind: fn(String) -> RagError,
        task: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(task);

        match tokio::time::timeout(self.request_timeout, handle).await {
            Err(_) => {
                // the blocking task cannot be cancelled; its result is discarded
                debug!(
                    "{} abandoned after {:?}, blocking task left running",
                    what, self.request_timeout
                );
                Err(RagError::Timeout(format!(
                    "{} exceeded {:?}",
                    what, self.request_timeout
                )))
            }
            Ok(Err(join_error)) => Err(kind(format!("{what} task failed: {join_error}"))),
            Ok(Ok(result)) => result.map_err(|e| kind(format!("{e:#}"))),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        self.run_blocking("Embedding", RagError::Embedding, move || embedder.embed(&text))
            .await
    }

    /// Send one prompt to the model
    #[inline]
    pub async fn run_prompt(&self, template: PromptTemplate<'_>) -> Result<String> {
        let generator = Arc::clone(&self.generator);
        let purpose = template.purpose();
        let prompt = template.render();
        debug!("Running {} prompt", purpose);

        self.run_blocking(purpose, RagError::Generation, move || {
            generator.generate(&prompt)
        })
        .await
    }

    async fn generate_answer(
        &self,
        question: &str,
        context: Option<&str>,
        language: Option<&str>,
    ) -> Result<String> {
        self.run_prompt(PromptTemplate::ClinicalAnswer {
            question,
            context,
            language: language.unwrap_or(&self.language),
        })
        .await
    }

    /// Closest question/answer entry at or above the similarity threshold
    #[inline]
    pub async fn get_sources(&self, question: &str) -> Result<Option<ScoredRecord<QaRecord>>> {
        let query = self.embed(question).await?;
        let records = self.corpus.load::<QaRecord>(&self.retrieval.qa_table).await?;

        let matched = apply_policy(&query, &records, self.retrieval.qa_policy())
            .and_then(MatchOutcome::into_best);
        match &matched {
            Some(m) => debug!("Best match similarity {:.4}", m.similarity),
            None => debug!("No corpus entry reached the similarity threshold"),
        }
        Ok(matched)
    }

    /// Retrieve and generate without scoring. Generation errors are returned.
    #[inline]
    pub async fn compose(
        &self,
        question: &str,
        language: Option<&str>,
    ) -> Result<ComposedAnswer> {
        let best_match = self.get_sources(question).await?;
        let context = best_match.as_ref().map(|m| m.record.answer.as_str());
        let answer = self.generate_answer(question, context, language).await?;
        Ok(ComposedAnswer { answer, best_match })
    }

    /// Score `generated` against the query and a reference answer off the async executor
    #[inline]
    pub async fn score_answer(
        &self,
        question: &str,
        reference: &str,
        generated: &str,
    ) -> Result<MetricsReport> {
        let metrics = self.metrics.clone();
        let (question, reference, generated) = (
            question.to_string(),
            reference.to_string(),
            generated.to_string(),
        );

        self.run_blocking("Scoring", RagError::Embedding, move || {
            metrics.score(&question, &reference, &generated)
        })
        .await
    }

    async fn score(
        &self,
        question: &str,
        reference: &str,
        generated: &str,
    ) -> Option<MetricsReport> {
        match self.score_answer(question, reference, generated).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Failed to score answer: {}", e);
                None
            }
        }
    }

    fn log_interaction(
        &self,
        question: &str,
        best_match: Option<&str>,
        response: &str,
        metrics: Option<&MetricsReport>,
        response_time: f64,
    ) {
        let Some(log) = &self.metrics_log else {
            return;
        };

        let report = metrics.copied().unwrap_or_default();
        let entry = MetricsLogEntry {
            query: question.to_string(),
            best_match: best_match.unwrap_or(NO_MATCH).to_string(),
            response: response.to_string(),
            cosine_similarity: report.cosine_similarity.query_generated,
            rouge1: report.rouge_scores.rouge1,
            rouge2: report.rouge_scores.rouge2,
            rouge_l: report.rouge_scores.rouge_l,
            response_time,
        };

        if let Err(e) = log.append(&entry) {
            warn!("Failed to write metrics log: {:#}", e);
        }
    }

    /// Answer a clinical question, grounded in the closest corpus entry when one matches
    #[inline]
    pub async fn answer(
        &self,
        question: &str,
        language: Option<&str>,
    ) -> Result<AnswerResponse<QaAnswer>> {
        let start = Instant::now();
        let best_match = self.get_sources(question).await?;
        let context = best_match.as_ref().map(|m| m.record.answer.as_str());

        let answer = match self.generate_answer(question, context, language).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Answer generation failed: {}", e);
                return Ok(AnswerResponse {
                    question: question.to_string(),
                    outcome: AnswerOutcome::Failed {
                        message: format!("{GENERATION_FALLBACK} ({e})"),
                    },
                    response_time: round4(start.elapsed().as_secs_f64()),
                });
            }
        };

        let metrics = self
            .score(question, context.unwrap_or_default(), &answer)
            .await;
        let response_time = round4(start.elapsed().as_secs_f64());

        self.log_interaction(question, context, &answer, metrics.as_ref(), response_time);
        info!("Answered question in {:.4}s", response_time);

        let outcome = match best_match {
            Some(source) => AnswerOutcome::Grounded {
                answer,
                source,
                metrics,
            },
            None => AnswerOutcome::Ungrounded {
                answer,
                disclaimer: NO_CONTEXT_DISCLAIMER,
                metrics,
            },
        };

        Ok(AnswerResponse {
            question: question.to_string(),
            outcome,
            response_time,
        })
    }

    async fn top_medications(
        &self,
        question: &str,
    ) -> Result<Option<TopMatches<MedicationRecord>>> {
        let query = self.embed(question).await?;
        let records = self
            .corpus
            .load::<MedicationRecord>(&self.retrieval.medication_table)
            .await?;
        Ok(apply_policy(&query, &records, self.retrieval.medication_policy())
            .map(MatchOutcome::into_top))
    }

    /// The N closest medications and their mean similarity
    #[inline]
    pub async fn get_medication_info(&self, question: &str) -> Result<Option<MedicationInfo>> {
        let start = Instant::now();
        let Some(top) = self.top_medications(question).await? else {
            return Ok(None);
        };

        Ok(Some(MedicationInfo {
            top_n_avg_similarity: round4(f64::from(top.average_similarity)),
            top_matches: top.matches,
            response_time: round4(start.elapsed().as_secs_f64()),
        }))
    }

    /// Answer a medication question grounded in the closest drug sheet
    #[inline]
    pub async fn answer_medication(
        &self,
        question: &str,
        language: Option<&str>,
    ) -> Result<AnswerResponse<MedicationAnswer>> {
        let start = Instant::now();
        let top = self.top_medications(question).await?;
        let context = top
            .as_ref()
            .and_then(TopMatches::best)
            .map(|best| best.record.as_context());

        let outcome = match self
            .generate_answer(question, context.as_deref(), language)
            .await
        {
            Err(e) => {
                warn!("Medication answer generation failed: {}", e);
                AnswerOutcome::Failed {
                    message: format!("{GENERATION_FALLBACK} ({e})"),
                }
            }
            Ok(answer) => {
                let metrics = self.score_medication(question, top.as_ref()).await;
                match top {
                    Some(source) => AnswerOutcome::Grounded {
                        answer,
                        source,
                        metrics: Some(metrics),
                    },
                    None => AnswerOutcome::Ungrounded {
                        answer,
                        disclaimer: NO_MEDICATION_DISCLAIMER,
                        metrics: Some(metrics),
                    },
                }
            }
        };

        Ok(AnswerResponse {
            question: question.to_string(),
            outcome,
            response_time: round4(start.elapsed().as_secs_f64()),
        })
    }

    async fn score_medication(
        &self,
        question: &str,
        top: Option<&TopMatches<MedicationRecord>>,
    ) -> MedicationScore {
        let metrics = self.metrics.clone();
        let question = question.to_string();
        let best = top.and_then(TopMatches::best).map(|m| m.record.clone());

        self.run_blocking("Medication scoring", RagError::Embedding, move || {
            Ok(metrics.score_medication(&question, best.as_ref()))
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Medication scoring did not finish: {}", e);
            MedicationScore::Scored {
                bleu: 0.0,
                cosine_similarity: 0.0,
                degraded: true,
            }
        })
    }

    /// Correct a medication name read from a label, then describe the medication
    #[inline]
    pub async fn process_medication_label(
        &self,
        extracted_text: &str,
        language: Option<&str>,
    ) -> LabelOutcome {
        if extracted_text.trim().is_empty() {
            return LabelOutcome::Error {
                message: "No text was extracted from the label".to_string(),
            };
        }

        let corrected_name = match self
            .run_prompt(PromptTemplate::MedicationCorrection {
                extracted_text: extracted_text.trim(),
            })
            .await
        {
            Ok(name) => name.trim().to_string(),
            Err(e) => {
                warn!("Medication name correction failed: {}", e);
                return LabelOutcome::Error {
                    message: e.to_string(),
                };
            }
        };

        if corrected_name.is_empty() {
            return LabelOutcome::Error {
                message: "The model returned an empty medication name".to_string(),
            };
        }

        info!("Corrected label text to {}", corrected_name);

        match self
            .run_prompt(PromptTemplate::MedicationDetails {
                medication: &corrected_name,
                language: language.unwrap_or(&self.language),
            })
            .await
        {
            Ok(medication_info) => LabelOutcome::Success {
                corrected_name,
                medication_info,
            },
            Err(e) => {
                warn!("Medication details generation failed: {}", e);
                LabelOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Reload the configured corpus tables from storage.
    ///
    /// Each snapshot is replaced only after its table has been read, so a failed
    /// refresh leaves the previous snapshot in service. Other cached tables are
    /// dropped, as is `table` when it is not a configured corpus table.
    #[inline]
    pub async fn refresh_corpus(&self, table: Option<&str>) -> Result<Vec<TableRefresh>> {
        let qa_table = self.retrieval.qa_table.as_str();
        let medication_table = self.retrieval.medication_table.as_str();
        let configured = |name: &str| name == qa_table || name == medication_table;

        match table {
            Some(table) if !configured(table) => {
                self.corpus.invalidate(table).await;
            }
            Some(_) => {}
            None => {
                for cached in self.corpus.cached_tables().await {
                    if !configured(&cached) {
                        self.corpus.invalidate(&cached).await;
                    }
                }
            }
        }

        let mut refreshed = Vec::new();
        if table.is_none_or(|t| t == qa_table) {
            refreshed.push(self.reload::<QaRecord>(qa_table).await?);
        }
        if table.is_none_or(|t| t == medication_table) {
            refreshed.push(self.reload::<MedicationRecord>(medication_table).await?);
        }
        Ok(refreshed)
    }

    async fn reload<R: CorpusRecord>(&self, table: &str) -> Result<TableRefresh> {
        let report = self.corpus.refresh::<R>(table).await?;
        Ok(TableRefresh {
            table: table.to_string(),
            report,
        })
    }
}
