//! Corpus records and the read interface they are loaded through
//!
//! Each table holds payload columns plus an `embedding` column storing the
//! vector as a JSON array. Records are decoded from raw rows here and cached
//! per table by [`cache::CorpusCache`].


pub mod cache;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retrieval::Embedded;

pub use cache::{CorpusCache, LoadReport};

/// One row as read from storage, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Payload columns, in the order they were requested
    pub fields: Vec<Option<String>>,
    /// The stored embedding, JSON encoded
    pub embedding: String,
}

/// A held-out question with its reference answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
}

/// Read access to the corpus tables
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Every row of `table` whose embedding is not NULL, with `columns` as payload
    async fn fetch_rows(&self, table: &str, columns: &[&str]) -> anyhow::Result<Vec<RawRow>>;

    /// Up to `count` random question/answer pairs from `table`
    async fn sample_pairs(
        &self,
        table: &str,
        count: usize,
    ) -> anyhow::Result<Vec<QuestionAnswer>>;
}

/// A record shape that can be decoded from a [`RawRow`]
pub trait CorpusRecord: Embedded + Clone + Send + Sync + 'static {
    /// Payload columns to request, in decoding order
    const COLUMNS: &'static [&'static str];

    fn from_parts(fields: Vec<Option<String>>, embedding: Vec<f32>) -> Self;

    /// Short human-readable identity used in logs and the metrics log
    fn label(&self) -> &str;
}

/// Precomputed answer from the question-answer table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaRecord {
    pub answer: String,
    pub source: String,
    pub focus_area: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Embedded for QaRecord {
    #[inline]
    fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

impl CorpusRecord for QaRecord {
    const COLUMNS: &'static [&'static str] = &["answer", "source", "focus_area"];

    #[inline]
    fn from_parts(fields: Vec<Option<String>>, embedding: Vec<f32>) -> Self {
        let mut fields = fields.into_iter().map(Option::unwrap_or_default);
        Self {
            answer: fields.next().unwrap_or_default(),
            source: fields.next().unwrap_or_default(),
            focus_area: fields.next().unwrap_or_default(),
            embedding,
        }
    }

    #[inline]
    fn label(&self) -> &str {
        &self.answer
    }
}

/// Drug sheet from the medication table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub drug: String,
    pub indication: String,
    pub side_effects: String,
    pub drug_interaction: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl MedicationRecord {
    /// Text handed to the model as grounding context
    #[inline]
    pub fn as_context(&self) -> String {
        format!(
            "Drug: {}\nIndication: {}\nSide effects: {}\nDrug interactions: {}",
            self.drug, self.indication, self.side_effects, self.drug_interaction
        )
    }
}

impl Embedded for MedicationRecord {
    #[inline]
    fn embedding(&self) -> &[f32] {
        &self.embedding
    }
}

impl CorpusRecord for MedicationRecord {
    const COLUMNS: &'static [&'static str] =
        &["drug", "indication", "side_effects", "drug_interaction"];

    #[inline]
    fn from_parts(fields: Vec<Option<String>>, embedding: Vec<f32>) -> Self {
        let mut fields = fields.into_iter().map(Option::unwrap_or_default);
        Self {
            drug: fields.next().unwrap_or_default(),
            indication: fields.next().unwrap_or_default(),
            side_effects: fields.next().unwrap_or_default(),
            drug_interaction: fields.next().unwrap_or_default(),
            embedding,
        }
    }

    #[inline]
    fn label(&self) -> &str {
        &self.drug
    }
}

/// Decode a stored embedding. Anything but a non-empty array of finite numbers is rejected.
#[inline]
pub fn parse_embedding(raw: &str) -> anyhow::Result<Vec<f32>> {
    let values: Vec<f32> = serde_json::from_str(raw.trim())?;

    if values.is_empty() {
        anyhow::bail!("embedding array is empty");
    }
    if values.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("embedding contains non-finite values");
    }

    Ok(values)
}
