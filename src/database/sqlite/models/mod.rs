#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QaEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub source: Option<String>,
    pub focus_area: Option<String>,
    pub embedding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQaEntry {
    pub question: String,
    pub answer: String,
    pub source: Option<String>,
    pub focus_area: Option<String>,
    pub embedding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMedicationEntry {
    pub drug: String,
    pub indication: Option<String>,
    pub side_effects: Option<String>,
    pub drug_interaction: Option<String>,
    pub embedding: Option<String>,
}

/// JSON text stored in the `embedding` column
#[inline]
pub fn encode_embedding(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(","))
}

impl NewQaEntry {
    #[inline]
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            question: question.to_string(),
            answer: answer.to_string(),
            source: None,
            focus_area: None,
            embedding: None,
        }
    }

    #[inline]
    pub fn with_source(mut self, source: &str, focus_area: &str) -> Self {
        self.source = Some(source.to_string());
        self.focus_area = Some(focus_area.to_string());
        self
    }

    #[inline]
    pub fn with_embedding(mut self, embedding: &[f32]) -> Self {
        self.embedding = Some(encode_embedding(embedding));
        self
    }
}

impl NewMedicationEntry {
    #[inline]
    pub fn new(drug: &str) -> Self {
        Self {
            drug: drug.to_string(),
            indication: None,
            side_effects: None,
            drug_interaction: None,
            embedding: None,
        }
    }

    #[inline]
    pub fn with_details(mut self, indication: &str, side_effects: &str, interactions: &str) -> Self {
        self.indication = Some(indication.to_string());
        self.side_effects = Some(side_effects.to_string());
        self.drug_interaction = Some(interactions.to_string());
        self
    }

    #[inline]
    pub fn with_embedding(mut self, embedding: &[f32]) -> Self {
        self.embedding = Some(encode_embedding(embedding));
        self
    }
}
