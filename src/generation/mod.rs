//! Answer generation
//!
//! The language model is reached through a single `generate(prompt) -> text`
//! capability. Every use of the model is one variant of [`PromptTemplate`], so a
//! new persona is new data rather than a new code path.

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::sync::Arc;

/// The 20 qualitative dimensions used when the model grades an answer, in the
/// order the scores are expected back.
pub const RUBRIC_CRITERIA: [&str; 20] = [
    "Relevance",
    "Coherence",
    "Factual Accuracy",
    "Fluency",
    "Completeness",
    "Naturalness",
    "Context Appropriateness",
    "Originality",
    "Tone Adherence",
    "Comprehensibility",
    "Source Justification",
    "Level of Detail",
    "Bias Absence",
    "Medical Realism",
    "Patient Adaptability",
    "RAG Verification",
    "Consistency with Known Facts",
    "Ability to Identify Uncertainty",
    "Robustness to Input Errors",
    "Compliance with Instructions",
];

pub const RUBRIC_MAX_SCORE: f64 = 10.0;

/// Text completion backend
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    #[inline]
    fn generate(&self, prompt: &str) -> Result<String> {
        (**self).generate(prompt)
    }
}

/// Prompt personas understood by the service
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PromptTemplate<'a> {
    /// Clinical assistant answering a question, grounded when `context` is present
    ClinicalAnswer {
        question: &'a str,
        context: Option<&'a str>,
        language: &'a str,
    },
    /// Fix OCR mistakes in a medication name read from a label
    MedicationCorrection { extracted_text: &'a str },
    /// Practical information sheet for a named medication
    MedicationDetails {
        medication: &'a str,
        language: &'a str,
    },
    /// Grade a generated answer along [`RUBRIC_CRITERIA`]
    RubricGrading {
        question: &'a str,
        expected_answer: &'a str,
        generated_answer: &'a str,
    },
}

impl PromptTemplate<'_> {
    /// Short name used in logs and error messages
    #[inline]
    pub fn purpose(&self) -> &'static str {
        match self {
            Self::ClinicalAnswer { .. } => "clinical answer",
            Self::MedicationCorrection { .. } => "medication name correction",
            Self::MedicationDetails { .. } => "medication details",
            Self::RubricGrading { .. } => "rubric grading",
        }
    }

    #[inline]
    pub fn render(&self) -> String {
        match *self {
            Self::ClinicalAnswer {
                question,
                context,
                language,
            } => format!(
                "You are a medical AI assistant with expertise in clinical studies.\n\
                 Your goal is to provide accurate and structured answers.\n\n\
                 **Instructions:**\n\
                 - Prioritize medically validated information.\n\
                 - If the context is unclear, clarify before answering.\n\
                 - Use clear, professional language.\n\
                 - Cite sources if available.\n\n\
                 **Question:** {question}\n\
                 **Context:** {context}\n\
                 **Language:** {language}\n",
                context = context.unwrap_or("No reference context available."),
            ),
            Self::MedicationCorrection { extracted_text } => format!(
                "You are an AI specialized in medication data correction.\n\
                 Your task is to correct the name of a medication that may have errors due to OCR mistakes.\n\n\
                 **Instructions:**\n\
                 - If the extracted name is misspelled, correct it.\n\
                 - If it is ambiguous, return the closest known medication.\n\
                 - Prioritize well-known pharmaceutical brands and medicines.\n\
                 - Do not add extra words or explanations, return only the corrected name.\n\n\
                 **Extracted Medication Name:** {extracted_text}\n"
            ),
            Self::MedicationDetails {
                medication,
                language,
            } => format!(
                "You are a medical AI assistant with expertise in pharmaceuticals.\n\
                 Provide **practical** and **concise** information about the given medication.\n\n\
                 **Instructions:**\n\
                 - Clearly explain why this medication is prescribed.\n\
                 - List contraindications (who should not take it).\n\
                 - Mention common and serious side effects.\n\
                 - If applicable, suggest precautions or interactions with other drugs.\n\
                 - Ensure accuracy and use reliable medical knowledge.\n\n\
                 **Medication:** {medication}\n\
                 **Language:** {language}\n"
            ),
            Self::RubricGrading {
                question,
                expected_answer,
                generated_answer,
            } => {
                let criteria = RUBRIC_CRITERIA
                    .iter()
                    .enumerate()
                    .map(|(i, name)| format!("{}. {}", i + 1, name))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "Evaluate the response on a scale from 0 to 10 for the following criteria:\n\n\
                     **Question:** {question}\n\
                     **Expected Answer:** {expected_answer}\n\
                     **Generated Answer:** {generated_answer}\n\n\
                     Criteria:\n{criteria}\n\n\
                     Provide exactly {count} scores separated by commas, in the order listed, \
                     with no other text.\n",
                    count = RUBRIC_CRITERIA.len(),
                )
            }
        }
    }
}
