//! In-memory doubles shared by unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::corpus::{CorpusSource, QuestionAnswer, RawRow};
use crate::database::models::encode_embedding;
use crate::embeddings::EmbeddingProvider;
use crate::generation::TextGenerator;

#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<HashMap<String, Vec<RawRow>>>,
    pairs: Mutex<Vec<QuestionAnswer>>,
    pub failing: AtomicBool,
    pub fetches: AtomicUsize,
}

impl MemorySource {
    pub fn set_table(&self, table: &str, rows: Vec<RawRow>) {
        self.tables
            .lock()
            .expect("lock not poisoned")
            .insert(table.to_string(), rows);
    }

    pub fn with_table(self, table: &str, rows: Vec<RawRow>) -> Self {
        self.set_table(table, rows);
        self
    }

    pub fn with_pairs(self, pairs: &[(&str, &str)]) -> Self {
        *self.pairs.lock().expect("lock not poisoned") = pairs
            .iter()
            .map(|(question, answer)| QuestionAnswer {
                question: (*question).to_string(),
                answer: (*answer).to_string(),
            })
            .collect();
        self
    }
}

#[async_trait]
impl CorpusSource for MemorySource {
    async fn fetch_rows(&self, table: &str, _columns: &[&str]) -> anyhow::Result<Vec<RawRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("database unreachable");
        }
        Ok(self
            .tables
            .lock()
            .expect("lock not poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn sample_pairs(
        &self,
        _table: &str,
        count: usize,
    ) -> anyhow::Result<Vec<QuestionAnswer>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("database unreachable");
        }
        let pairs = self.pairs.lock().expect("lock not poisoned");
        Ok(pairs.iter().take(count).cloned().collect())
    }
}

/// QA row whose embedding is computed from `question`
pub fn qa_row(embedder: &dyn EmbeddingProvider, question: &str, answer: &str) -> RawRow {
    let embedding = embedder.embed(question).expect("test embedder");
    RawRow {
        fields: vec![
            Some(answer.to_string()),
            Some("MedQuAD".to_string()),
            Some(question.to_string()),
        ],
        embedding: encode_embedding(&embedding),
    }
}

/// Medication row whose embedding is computed from the drug name and indication
pub fn medication_row(embedder: &dyn EmbeddingProvider, drug: &str, indication: &str) -> RawRow {
    let embedding = embedder
        .embed(&format!("{drug} {indication}"))
        .expect("test embedder");
    RawRow {
        fields: vec![
            Some(drug.to_string()),
            Some(indication.to_string()),
            Some("Nausea, dizziness".to_string()),
            Some("Alcohol".to_string()),
        ],
        embedding: encode_embedding(&embedding),
    }
}

type Reply = Box<dyn Fn(&str) -> anyhow::Result<String> + Send + Sync>;

/// Generator driven by a closure over the prompt, recording every prompt it sees
pub struct ScriptedGenerator {
    reply: Reply,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| Err(anyhow::anyhow!("{}", message)))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock not poisoned").clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .expect("lock not poisoned")
            .push(prompt.to_string());
        (self.reply)(prompt)
    }
}
