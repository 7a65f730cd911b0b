use super::*;
use crate::embeddings::HashEmbedder;
use crate::test_support::{MemorySource, ScriptedGenerator, medication_row, qa_row};
use std::sync::atomic::Ordering;
use tempfile::TempDir;

const IBUPROFEN_ANSWER: &str = "Adults may take 200 to 400 mg every 4 to 6 hours.";

struct Fixture {
    assistant: Assistant,
    source: Arc<MemorySource>,
    generator: Arc<ScriptedGenerator>,
    temp_dir: TempDir,
}

impl Fixture {
    fn log(&self) -> MetricsLog {
        MetricsLog::new(self.temp_dir.path().join("metrics_log.csv"))
    }
}

fn qa_rows(embedder: &HashEmbedder) -> Vec<crate::corpus::RawRow> {
    vec![
        qa_row(
            embedder,
            "What is the recommended dosage of ibuprofen for adults?",
            IBUPROFEN_ANSWER,
        ),
        qa_row(
            embedder,
            "What are the side effects of metformin?",
            "Metformin can cause nausea and diarrhea.",
        ),
        qa_row(
            embedder,
            "How is asthma treated?",
            "Inhaled corticosteroids and bronchodilators.",
        ),
    ]
}

fn medication_rows(embedder: &HashEmbedder) -> Vec<crate::corpus::RawRow> {
    vec![
        medication_row(embedder, "Metformin", "type 2 diabetes"),
        medication_row(embedder, "Ibuprofen", "pain fever inflammation"),
        medication_row(embedder, "Salbutamol", "asthma bronchospasm"),
        medication_row(embedder, "Lisinopril", "high blood pressure"),
    ]
}

fn fixture(generator: ScriptedGenerator) -> Fixture {
    let embedder = Arc::new(HashEmbedder::new(256));
    let source = Arc::new(
        MemorySource::default()
            .with_table("qa_corpus", qa_rows(&embedder))
            .with_table("medication_corpus", medication_rows(&embedder)),
    );
    let generator = Arc::new(generator);
    let temp_dir = TempDir::new().expect("Failed to create temp directory");

    let corpus = Arc::new(CorpusCache::new(source.clone()));
    let assistant = Assistant::new(
        embedder,
        generator.clone(),
        corpus,
        RetrievalConfig::default(),
    )
    .with_metrics_log(MetricsLog::new(temp_dir.path().join("metrics_log.csv")));

    Fixture {
        assistant,
        source,
        generator,
        temp_dir,
    }
}

#[tokio::test]
async fn grounded_answer_is_scored_and_logged() {
    let fixture = fixture(ScriptedGenerator::replying(
        "Adults may take 200 to 400 mg of ibuprofen every 4 to 6 hours.",
    ));

    let response = fixture
        .assistant
        .answer("recommended dosage of ibuprofen for adults", None)
        .await
        .expect("retrieval succeeds");

    match &response.outcome {
        AnswerOutcome::Grounded {
            answer,
            source,
            metrics,
        } => {
            assert!(answer.contains("ibuprofen"));
            assert_eq!(source.record.answer, IBUPROFEN_ANSWER);
            assert!(source.similarity >= 0.5);
            let metrics = metrics.expect("scored");
            assert!(metrics.rouge_scores.rouge1 > 0.5);
        }
        other => panic!("expected grounded answer, got {:?}", other),
    }
    assert!(response.response_time >= 0.0);
    assert_eq!(response.response_time, round4(response.response_time));

    let prompts = fixture.generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(&format!("**Context:** {IBUPROFEN_ANSWER}")));
    assert!(prompts[0].contains("**Language:** english"));

    let entries = fixture.log().read_entries().expect("log readable");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].best_match, IBUPROFEN_ANSWER);
    assert_eq!(entries[0].query, "recommended dosage of ibuprofen for adults");
}

#[tokio::test]
async fn unmatched_question_gets_ungrounded_answer() {
    let fixture = fixture(ScriptedGenerator::replying("General advice."));

    let response = fixture
        .assistant
        .answer("zzz qqq xyzzy", Some("french"))
        .await
        .expect("no match is not an error");

    match &response.outcome {
        AnswerOutcome::Ungrounded {
            answer, disclaimer, ..
        } => {
            assert_eq!(answer, "General advice.");
            assert_eq!(*disclaimer, NO_CONTEXT_DISCLAIMER);
        }
        other => panic!("expected ungrounded answer, got {:?}", other),
    }

    let prompts = fixture.generator.prompts();
    assert!(prompts[0].contains("No reference context available."));
    assert!(prompts[0].contains("**Language:** french"));

    let entries = fixture.log().read_entries().expect("log readable");
    assert_eq!(entries[0].best_match, "None");
}

#[tokio::test]
async fn generation_failure_is_reported_not_raised() {
    let fixture = fixture(ScriptedGenerator::failing("connection refused"));

    let response = fixture
        .assistant
        .answer("recommended dosage of ibuprofen for adults", None)
        .await
        .expect("generation failure is not an error");

    match &response.outcome {
        AnswerOutcome::Failed { message } => {
            assert!(message.starts_with(GENERATION_FALLBACK));
            assert!(message.contains("connection refused"));
        }
        other => panic!("expected failure outcome, got {:?}", other),
    }
    assert_eq!(response.outcome.answer(), None);
    assert!(fixture.log().read_entries().expect("readable").is_empty());
}

#[tokio::test]
async fn slow_generation_times_out() {
    let generator = ScriptedGenerator::new(|_| {
        std::thread::sleep(Duration::from_millis(300));
        Ok("late".to_string())
    });
    let mut fixture = fixture(generator);
    fixture.assistant = fixture
        .assistant
        .with_request_timeout(Duration::from_millis(50));

    let response = fixture
        .assistant
        .answer("recommended dosage of ibuprofen for adults", None)
        .await
        .expect("timeout is reported in the outcome");

    match &response.outcome {
        AnswerOutcome::Failed { message } => assert!(message.contains("timed out")),
        other => panic!("expected failure outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn database_failure_is_an_error() {
    let fixture = fixture(ScriptedGenerator::replying("unused"));
    fixture.source.failing.store(true, Ordering::SeqCst);

    let error = fixture
        .assistant
        .answer("anything", None)
        .await
        .expect_err("corpus cannot be loaded");

    assert!(matches!(error, RagError::Database(_)));
    assert!(fixture.generator.prompts().is_empty());
}

#[tokio::test]
async fn get_sources_respects_threshold() {
    let fixture = fixture(ScriptedGenerator::replying("unused"));

    let found = fixture
        .assistant
        .get_sources("side effects of metformin")
        .await
        .expect("lookup")
        .expect("match above threshold");
    assert_eq!(found.record.answer, "Metformin can cause nausea and diarrhea.");

    let missing = fixture
        .assistant
        .get_sources("zzz qqq xyzzy")
        .await
        .expect("lookup");
    assert!(missing.is_none());
    assert!(fixture.generator.prompts().is_empty());
}

#[tokio::test]
async fn medication_info_returns_top_three() {
    let fixture = fixture(ScriptedGenerator::replying("unused"));

    let info = fixture
        .assistant
        .get_medication_info("ibuprofen for pain and fever")
        .await
        .expect("lookup")
        .expect("corpus is not empty");

    assert_eq!(info.top_matches.len(), 3);
    assert_eq!(info.top_matches[0].record.drug, "Ibuprofen");
    assert!(
        info.top_matches
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity)
    );

    let mean = info
        .top_matches
        .iter()
        .map(|m| f64::from(m.similarity))
        .sum::<f64>()
        / 3.0;
    assert!((info.top_n_avg_similarity - mean).abs() < 1e-4);
}

#[tokio::test]
async fn medication_answer_uses_best_drug_sheet() {
    let fixture = fixture(ScriptedGenerator::replying("Ibuprofen relieves pain."));

    let response = fixture
        .assistant
        .answer_medication("what is ibuprofen used for", None)
        .await
        .expect("lookup");

    match &response.outcome {
        AnswerOutcome::Grounded {
            source, metrics, ..
        } => {
            assert_eq!(source.best().map(|m| m.record.drug.as_str()), Some("Ibuprofen"));
            assert!(matches!(
                metrics,
                Some(MedicationScore::Scored {
                    degraded: false,
                    ..
                })
            ));
        }
        other => panic!("expected grounded answer, got {:?}", other),
    }

    let prompts = fixture.generator.prompts();
    assert!(prompts[0].contains("Drug: Ibuprofen"));
    assert!(prompts[0].contains("Indication: pain fever inflammation"));
}

#[tokio::test]
async fn medication_answer_without_corpus() {
    let fixture = fixture(ScriptedGenerator::replying("General advice."));
    fixture.source.set_table("medication_corpus", Vec::new());

    let response = fixture
        .assistant
        .answer_medication("what is ibuprofen used for", None)
        .await
        .expect("empty corpus is not an error");

    match response.outcome {
        AnswerOutcome::Ungrounded {
            disclaimer,
            metrics,
            ..
        } => {
            assert_eq!(disclaimer, NO_MEDICATION_DISCLAIMER);
            assert_eq!(metrics, Some(MedicationScore::NoValidMatch));
        }
        other => panic!("expected ungrounded answer, got {:?}", other),
    }
}

#[tokio::test]
async fn label_is_corrected_then_described() {
    let generator = ScriptedGenerator::new(|prompt| {
        if prompt.contains("**Extracted Medication Name:**") {
            Ok("  Ibuprofen \n".to_string())
        } else {
            Ok("Ibuprofen is a nonsteroidal anti-inflammatory drug.".to_string())
        }
    });
    let fixture = fixture(generator);

    let outcome = fixture
        .assistant
        .process_medication_label("IBUPROFNE 400", None)
        .await;

    assert_eq!(
        outcome,
        LabelOutcome::Success {
            corrected_name: "Ibuprofen".to_string(),
            medication_info: "Ibuprofen is a nonsteroidal anti-inflammatory drug.".to_string(),
        }
    );

    let prompts = fixture.generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("IBUPROFNE 400"));
    assert!(prompts[1].contains("**Medication:** Ibuprofen\n"));

    let json = serde_json::to_value(&outcome).expect("serializes");
    assert_eq!(json["status"], "success");
}

#[tokio::test]
async fn label_errors_are_payloads() {
    let fixture = fixture(ScriptedGenerator::failing("model offline"));

    let empty = fixture.assistant.process_medication_label("   ", None).await;
    assert!(matches!(empty, LabelOutcome::Error { .. }));
    assert!(fixture.generator.prompts().is_empty());

    match fixture
        .assistant
        .process_medication_label("Paracetamol", None)
        .await
    {
        LabelOutcome::Error { message } => assert!(message.contains("model offline")),
        other => panic!("expected error outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn refresh_reloads_changed_tables() {
    let fixture = fixture(ScriptedGenerator::replying("unused"));
    let embedder = HashEmbedder::new(256);

    assert!(
        fixture
            .assistant
            .get_sources("How do vaccines work?")
            .await
            .expect("lookup")
            .is_none()
    );

    let mut rows = qa_rows(&embedder);
    rows.push(qa_row(
        &embedder,
        "How do vaccines work?",
        "Vaccines train the immune system.",
    ));
    fixture.source.set_table("qa_corpus", rows);

    let refreshed = fixture
        .assistant
        .refresh_corpus(None)
        .await
        .expect("refresh");
    assert_eq!(refreshed.len(), 2);
    assert_eq!(refreshed[0].table, "qa_corpus");
    assert_eq!(refreshed[0].report.loaded, 4);
    assert_eq!(refreshed[1].report.loaded, 4);

    let found = fixture
        .assistant
        .get_sources("How do vaccines work?")
        .await
        .expect("lookup")
        .expect("new row visible after refresh");
    assert_eq!(found.record.answer, "Vaccines train the immune system.");

    let only_qa = fixture
        .assistant
        .refresh_corpus(Some("qa_corpus"))
        .await
        .expect("refresh");
    assert_eq!(only_qa.len(), 1);
}

#[tokio::test]
async fn failed_refresh_keeps_serving_cached_corpus() {
    let fixture = fixture(ScriptedGenerator::replying("unused"));
    let question = "What is the recommended dosage of ibuprofen for adults?";

    fixture
        .assistant
        .get_sources(question)
        .await
        .expect("initial load")
        .expect("ibuprofen entry matches");

    fixture.source.failing.store(true, Ordering::SeqCst);
    let error = fixture
        .assistant
        .refresh_corpus(None)
        .await
        .expect_err("database is down");
    assert!(matches!(error, RagError::Database(_)));

    let found = fixture
        .assistant
        .get_sources(question)
        .await
        .expect("previous snapshot still served")
        .expect("ibuprofen entry matches");
    assert_eq!(found.record.answer, IBUPROFEN_ANSWER);
    assert_eq!(
        fixture.assistant.corpus().cached_tables().await,
        ["qa_corpus"]
    );
}

#[tokio::test]
async fn refresh_drops_unconfigured_tables() {
    let fixture = fixture(ScriptedGenerator::replying("unused"));
    let embedder = HashEmbedder::new(256);
    fixture.source.set_table("archive", qa_rows(&embedder));
    fixture
        .assistant
        .corpus()
        .load::<QaRecord>("archive")
        .await
        .expect("archive loads");

    let refreshed = fixture
        .assistant
        .refresh_corpus(Some("archive"))
        .await
        .expect("refresh");

    assert!(refreshed.is_empty());
    assert!(fixture.assistant.corpus().cached_tables().await.is_empty());
}

#[test]
fn outcome_serialization_is_tagged() {
    let outcome: QaAnswer = AnswerOutcome::Ungrounded {
        answer: "text".to_string(),
        disclaimer: NO_CONTEXT_DISCLAIMER,
        metrics: None,
    };

    let json = serde_json::to_value(&outcome).expect("serializes");
    assert_eq!(json["status"], "ungrounded");
    assert_eq!(json["disclaimer"], NO_CONTEXT_DISCLAIMER);
}
