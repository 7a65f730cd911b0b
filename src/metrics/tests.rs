use super::*;
use crate::embeddings::HashEmbedder;

struct BrokenEmbedder;

impl EmbeddingProvider for BrokenEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("model unavailable")
    }

    fn dimension(&self) -> usize {
        16
    }
}

fn engine() -> MetricsEngine {
    MetricsEngine::new(Arc::new(HashEmbedder::new(256)))
}

fn medication(drug: &str) -> MedicationRecord {
    MedicationRecord {
        drug: drug.to_string(),
        indication: "Pain and fever".to_string(),
        side_effects: "Stomach upset".to_string(),
        drug_interaction: "Warfarin".to_string(),
        embedding: vec![1.0, 0.0],
    }
}

#[test]
fn reference_scored_against_itself() {
    let answer = "Adults can take 200 to 400 mg of ibuprofen every 4 to 6 hours.";
    let report = engine()
        .score("What is the ibuprofen dosage?", answer, answer)
        .expect("hash embedder never fails");

    assert_eq!(report.rouge_scores.rouge1, 1.0);
    assert_eq!(report.rouge_scores.rouge2, 1.0);
    assert_eq!(report.rouge_scores.rouge_l, 1.0);
    assert!((report.cosine_similarity.reference_generated - 1.0).abs() < 1e-4);
    assert_eq!(
        report.cosine_similarity.query_reference,
        report.cosine_similarity.query_generated
    );
    assert_eq!(report.sts_similarity, report.cosine_similarity.query_generated);
}

#[test]
fn report_values_are_rounded() {
    let report = engine()
        .score(
            "how do statins work",
            "Statins lower cholesterol by blocking an enzyme in the liver.",
            "They block a liver enzyme that makes cholesterol.",
        )
        .expect("scores");

    for value in [
        report.cosine_similarity.query_reference,
        report.cosine_similarity.query_generated,
        report.cosine_similarity.reference_generated,
        report.rouge_scores.rouge1,
        report.rouge_scores.rouge2,
        report.rouge_scores.rouge_l,
    ] {
        assert_eq!(value, round4(value));
        assert!((-1.0..=1.0).contains(&value));
    }
}

#[test]
fn empty_generation_scores_zero_cosine() {
    let report = engine()
        .score("question", "reference answer", "")
        .expect("degenerate cosine is not an error");

    assert_eq!(report.cosine_similarity.query_generated, 0.0);
    assert_eq!(report.cosine_similarity.reference_generated, 0.0);
    assert_eq!(report.rouge_scores.rouge1, 0.0);
}

#[test]
fn embedding_failure_fails_scoring() {
    let engine = MetricsEngine::new(Arc::new(BrokenEmbedder));
    assert!(engine.score("q", "r", "g").is_err());
}

#[test]
fn report_serialization_keys() {
    let json = serde_json::to_value(MetricsReport::default()).expect("serializes");

    assert!(json["cosine_similarity"]["query_reference"].is_number());
    assert!(json["sts_similarity"].is_number());
    assert!(json["rouge_scores"]["rougeL"].is_number());
}

#[test]
fn missing_medication_match() {
    let score = engine().score_medication("what is this pill", None);
    assert_eq!(score, MedicationScore::NoValidMatch);

    let json = serde_json::to_value(score).expect("serializes");
    assert_eq!(json, serde_json::json!({"error": "No valid medication match found"}));

    assert_eq!(
        engine().score_medication("what is this pill", Some(&medication("  "))),
        MedicationScore::NoValidMatch
    );
}

#[test]
fn medication_relevance_scores() {
    let score =
        engine().score_medication("what is ibuprofen used for", Some(&medication("Ibuprofen")));

    match score {
        MedicationScore::Scored {
            bleu,
            cosine_similarity,
            degraded,
        } => {
            // a one-word drug name has no 2-gram matches
            assert_eq!(bleu, 0.0);
            assert!(cosine_similarity > 0.0);
            assert!(!degraded);
        }
        MedicationScore::NoValidMatch => panic!("expected a score"),
    }

    let json = serde_json::to_value(score).expect("serializes");
    assert!(json["BLEU"].is_number());
    assert_eq!(json["degraded"], false);
}

#[test]
fn medication_embedding_failure_degrades() {
    let engine = MetricsEngine::new(Arc::new(BrokenEmbedder));
    let score = engine.score_medication("ibuprofen dosage", Some(&medication("Ibuprofen")));

    assert_eq!(
        score,
        MedicationScore::Scored {
            bleu: 0.0,
            cosine_similarity: 0.0,
            degraded: true,
        }
    );
}

#[test]
fn lexical_scores_between_answers() {
    let identical =
        LexicalScores::between("rest and drink fluids daily", "rest and drink fluids daily");
    assert_eq!(identical.bleu, 1.0);
    assert_eq!(identical.token_f1, 1.0);

    let disjoint = LexicalScores::between("rest and drink fluids", "consult a pharmacist");
    assert_eq!(disjoint.bleu, 0.0);
    assert_eq!(disjoint.token_f1, 0.0);
}
