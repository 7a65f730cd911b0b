use super::*;
use crate::corpus::parse_embedding;

#[test]
fn encoded_embedding_parses_back() {
    let embedding = [0.25, -1.0, 0.0, 3.5];
    let encoded = encode_embedding(&embedding);

    assert_eq!(encoded, "[0.25,-1,0,3.5]");
    assert_eq!(parse_embedding(&encoded).expect("valid JSON"), embedding);
}

#[test]
fn qa_entry_builder() {
    let entry = NewQaEntry::new("What is ibuprofen?", "An NSAID.")
        .with_source("NIH", "Ibuprofen")
        .with_embedding(&[1.0, 0.0]);

    assert_eq!(entry.question, "What is ibuprofen?");
    assert_eq!(entry.source.as_deref(), Some("NIH"));
    assert_eq!(entry.focus_area.as_deref(), Some("Ibuprofen"));
    assert_eq!(entry.embedding.as_deref(), Some("[1,0]"));
}

#[test]
fn medication_entry_without_embedding() {
    let entry = NewMedicationEntry::new("Metformin").with_details("Diabetes", "Nausea", "Alcohol");

    assert_eq!(entry.indication.as_deref(), Some("Diabetes"));
    assert_eq!(entry.embedding, None);
}
