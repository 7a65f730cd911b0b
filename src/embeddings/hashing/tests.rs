use super::*;

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[test]
fn output_is_unit_length() {
    let embedder = HashEmbedder::new(64);
    let vector = embedder
        .embed("What is the recommended dosage of ibuprofen?")
        .expect("should embed");

    assert_eq!(vector.len(), 64);
    assert!((norm(&vector) - 1.0).abs() < 1e-5);
}

#[test]
fn deterministic_across_calls() {
    let embedder = HashEmbedder::new(128);
    let first = embedder.embed("Side effects of metformin").expect("embed");
    let second = embedder.embed("Side effects of metformin").expect("embed");
    assert_eq!(first, second);
}

#[test]
fn case_and_punctuation_insensitive() {
    let embedder = HashEmbedder::new(128);
    let a = embedder.embed("Ibuprofen, dosage!").expect("embed");
    let b = embedder.embed("ibuprofen dosage").expect("embed");
    assert_eq!(a, b);
}

#[test]
fn empty_text_is_zero_vector() {
    let embedder = HashEmbedder::new(32);

    for text in ["", "   ", "?!"] {
        let vector = embedder.embed(text).expect("empty text must not fail");
        assert_eq!(vector.len(), 32);
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}

#[test]
fn dimension_has_a_floor() {
    assert_eq!(HashEmbedder::new(1).dimension(), MIN_DIMENSION);
    assert_eq!(HashEmbedder::default().dimension(), 768);
}
