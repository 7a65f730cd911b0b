use super::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-4
}

#[test]
fn tokenizer_lowercases_and_splits_on_punctuation() {
    assert_eq!(
        tokenize("Ibuprofen, 200-400mg; every 4-6 HOURS!"),
        ["ibuprofen", "200", "400mg", "every", "4", "6", "hours"]
    );
    assert!(tokenize("  ...  ").is_empty());
}

#[test]
fn identical_texts_score_one() {
    let text = "Take ibuprofen with food to reduce stomach upset.";

    assert!(close(rouge_n(text, text, 1).fmeasure, 1.0));
    assert!(close(rouge_n(text, text, 2).fmeasure, 1.0));
    assert!(close(rouge_l(text, text).fmeasure, 1.0));
}

#[test]
fn partial_overlap() {
    let reference = "the cat sat on the mat";
    let candidate = "The cat sat.";

    let rouge1 = rouge_n(reference, candidate, 1);
    assert!(close(rouge1.precision, 1.0));
    assert!(close(rouge1.recall, 0.5));
    assert!(close(rouge1.fmeasure, 2.0 / 3.0));

    let rouge2 = rouge_n(reference, candidate, 2);
    assert!(close(rouge2.recall, 0.4));
    assert!(close(rouge2.fmeasure, 4.0 / 7.0));

    assert!(close(rouge_l(reference, candidate).fmeasure, 2.0 / 3.0));
}

#[test]
fn rouge_l_follows_subsequence_order() {
    let rouge = rouge_l("a b c d", "d c b a");
    assert!(close(rouge.fmeasure, 0.25));
}

#[test]
fn empty_inputs_score_zero() {
    assert_eq!(rouge_n("", "", 1).fmeasure, 0.0);
    assert_eq!(rouge_n("some text", "", 1).fmeasure, 0.0);
    assert_eq!(rouge_l("", "some text").fmeasure, 0.0);
    assert_eq!(token_f1("", "anything"), 0.0);
}

#[test]
fn bleu_identical_sentence() {
    let tokens: Vec<&str> = "the patient should rest and drink fluids".split(' ').collect();
    assert!(close(sentence_bleu(&tokens, &tokens), 1.0));
}

#[test]
fn bleu_brevity_penalty() {
    let reference: Vec<&str> = "a b c d e f g h".split(' ').collect();
    let candidate: Vec<&str> = "a b c d".split(' ').collect();

    assert!(close(sentence_bleu(&reference, &candidate), (-1.0f64).exp()));
}

#[test]
fn bleu_without_higher_order_matches_is_zero() {
    let question: Vec<&str> = "what is ibuprofen used for".split(' ').collect();

    assert_eq!(sentence_bleu(&question, &["ibuprofen"]), 0.0);
    assert_eq!(sentence_bleu(&question, &[] as &[&str]), 0.0);
}

#[test]
fn token_f1_uses_sets() {
    assert!(close(token_f1("a b c d", "a b x"), 4.0 / 7.0));
    assert!(close(token_f1("a a b", "b a"), 1.0));
    // case sensitive
    assert_eq!(token_f1("Aspirin", "aspirin"), 0.0);
}
