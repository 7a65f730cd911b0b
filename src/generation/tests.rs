use super::*;

#[test]
fn clinical_prompt_includes_context_and_language() {
    let prompt = PromptTemplate::ClinicalAnswer {
        question: "What is the recommended dosage of ibuprofen?",
        context: Some("Adults: 200-400 mg every 4 to 6 hours."),
        language: "french",
    }
    .render();

    assert!(prompt.contains("**Question:** What is the recommended dosage of ibuprofen?"));
    assert!(prompt.contains("**Context:** Adults: 200-400 mg every 4 to 6 hours."));
    assert!(prompt.contains("**Language:** french"));
}

#[test]
fn ungrounded_prompt_states_missing_context() {
    let prompt = PromptTemplate::ClinicalAnswer {
        question: "q",
        context: None,
        language: "english",
    }
    .render();

    assert!(prompt.contains("No reference context available."));
}

#[test]
fn rubric_prompt_lists_every_criterion_in_order() {
    let prompt = PromptTemplate::RubricGrading {
        question: "q",
        expected_answer: "expected",
        generated_answer: "generated",
    }
    .render();

    let mut last_position = 0;
    for (i, criterion) in RUBRIC_CRITERIA.iter().enumerate() {
        let line = format!("{}. {}", i + 1, criterion);
        let position = prompt.find(&line).expect("criterion listed");
        assert!(position >= last_position);
        last_position = position;
    }
    assert!(prompt.contains("exactly 20 scores"));
}

#[test]
fn correction_prompt_carries_extracted_text() {
    let template = PromptTemplate::MedicationCorrection {
        extracted_text: "Ibuprofne 400mg",
    };
    assert_eq!(template.purpose(), "medication name correction");
    assert!(template.render().contains("**Extracted Medication Name:** Ibuprofne 400mg"));
}
