//! Refinement loop behavior with scripted extraction and judge models.

mod common;

use common::{page_with_reference, ScriptedModel};
use docling_llm_refine::prompts::ComparisonPrompts;
use docling_llm_refine::{
    ConfidenceEvaluator, ModelError, Prompts, RefineError, RefinePolicy, RefinementController,
    ScoreSource, VisionExtractor,
};
use proptest::prelude::*;
use std::sync::Arc;

const REFERENCE: &str = "Invoice Total Due 500";

fn policy(max_attempts: u32, confidence_threshold: f64) -> RefinePolicy {
    RefinePolicy {
        max_attempts,
        confidence_threshold,
    }
}

/// Controller scoring with the phrase-overlap heuristic only.
fn offline_controller(model: &Arc<ScriptedModel>, policy: RefinePolicy) -> RefinementController {
    RefinementController::new(
        VisionExtractor::new(model.clone(), Prompts::default().text_extraction),
        ConfidenceEvaluator::offline(),
        policy,
    )
}

fn judged_controller(
    model: &Arc<ScriptedModel>,
    judge: &Arc<ScriptedModel>,
    policy: RefinePolicy,
) -> RefinementController {
    RefinementController::new(
        VisionExtractor::new(model.clone(), Prompts::default().text_extraction),
        ConfidenceEvaluator::new(judge.clone(), ComparisonPrompts::default()),
        policy,
    )
}

#[tokio::test]
async fn test_exact_transcription_converges_on_first_attempt() {
    let model = Arc::new(ScriptedModel::texts(&[REFERENCE]));
    let controller = offline_controller(&model, policy(3, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert_eq!(outcome.confidence, 100.0);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.converged);
    assert_eq!(outcome.page.model_text, REFERENCE);
    assert_eq!(model.calls(), 1);
}

#[test]
fn test_controller_exposes_policy() {
    let model = Arc::new(ScriptedModel::texts(&[]));
    let controller = offline_controller(&model, policy(0, 75.0));

    assert_eq!(controller.policy().confidence_threshold, 75.0);
    assert_eq!(controller.policy().attempt_limit(), 1);
}

#[tokio::test]
async fn test_partial_transcription_is_retried_with_hints() {
    let model = Arc::new(ScriptedModel::texts(&["Invoice Total", REFERENCE]));
    let controller = offline_controller(&model, policy(3, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(outcome.converged);
    assert_eq!(outcome.confidence, 100.0);
    assert_eq!(outcome.page.model_text, REFERENCE);

    let first = &outcome.history[0];
    assert!(first.confidence < 80.0);
    assert!(first.missing_terms > 0);
    assert_eq!(first.source, ScoreSource::Fallback);

    // Attempt 2 asks for the missing phrase and still carries the reference
    let retry_prompt = model.system_prompt(1);
    assert!(retry_prompt.contains(
        "Ensure that the following keywords are included in the extraction: Invoice Total Due 500."
    ));
    assert!(retry_prompt.contains("<reference>"));
    assert!(!model.system_prompt(0).contains("Ensure that the following keywords"));
}

#[tokio::test]
async fn test_exhausted_budget_returns_best_attempt() {
    let model = Arc::new(ScriptedModel::texts(&["first", "second", "third"]));
    let judge = Arc::new(ScriptedModel::judge(&[40.0, 70.0, 55.0]));
    let controller = judged_controller(&model, &judge, policy(3, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 3);
    assert!(!outcome.converged);
    assert_eq!(outcome.confidence, 70.0);
    assert_eq!(outcome.page.model_text, "second");
    assert_eq!(outcome.page.deterministic_text, REFERENCE);
    assert_eq!(model.calls(), 3);
    assert_eq!(judge.calls(), 3);
}

#[tokio::test]
async fn test_ties_keep_the_earlier_attempt() {
    let model = Arc::new(ScriptedModel::texts(&["first", "second"]));
    let judge = Arc::new(ScriptedModel::judge(&[50.0, 50.0]));
    let controller = judged_controller(&model, &judge, policy(2, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert_eq!(outcome.page.model_text, "first");
    assert_eq!(outcome.confidence, 50.0);
}

#[tokio::test]
async fn test_zero_confidence_attempt_is_still_kept() {
    let model = Arc::new(ScriptedModel::texts(&["nothing useful"]));
    let judge = Arc::new(ScriptedModel::judge(&[0.0]));
    let controller = judged_controller(&model, &judge, policy(1, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert_eq!(outcome.page.model_text, "nothing useful");
    assert_eq!(outcome.confidence, 0.0);
}

#[tokio::test]
async fn test_fenced_judge_verdict_is_used() {
    let model = Arc::new(ScriptedModel::texts(&["Invoice Total"]));
    let judge = Arc::new(ScriptedModel::new([Ok::<_, &str>(
        "```json\n{\"confidence\": 88, \"missing_keywords\": [\"Due 500\"]}\n```",
    )]));
    let controller = judged_controller(&model, &judge, policy(3, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert!(outcome.converged);
    assert_eq!(outcome.confidence, 88.0);
    assert_eq!(outcome.history[0].source, ScoreSource::Judge);
    assert_eq!(outcome.history[0].missing_terms, 1);
}

#[tokio::test]
async fn test_judge_failure_falls_back_to_heuristic() {
    let model = Arc::new(ScriptedModel::texts(&[REFERENCE]));
    let judge = Arc::new(ScriptedModel::new([Err::<&str, _>("rate limited")]));
    let controller = judged_controller(&model, &judge, policy(3, 80.0));

    let outcome = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap();

    assert_eq!(outcome.confidence, 100.0);
    assert_eq!(outcome.history[0].source, ScoreSource::Fallback);
}

#[tokio::test]
async fn test_extraction_failure_reports_attempt() {
    let model = Arc::new(ScriptedModel::new([
        Ok("Invoice Total"),
        Err("service unavailable"),
    ]));
    let controller = offline_controller(&model, policy(3, 80.0));

    let err = controller
        .refine(page_with_reference(REFERENCE))
        .await
        .unwrap_err();

    match err {
        RefineError::Extraction {
            pdf_name,
            page,
            attempt,
            source,
        } => {
            assert_eq!(pdf_name, "invoice");
            assert_eq!(page, 1);
            assert_eq!(attempt, 2);
            assert!(matches!(source, ModelError::Decode { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_reference_block_omitted_for_empty_text_layer() {
    let model = Arc::new(ScriptedModel::texts(&["scanned words"]));
    let controller = offline_controller(&model, policy(3, 80.0));

    let outcome = controller.refine(page_with_reference("")).await.unwrap();

    // No reference phrases: the heuristic accepts immediately
    assert_eq!(outcome.confidence, 100.0);
    assert!(!model.system_prompt(0).contains("<reference>"));
}

proptest! {
    #[test]
    fn prop_controller_keeps_best_and_respects_budget(
        confidences in proptest::collection::vec(0u32..=100, 6),
        max_attempts in 1u32..6,
        threshold in 0u32..=100,
    ) {
        let threshold = f64::from(threshold);
        let confidences: Vec<f64> = confidences.into_iter().map(f64::from).collect();
        let texts: Vec<String> = (1..=confidences.len()).map(|i| format!("attempt {i}")).collect();
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let model = Arc::new(ScriptedModel::texts(&text_refs));
        let judge = Arc::new(ScriptedModel::judge(&confidences));
        let controller = judged_controller(&model, &judge, policy(max_attempts, threshold));

        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let outcome = runtime
            .block_on(controller.refine(page_with_reference(REFERENCE)))
            .unwrap();

        // First score meeting the threshold, else the whole budget
        let budget = max_attempts as usize;
        let stop = confidences[..budget]
            .iter()
            .position(|c| *c >= threshold)
            .map_or(budget, |i| i + 1);
        let observed = &confidences[..stop];
        let best = observed.iter().copied().fold(f64::MIN, f64::max);
        let best_index = observed.iter().position(|c| *c == best).unwrap();

        prop_assert_eq!(outcome.attempts as usize, stop);
        prop_assert_eq!(model.calls(), stop);
        prop_assert_eq!(judge.calls(), stop);
        prop_assert!(observed.iter().all(|c| outcome.confidence >= *c));
        prop_assert_eq!(outcome.confidence, best);
        prop_assert_eq!(&outcome.page.model_text, &texts[best_index]);
        prop_assert_eq!(outcome.converged, best >= threshold);
    }
}
