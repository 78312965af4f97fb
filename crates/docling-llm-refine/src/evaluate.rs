//! Confidence scoring of a model transcription against the text layer.
//!
//! The judge model is asked for a JSON verdict:
//!
//! ```json
//! {"confidence": 85, "missing_keywords": ["Total Due", "500"]}
//! ```
//!
//! Anything unusable (call error, empty answer, malformed JSON, missing field,
//! confidence outside 0-100) falls back to [`fallback_evaluation`], a phrase
//! overlap heuristic that needs no model. Evaluation therefore always yields a
//! score.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use crate::models::{ChatModel, EvaluationResult, ScoreSource, UserContent};
use crate::prompts::{render_template, ComparisonPrompts};

/// Runs of two or more whitespace-separated words.
const PHRASE_PATTERN: &str = r"\b(?:\w+\s+){1,}\w+\b";

fn phrase_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(PHRASE_PATTERN).expect("phrase pattern is valid"))
}

fn leading_fence() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^```(?:json)?\s*").expect("fence pattern is valid"))
}

fn trailing_fence() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*```$").expect("fence pattern is valid"))
}

/// Distinct phrases of `text`, sorted.
fn phrases(text: &str) -> BTreeSet<&str> {
    phrase_regex().find_iter(text).map(|m| m.as_str()).collect()
}

/// Score `model_text` by phrase overlap with `deterministic_text`.
///
/// Confidence is the share of distinct text-layer phrases that occur verbatim
/// (as substrings) in the model text, or 100 when the text layer has no
/// phrases. Missing terms are the text-layer phrases that the model text does
/// not produce as whole phrases, in sorted order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fallback_evaluation(deterministic_text: &str, model_text: &str) -> EvaluationResult {
    let reference = phrases(deterministic_text);
    let candidate = phrases(model_text);

    let confidence = if reference.is_empty() {
        100.0
    } else {
        let matched = reference
            .iter()
            .filter(|phrase| model_text.contains(**phrase))
            .count();
        matched as f64 / reference.len() as f64 * 100.0
    };

    let missing_terms = reference
        .difference(&candidate)
        .map(|phrase| (*phrase).to_string())
        .collect();

    EvaluationResult {
        confidence,
        missing_terms,
        source: ScoreSource::Fallback,
    }
}

/// Remove a leading ```` ``` ```` / ```` ```json ```` fence and a trailing
/// ```` ``` ```` fence.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    let text = leading_fence().replace(text, "");
    trailing_fence().replace(&text, "").into_owned()
}

/// Why a judge answer was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerdictError {
    #[error("empty response")]
    Empty,
    #[error("response is not JSON: {0}")]
    NotJson(String),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error("`{0}` has the wrong type")]
    WrongType(&'static str),
    #[error("confidence {0} is outside 0-100")]
    OutOfRange(String),
}

/// Parse the judge's answer into an [`EvaluationResult`].
///
/// # Errors
///
/// Returns a [`VerdictError`] describing why the answer is unusable.
pub fn parse_judge_response(response: &str) -> Result<EvaluationResult, VerdictError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(VerdictError::Empty);
    }

    let body = strip_code_fences(trimmed);
    let verdict: Value =
        serde_json::from_str(&body).map_err(|e| VerdictError::NotJson(e.to_string()))?;

    let confidence = match verdict.get("confidence") {
        None | Some(Value::Null) => return Err(VerdictError::MissingField("confidence")),
        Some(Value::Number(n)) => n.as_f64().ok_or(VerdictError::WrongType("confidence"))?,
        // Some judges quote the number
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| VerdictError::WrongType("confidence"))?,
        Some(_) => return Err(VerdictError::WrongType("confidence")),
    };
    if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
        return Err(VerdictError::OutOfRange(confidence.to_string()));
    }

    let missing_terms = match verdict.get("missing_keywords") {
        None | Some(Value::Null) => return Err(VerdictError::MissingField("missing_keywords")),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(_) => return Err(VerdictError::WrongType("missing_keywords")),
    };

    Ok(EvaluationResult {
        confidence,
        missing_terms,
        source: ScoreSource::Judge,
    })
}

/// Scores transcriptions with a judge model, or with the heuristic alone when
/// built with [`ConfidenceEvaluator::offline`].
#[derive(Clone)]
pub struct ConfidenceEvaluator {
    judge: Option<Arc<dyn ChatModel>>,
    prompts: ComparisonPrompts,
}

impl std::fmt::Debug for ConfidenceEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidenceEvaluator")
            .field("judge", &self.judge.as_ref().map(|j| j.name()))
            .finish_non_exhaustive()
    }
}

impl ConfidenceEvaluator {
    #[must_use]
    pub fn new(judge: Arc<dyn ChatModel>, prompts: ComparisonPrompts) -> Self {
        Self {
            judge: Some(judge),
            prompts,
        }
    }

    /// Evaluator that never calls a model.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            judge: None,
            prompts: ComparisonPrompts::default(),
        }
    }

    /// Score `model_text` against `deterministic_text`. Never fails.
    pub async fn evaluate(&self, deterministic_text: &str, model_text: &str) -> EvaluationResult {
        let Some(judge) = &self.judge else {
            return fallback_evaluation(deterministic_text, model_text);
        };

        let user_message = render_template(
            &self.prompts.user_message_template,
            &[
                ("deterministic_text", deterministic_text),
                ("model_text", model_text),
            ],
        );

        let verdict = match judge
            .invoke(&self.prompts.system_prompt, &[UserContent::Text(&user_message)])
            .await
        {
            Ok(response) => parse_judge_response(&response).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match verdict {
            Ok(result) => result,
            Err(reason) => {
                tracing::warn!(judge = %judge.name(), %reason, "Judge unusable, using phrase-overlap fallback");
                fallback_evaluation(deterministic_text, model_text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use proptest::prelude::*;

    struct FixedJudge(Result<&'static str, ()>);

    #[async_trait]
    impl ChatModel for FixedJudge {
        fn name(&self) -> String {
            "judge".to_string()
        }

        async fn invoke(
            &self,
            _system: &str,
            content: &[UserContent<'_>],
        ) -> Result<String, ModelError> {
            assert!(matches!(content, [UserContent::Text(_)]));
            self.0
                .map(str::to_string)
                .map_err(|()| ModelError::Decode {
                    provider: "judge",
                    message: "boom".to_string(),
                })
        }
    }

    fn evaluator(reply: Result<&'static str, ()>) -> ConfidenceEvaluator {
        ConfidenceEvaluator::new(Arc::new(FixedJudge(reply)), ComparisonPrompts::default())
    }

    #[test]
    fn test_fallback_identical_text() {
        let result = fallback_evaluation("Invoice Total Due 500", "Invoice Total Due 500");
        assert_eq!(result.confidence, 100.0);
        assert!(result.missing_terms.is_empty());
        assert_eq!(result.source, ScoreSource::Fallback);
    }

    #[test]
    fn test_fallback_partial_text() {
        // The whole line is one phrase, and "Invoice Total" does not contain it
        let result = fallback_evaluation("Invoice Total Due 500", "Invoice Total");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.missing_terms, vec!["Invoice Total Due 500"]);
    }

    #[test]
    fn test_fallback_substring_counts_but_phrase_still_missing() {
        // Found as a substring, yet not produced as a whole phrase
        let result = fallback_evaluation("Total Due", "Total Due 500");
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.missing_terms, vec!["Total Due"]);
    }

    #[test]
    fn test_fallback_counts_distinct_phrases() {
        let det = "Name: Jane Doe. Date: May 1. Name: Jane Doe.";
        // Phrases: "Jane Doe", "May 1"
        let result = fallback_evaluation(det, "Jane Doe");
        assert_eq!(result.confidence, 50.0);
        assert_eq!(result.missing_terms, vec!["May 1"]);
    }

    #[test]
    fn test_fallback_without_phrases_is_full_confidence() {
        let result = fallback_evaluation("Invoice", "");
        assert_eq!(result.confidence, 100.0);
        assert!(result.missing_terms.is_empty());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("{}"), "{}");
    }

    #[test]
    fn test_parse_judge_response_bare_and_fenced_agree() {
        let bare = r#"{"confidence": 72.5, "missing_keywords": ["Due 500", "Due 500"]}"#;
        let fenced = format!("```json\n{bare}\n```");

        let a = parse_judge_response(bare).unwrap();
        let b = parse_judge_response(&fenced).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.confidence, 72.5);
        assert_eq!(a.missing_terms, vec!["Due 500", "Due 500"]);
        assert_eq!(a.source, ScoreSource::Judge);
    }

    #[test]
    fn test_parse_judge_response_rejections() {
        assert_eq!(parse_judge_response("  "), Err(VerdictError::Empty));
        assert!(matches!(
            parse_judge_response("looks fine"),
            Err(VerdictError::NotJson(_))
        ));
        assert_eq!(
            parse_judge_response(r#"{"missing_keywords": []}"#),
            Err(VerdictError::MissingField("confidence"))
        );
        assert_eq!(
            parse_judge_response(r#"{"confidence": 90}"#),
            Err(VerdictError::MissingField("missing_keywords"))
        );
        assert!(matches!(
            parse_judge_response(r#"{"confidence": 140, "missing_keywords": []}"#),
            Err(VerdictError::OutOfRange(_))
        ));
        assert_eq!(
            parse_judge_response(r#"{"confidence": 50, "missing_keywords": "x"}"#),
            Err(VerdictError::WrongType("missing_keywords"))
        );
    }

    #[test]
    fn test_parse_judge_response_quoted_confidence() {
        let result = parse_judge_response(r#"{"confidence": "85", "missing_keywords": []}"#).unwrap();
        assert_eq!(result.confidence, 85.0);
    }

    #[tokio::test]
    async fn test_evaluate_uses_judge_verdict() {
        let result = evaluator(Ok(r#"{"confidence": 91, "missing_keywords": ["500"]}"#))
            .evaluate("Invoice Total Due 500", "Invoice Total Due")
            .await;
        assert_eq!(result.confidence, 91.0);
        assert_eq!(result.missing_terms, vec!["500"]);
        assert_eq!(result.source, ScoreSource::Judge);
    }

    #[tokio::test]
    async fn test_evaluate_falls_back_on_call_error() {
        let result = evaluator(Err(()))
            .evaluate("Invoice Total Due 500", "Invoice Total Due 500")
            .await;
        assert_eq!(result.confidence, 100.0);
        assert_eq!(result.source, ScoreSource::Fallback);
    }

    #[tokio::test]
    async fn test_evaluate_falls_back_on_prose() {
        let result = evaluator(Ok("The texts match closely."))
            .evaluate("Invoice Total Due 500", "Invoice Total")
            .await;
        assert_eq!(result, fallback_evaluation("Invoice Total Due 500", "Invoice Total"));
    }

    #[tokio::test]
    async fn test_offline_evaluator_never_calls_judge() {
        let result = ConfidenceEvaluator::offline()
            .evaluate("Total Due", "Total Due")
            .await;
        assert_eq!(result.source, ScoreSource::Fallback);
        assert_eq!(result.confidence, 100.0);
    }

    proptest! {
        #[test]
        fn prop_single_word_reference_is_full_confidence(word in "[A-Za-z0-9]{0,12}", model in ".{0,40}") {
            let result = fallback_evaluation(&word, &model);
            prop_assert_eq!(result.confidence, 100.0);
            prop_assert!(result.missing_terms.is_empty());
        }

        #[test]
        fn prop_fallback_is_deterministic_and_bounded(det in "[a-z ]{0,40}", model in "[a-z ]{0,40}") {
            let first = fallback_evaluation(&det, &model);
            let second = fallback_evaluation(&det, &model);
            prop_assert!((0.0..=100.0).contains(&first.confidence));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_fallback_non_decreasing_as_phrases_are_added(
            pairs in proptest::collection::vec(("[a-z]{1,6}", "[a-z]{1,6}"), 1..6)
        ) {
            let phrases: Vec<String> = pairs.iter().map(|(a, b)| format!("{a} {b}")).collect();
            let det = phrases.join(". ");

            let mut previous = -1.0;
            let mut model = String::new();
            for phrase in &phrases {
                if !model.is_empty() {
                    model.push_str("; ");
                }
                model.push_str(phrase);
                let confidence = fallback_evaluation(&det, &model).confidence;
                prop_assert!(confidence >= previous);
                previous = confidence;
            }
            prop_assert_eq!(previous, 100.0);
        }
    }
}
