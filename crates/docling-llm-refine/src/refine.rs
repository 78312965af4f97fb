//! The extract, score, re-extract loop for one page.
//!
//! ```text
//! attempt 1:  extract            -> evaluate -> keep if best
//! attempt n:  re_extract(hints)  -> evaluate -> keep if best
//!             stop when confidence >= threshold or n == max_attempts
//! ```
//!
//! The returned page is the best-scoring attempt, not necessarily the last.

use serde::{Deserialize, Serialize};

use crate::config::TextExtractionConfig;
use crate::error::RefineError;
use crate::evaluate::ConfidenceEvaluator;
use crate::extract::VisionExtractor;
use crate::models::{PageState, ScoreSource};

/// When to stop refining a page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefinePolicy {
    /// Upper bound on extraction calls; values below 1 act as 1
    pub max_attempts: u32,
    /// Confidence (0-100) at which a page is accepted
    pub confidence_threshold: f64,
}

impl From<&TextExtractionConfig> for RefinePolicy {
    fn from(config: &TextExtractionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            confidence_threshold: config.confidence_threshold,
        }
    }
}

/// Outcome of scoring one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Threshold met
    Converged,
    /// Below threshold with attempts left
    Retry,
    /// Below threshold and out of attempts
    Exhausted,
}

impl RefinePolicy {
    #[inline]
    #[must_use]
    pub const fn attempt_limit(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Decide what follows `attempt` (1-based) scoring `confidence`.
    #[must_use]
    pub fn decide(&self, attempt: u32, confidence: f64) -> Decision {
        if confidence >= self.confidence_threshold {
            Decision::Converged
        } else if attempt < self.attempt_limit() {
            Decision::Retry
        } else {
            Decision::Exhausted
        }
    }
}

/// One scored attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub confidence: f64,
    pub source: ScoreSource,
    pub missing_terms: usize,
}

/// Result of refining one page.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementOutcome {
    /// Snapshot of the best-scoring attempt
    pub page: PageState,
    /// Confidence of that attempt
    pub confidence: f64,
    /// Extraction calls made
    pub attempts: u32,
    /// Whether the threshold was met
    pub converged: bool,
    pub history: Vec<AttemptRecord>,
}

/// Drives extraction and evaluation until the page converges or the attempt
/// budget runs out.
#[derive(Debug, Clone)]
pub struct RefinementController {
    extractor: VisionExtractor,
    evaluator: ConfidenceEvaluator,
    policy: RefinePolicy,
}

impl RefinementController {
    #[must_use]
    pub fn new(
        extractor: VisionExtractor,
        evaluator: ConfidenceEvaluator,
        policy: RefinePolicy,
    ) -> Self {
        Self {
            extractor,
            evaluator,
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RefinePolicy {
        &self.policy
    }

    /// Refine `state`, whose deterministic text must already be filled.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::Extraction`] if a model extraction call fails.
    /// Evaluation never fails.
    pub async fn refine(&self, mut state: PageState) -> Result<RefinementOutcome, RefineError> {
        let mut best = state.clone();
        let mut best_confidence = -1.0_f64;
        let mut missing_terms: Vec<String> = Vec::new();
        let mut history = Vec::new();
        let mut attempt = 0_u32;

        loop {
            attempt += 1;

            let extracted = if attempt == 1 {
                self.extractor.extract(&mut state).await
            } else {
                self.extractor.re_extract(&mut state, &missing_terms).await
            };
            extracted.map_err(|source| RefineError::Extraction {
                pdf_name: state.pdf_name.clone(),
                page: state.page_number,
                attempt,
                source,
            })?;

            let evaluation = self
                .evaluator
                .evaluate(&state.deterministic_text, &state.model_text)
                .await;

            tracing::info!(
                pdf = %state.pdf_name,
                page = state.page_number,
                attempt,
                confidence = evaluation.confidence,
                source = %evaluation.source,
                missing = ?evaluation.missing_terms,
                "Scored extraction"
            );

            history.push(AttemptRecord {
                attempt,
                confidence: evaluation.confidence,
                source: evaluation.source,
                missing_terms: evaluation.missing_terms.len(),
            });

            if evaluation.confidence > best_confidence {
                best_confidence = evaluation.confidence;
                best = state.clone();
            }

            match self.policy.decide(attempt, evaluation.confidence) {
                Decision::Converged => {
                    tracing::info!(
                        pdf = %state.pdf_name,
                        page = state.page_number,
                        attempt,
                        "Confidence meets threshold"
                    );
                    return Ok(self.finish(best, best_confidence, attempt, true, history));
                }
                Decision::Exhausted => {
                    return Ok(self.finish(best, best_confidence, attempt, false, history));
                }
                Decision::Retry => missing_terms = evaluation.missing_terms,
            }
        }
    }

    #[allow(clippy::unused_self)]
    fn finish(
        &self,
        page: PageState,
        confidence: f64,
        attempts: u32,
        converged: bool,
        history: Vec<AttemptRecord>,
    ) -> RefinementOutcome {
        tracing::info!(
            pdf = %page.pdf_name,
            page = page.page_number,
            attempts,
            converged,
            confidence,
            "Final best confidence"
        );
        RefinementOutcome {
            page,
            confidence,
            attempts,
            converged,
            history,
        }
    }
}
