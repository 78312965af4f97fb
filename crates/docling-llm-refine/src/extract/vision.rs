use std::sync::Arc;

use crate::error::ModelError;
use crate::models::{ChatModel, PageState, UserContent};
use crate::prompts::{render_template, ExtractionPrompts};

/// Sentence appended to the re-extraction prompt listing the terms a previous
/// attempt missed. Empty when there is nothing to list.
#[must_use]
pub fn keyword_instructions(missing_terms: &[String]) -> String {
    if missing_terms.is_empty() {
        return String::new();
    }
    format!(
        " Ensure that the following keywords are included in the extraction: {}.",
        missing_terms.join(", ")
    )
}

/// Transcribes a page image with the extraction model.
#[derive(Clone)]
pub struct VisionExtractor {
    model: Arc<dyn ChatModel>,
    prompts: ExtractionPrompts,
}

impl std::fmt::Debug for VisionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionExtractor")
            .field("model", &self.model.name())
            .finish_non_exhaustive()
    }
}

impl VisionExtractor {
    #[must_use]
    pub fn new(model: Arc<dyn ChatModel>, prompts: ExtractionPrompts) -> Self {
        Self { model, prompts }
    }

    /// First-pass transcription. Replaces `state.model_text`.
    ///
    /// # Errors
    ///
    /// Propagates the model call failure.
    pub async fn extract(&self, state: &mut PageState) -> Result<(), ModelError> {
        tracing::info!(pdf = %state.pdf_name, page = state.page_number, "Extracting page text");

        let reference_block = self.reference_block(&state.deterministic_text);
        let system = render_template(
            &self.prompts.base_system_prompt,
            &[("reference_block", &reference_block)],
        );
        self.transcribe(state, &system).await
    }

    /// Transcribe again, asking for `missing_terms` to be included. Replaces
    /// `state.model_text`.
    ///
    /// # Errors
    ///
    /// Propagates the model call failure.
    pub async fn re_extract(
        &self,
        state: &mut PageState,
        missing_terms: &[String],
    ) -> Result<(), ModelError> {
        tracing::info!(
            pdf = %state.pdf_name,
            page = state.page_number,
            missing = missing_terms.len(),
            "Re-extracting page text with keyword hints"
        );

        let reference_block = self.reference_block(&state.deterministic_text);
        let additional_instructions = keyword_instructions(missing_terms);
        let system = render_template(
            &self.prompts.re_extraction_system_prompt,
            &[
                ("additional_instructions", &additional_instructions),
                ("reference_block", &reference_block),
            ],
        );
        self.transcribe(state, &system).await
    }

    fn reference_block(&self, deterministic_text: &str) -> String {
        if deterministic_text.is_empty() {
            return String::new();
        }
        render_template(
            &self.prompts.reference_block_template,
            &[("reference_text", deterministic_text)],
        )
    }

    async fn transcribe(&self, state: &mut PageState, system: &str) -> Result<(), ModelError> {
        let response = self
            .model
            .invoke(system, &[UserContent::PngImage(&state.image_png)])
            .await?;
        state.model_text = response.trim().to_string();
        Ok(())
    }
}
