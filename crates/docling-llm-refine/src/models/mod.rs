//! Data models and language-model clients.
//!
//! - [`PageState`] - One page's extraction progress
//! - [`EvaluationResult`] - Output of one confidence-scoring pass
//! - [`ExtractedResult`] - All processed pages of one PDF
//! - [`ChatModel`] - The "invoke(system, content) -> text" capability every
//!   provider implements
//!
//! ## Provider Submodules
//!
//! - [`openai`] - `OpenAI` chat completions
//! - [`anthropic`] - Anthropic messages API
//! - [`bedrock`] - Claude through AWS Bedrock Converse

pub mod anthropic;
pub mod bedrock;
pub mod openai;

use crate::config::{LlmConfig, Provider, RefineConfig};
use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Width of the `=` rule printed after each page in [`ExtractedResult::all_text`].
const PAGE_RULE_WIDTH: usize = 50;

/// Extraction state for a single PDF page.
///
/// `deterministic_text` is filled before the first model call and serves as
/// the grounding reference. `model_text` always holds the latest attempt's
/// output. Cloning yields a fully independent snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    /// PDF file stem
    pub pdf_name: String,
    /// Full path of the source PDF
    pub pdf_path: PathBuf,
    /// 1-based page number
    pub page_number: u32,
    /// Rendered page as PNG
    #[serde(skip)]
    pub image_png: Vec<u8>,
    /// Text read from the embedded text layer
    pub deterministic_text: String,
    /// Text transcribed by the vision model
    pub model_text: String,
    /// Extraction model settings
    pub llm_config: LlmConfig,
}

impl PageState {
    /// Create a state for a freshly rendered page.
    #[must_use]
    pub fn new(
        pdf_name: impl Into<String>,
        pdf_path: impl Into<PathBuf>,
        page_number: u32,
        image_png: Vec<u8>,
        llm_config: LlmConfig,
    ) -> Self {
        Self {
            pdf_name: pdf_name.into(),
            pdf_path: pdf_path.into(),
            page_number,
            image_png,
            deterministic_text: String::new(),
            model_text: String::new(),
            llm_config,
        }
    }

    /// Whether the model produced any non-whitespace text.
    #[inline]
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.model_text.trim().is_empty()
    }
}

/// Where a confidence score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    /// Parsed from the judge model's JSON answer
    Judge,
    /// Computed by the phrase-overlap heuristic
    Fallback,
}

impl std::fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Judge => write!(f, "judge"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Result of scoring one model transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Agreement with the text layer, 0-100
    pub confidence: f64,
    /// Terms present in the text layer but missing from the transcription
    pub missing_terms: Vec<String>,
    pub source: ScoreSource,
}

/// Extraction result for one PDF. Pages that failed are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedResult {
    pub pdf_name: String,
    pub pdf_path: PathBuf,
    pub pages: Vec<PageState>,
}

impl ExtractedResult {
    /// Concatenated model text with a banner per page, in page order.
    #[must_use]
    pub fn all_text(&self) -> String {
        let mut pages: Vec<&PageState> = self.pages.iter().collect();
        pages.sort_by_key(|p| p.page_number);

        let rule = "=".repeat(PAGE_RULE_WIDTH);
        let mut text = String::new();
        for page in pages {
            text.push_str(&format!("Page {}:\n", page.page_number));
            text.push_str(&page.model_text);
            text.push('\n');
            text.push_str(&rule);
            text.push_str("\n\n");
        }
        text
    }

    /// Number of pages processed.
    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages whose model text is non-empty.
    #[must_use]
    pub fn successful_pages(&self) -> Vec<&PageState> {
        self.pages.iter().filter(|p| p.has_text()).collect()
    }

    /// Percentage of pages with text; 0.0 when there are no pages.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.pages.is_empty() {
            return 0.0;
        }
        self.successful_pages().len() as f64 / self.pages.len() as f64 * 100.0
    }
}

/// One part of the user turn sent to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserContent<'a> {
    Text(&'a str),
    /// PNG bytes, sent inline
    PngImage(&'a [u8]),
}

/// A bound language model: provider, model name, temperature and token
/// budget are fixed at construction.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier used in logs, e.g. `openai/gpt-4o`.
    fn name(&self) -> String;

    /// Send one system instruction and one user turn; return the response
    /// text.
    async fn invoke(
        &self,
        system: &str,
        content: &[UserContent<'_>],
    ) -> Result<String, ModelError>;
}

/// Build the client for the configured provider.
///
/// # Errors
///
/// Returns an error if credentials are missing or the HTTP client cannot be
/// built.
pub async fn bind_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, ModelError> {
    let model: Arc<dyn ChatModel> = match config.provider {
        Provider::OpenAi => Arc::new(openai::OpenAIClient::new(config)?),
        Provider::Anthropic => Arc::new(anthropic::AnthropicClient::new(config)?),
        Provider::Bedrock => Arc::new(bedrock::BedrockClient::new(config).await),
    };
    tracing::debug!(model = %model.name(), temperature = config.temperature, "Bound language model");
    Ok(model)
}

/// Bind the preferred model, falling back to the other configured ones when
/// its client cannot be built (e.g. a missing API key).
///
/// `preferred` names an `llm_alternatives` entry; `None` starts with `llm`.
/// After the preferred entry, `llm` and then every alternative in name order
/// are tried once each. Returns the model with the settings it was bound
/// from, so callers can derive the judge from the same provider.
///
/// # Errors
///
/// Returns [`ModelError::UnknownAlternative`] if `preferred` does not exist,
/// or [`ModelError::NoProviderAvailable`] if every candidate fails.
pub async fn bind_model_with_fallback(
    config: &RefineConfig,
    preferred: Option<&str>,
) -> Result<(Arc<dyn ChatModel>, LlmConfig), ModelError> {
    let (first_name, first) = match preferred {
        None => ("llm", &config.llm),
        Some(name) => config
            .llm_alternatives
            .get_key_value(name)
            .map(|(name, llm)| (name.as_str(), llm))
            .ok_or_else(|| ModelError::UnknownAlternative(name.to_string()))?,
    };

    let first_error = match bind_model(first).await {
        Ok(model) => return Ok((model, first.clone())),
        Err(e) => e,
    };
    tracing::warn!(config = first_name, provider = %first.provider, error = %first_error, "Failed to bind primary LLM");

    let rest = std::iter::once(("llm", &config.llm))
        .chain(
            config
                .llm_alternatives
                .iter()
                .map(|(name, llm)| (name.as_str(), llm)),
        )
        .filter(|(name, _)| *name != first_name);

    let mut tried = vec![first_name.to_string()];
    for (name, llm) in rest {
        tracing::info!(config = name, provider = %llm.provider, "Trying alternative LLM");
        match bind_model(llm).await {
            Ok(model) => return Ok((model, llm.clone())),
            Err(e) => {
                tracing::warn!(config = name, provider = %llm.provider, error = %e, "Failed to bind alternative LLM");
                tried.push(name.to_string());
            }
        }
    }

    tracing::error!(tried = ?tried, "All attempts to bind a language model failed");
    Err(ModelError::NoProviderAvailable {
        tried: tried.join(", "),
        source: Box::new(first_error),
    })
}

/// Coerce a JSON message payload to text: strings as-is, arrays of text
/// parts concatenated, anything else in its JSON form.
pub(crate) fn coerce_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
                .collect();
            if texts.is_empty() {
                value.to_string()
            } else {
                texts.concat()
            }
        }
        other => other.to_string(),
    }
}
