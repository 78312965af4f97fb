//! Configuration for page refinement
//!
//! Settings are loaded once at startup from a YAML file (JSON documents parse
//! too) and handed to the collaborators that need them. Nothing here is
//! global: the binary builds a [`RefineConfig`], validates it, and passes the
//! relevant pieces into the processor.
//!
//! ```yaml
//! pdf_processing:
//!   pdf_directory: pdfs
//!   output_directory: output
//! text_extraction:
//!   max_attempts: 3
//!   confidence_threshold: 80.0
//!   comparison_temperature: 0.7
//! llm:
//!   provider: anthropic
//!   model_name: claude-3-5-sonnet-20241022
//!   temperature: 0.1
//!   max_tokens: 4000
//!   api_key_env: ANTHROPIC_API_KEY
//! ```

use crate::error::{ModelError, RefineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

/// Language-model provider backing a [`crate::models::ChatModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// `OpenAI` chat completions API
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Claude through AWS Bedrock Converse
    Bedrock,
}

impl Provider {
    /// Environment variable consulted when a config names no `api_key_env`.
    #[must_use]
    pub const fn default_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Bedrock => "",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Bedrock => write!(f, "bedrock"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "open-ai" | "gpt" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "bedrock" | "aws" => Ok(Self::Bedrock),
            _ => Err(format!(
                "unsupported provider '{s}'. Valid options: openai, anthropic, bedrock"
            )),
        }
    }
}

/// Settings for one language-model role (extraction or judge).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Environment variable holding the API key (provider default when empty)
    #[serde(default)]
    pub api_key_env: String,
    /// Inline API key; takes precedence over `api_key_env`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Override for the provider endpoint
    #[serde(default)]
    pub base_url: Option<String>,
    /// AWS region (Bedrock only)
    #[serde(default)]
    pub region: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Upper bound of the Anthropic messages API temperature range.
pub const ANTHROPIC_MAX_TEMPERATURE: f64 = 1.0;

const fn default_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    /// Name of the environment variable the API key is read from.
    #[must_use]
    pub fn credential_env(&self) -> &str {
        if self.api_key_env.is_empty() {
            self.provider.default_key_env()
        } else {
            &self.api_key_env
        }
    }

    /// Resolve the API key: inline key first, then the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingCredential`] if neither source is set.
    pub fn api_key(&self) -> Result<String, ModelError> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }

        let env_var = self.credential_env();
        env::var(env_var)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ModelError::MissingCredential {
                provider: self.provider.to_string(),
                env_var: env_var.to_string(),
            })
    }

    /// Copy of this config with a different sampling temperature.
    #[must_use]
    pub fn with_temperature(&self, temperature: f64) -> Self {
        Self {
            temperature,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_deref().map(mask_key))
            .field("base_url", &self.base_url)
            .field("region", &self.region)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            model_name: "claude-3-5-sonnet-20241022".to_string(),
            temperature: 0.1,
            max_tokens: 4000,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            region: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Mask all but the first and last four characters of a secret.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
    } else {
        "********".to_string()
    }
}

/// Retry policy for the refinement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextExtractionConfig {
    /// Upper bound on model extraction calls per page
    pub max_attempts: u32,
    /// Confidence (0-100) at which a page is accepted
    pub confidence_threshold: f64,
    /// Sampling temperature for the judge model
    #[serde(default = "default_comparison_temperature")]
    pub comparison_temperature: f64,
}

const fn default_comparison_temperature() -> f64 {
    0.7
}

impl Default for TextExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            confidence_threshold: 80.0,
            comparison_temperature: default_comparison_temperature(),
        }
    }
}

/// Input/output locations and rasterization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfProcessingConfig {
    pub pdf_directory: PathBuf,
    pub output_directory: PathBuf,
    pub render_dpi: u32,
    /// Appended to the PDF stem to name the full-text output file
    pub output_suffix: String,
}

impl Default for PdfProcessingConfig {
    fn default() -> Self {
        Self {
            pdf_directory: PathBuf::from("pdfs"),
            output_directory: PathBuf::from("output"),
            render_dpi: 150,
            output_suffix: "_all_pages.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefineConfig {
    #[serde(default)]
    pub pdf_processing: PdfProcessingConfig,
    pub text_extraction: TextExtractionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// Named alternatives to `llm`, selectable at startup
    #[serde(default)]
    pub llm_alternatives: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RefineConfig {
    /// Parse and validate a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::Config`] if the document is malformed, a
    /// required key is missing, or a value is out of range.
    pub fn from_yaml_str(contents: &str) -> Result<Self, RefineError> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| RefineError::Config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::Config`] if the file is missing or invalid.
    pub fn load(path: &Path) -> Result<Self, RefineError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RefineError::Config(format!(
                "configuration file not found: {} ({e})",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), RefineError> {
        let policy = &self.text_extraction;
        if policy.max_attempts == 0 {
            return Err(RefineError::Config(
                "text_extraction.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&policy.confidence_threshold) {
            return Err(RefineError::Config(format!(
                "text_extraction.confidence_threshold must be within 0-100, got {}",
                policy.confidence_threshold
            )));
        }
        if !policy.comparison_temperature.is_finite() || policy.comparison_temperature < 0.0 {
            return Err(RefineError::Config(format!(
                "text_extraction.comparison_temperature must be non-negative, got {}",
                policy.comparison_temperature
            )));
        }
        if self.pdf_processing.render_dpi == 0 {
            return Err(RefineError::Config(
                "pdf_processing.render_dpi must be positive".to_string(),
            ));
        }
        for (name, llm) in self.llm_entries() {
            if llm.model_name.trim().is_empty() {
                return Err(RefineError::Config(format!("{name}: model_name is empty")));
            }
            if llm.max_tokens == 0 {
                return Err(RefineError::Config(format!(
                    "{name}: max_tokens must be positive"
                )));
            }
            if llm.provider == Provider::Anthropic {
                // The judge runs on the same entry at the comparison temperature
                for (key, temperature) in [
                    ("temperature", llm.temperature),
                    (
                        "comparison_temperature",
                        policy.comparison_temperature,
                    ),
                ] {
                    if !(0.0..=ANTHROPIC_MAX_TEMPERATURE).contains(&temperature) {
                        return Err(RefineError::Config(format!(
                            "{name}: anthropic accepts {key} within 0-1, got {temperature}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// `llm` followed by every alternative, in name order.
    fn llm_entries(&self) -> impl Iterator<Item = (&str, &LlmConfig)> {
        std::iter::once(("llm", &self.llm)).chain(
            self.llm_alternatives
                .iter()
                .map(|(name, llm)| (name.as_str(), llm)),
        )
    }

    /// Extraction model settings: the default `llm` section, or a named
    /// entry of `llm_alternatives`.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::Config`] if the alternative does not exist.
    pub fn llm_for(&self, alternative: Option<&str>) -> Result<LlmConfig, RefineError> {
        match alternative {
            None => Ok(self.llm.clone()),
            Some(name) => self.llm_alternatives.get(name).cloned().ok_or_else(|| {
                RefineError::Config(format!(
                    "alternative LLM configuration not found: {name}"
                ))
            }),
        }
    }
}
