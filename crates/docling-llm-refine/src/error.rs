//! Error types for model calls and page refinement.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a language-model provider call.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Transport-level failure (connect, timeout, body read)
    #[error("HTTP request to {provider} failed: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Provider answered with a non-success status
    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    /// Response body did not have the expected shape
    #[error("failed to decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    /// Provider answered successfully but produced no content
    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: &'static str },

    /// No API key configured and the named environment variable is unset
    #[error("API key for {provider} not found in environment variable {env_var}")]
    MissingCredential { provider: String, env_var: String },

    /// AWS Bedrock SDK failure
    #[error("Bedrock API error: {0}")]
    Bedrock(String),

    /// Named `llm_alternatives` entry does not exist
    #[error("alternative LLM configuration not found: {0}")]
    UnknownAlternative(String),

    /// No configured model could be bound; `source` is the first failure.
    #[error("could not bind any language model (tried {tried}): {source}")]
    NoProviderAvailable {
        tried: String,
        #[source]
        source: Box<ModelError>,
    },
}

/// Errors surfaced while processing a page or a PDF.
#[derive(Error, Debug)]
pub enum RefineError {
    /// Reading the embedded text layer failed; the page is abandoned before
    /// any model call.
    #[error("text layer extraction failed for {pdf_name} page {page}: {message}")]
    TextLayer {
        pdf_name: String,
        page: u32,
        message: String,
    },

    /// A model extraction call failed inside the refinement loop.
    #[error("model extraction failed for {pdf_name} page {page} on attempt {attempt}: {source}")]
    Extraction {
        pdf_name: String,
        page: u32,
        attempt: u32,
        #[source]
        source: ModelError,
    },

    /// Rasterizing the PDF failed.
    #[error("failed to render {}: {message}", .path.display())]
    Render { path: PathBuf, message: String },

    /// Configuration is missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RefineError {
    /// Attempt number for extraction failures, if any.
    #[must_use]
    pub const fn attempt(&self) -> Option<u32> {
        match self {
            Self::Extraction { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }
}
