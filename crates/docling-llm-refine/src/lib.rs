//! # docling-llm-refine
//!
//! Vision-model text extraction for scanned PDFs, cross-checked against the
//! PDF's embedded text layer and refined until the two agree.
//!
//! ## Overview
//!
//! For every page:
//! 1. Render the page to PNG and read its text layer
//! 2. Ask a vision model to transcribe the image, using the text layer as a
//!    reference
//! 3. Ask a judge model how completely the transcription covers the text
//!    layer (phrase-overlap heuristic when the judge is unusable)
//! 4. Below the confidence threshold, transcribe again with the missing terms
//!    as hints, up to `max_attempts` times
//! 5. Keep the best-scoring transcription
//!
//! ## Supported LLM Providers
//!
//! - **`OpenAI`**: GPT-4o family and o-series reasoning models
//! - **Anthropic**: Claude through the messages API
//! - **AWS Bedrock**: Claude through the Converse API
//!
//! ## Example Usage
//!
//! ```no_run
//! use docling_llm_refine::{
//!     bind_model, ConfidenceEvaluator, PdfProcessor, PdfRenderer, Prompts, RefineConfig,
//!     RefinementController, VisionExtractor,
//! };
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RefineConfig::load(Path::new("config/config.yaml"))?;
//! let prompts = Prompts::default();
//!
//! let extraction_model = bind_model(&config.llm).await?;
//! let judge_model = bind_model(
//!     &config.llm.with_temperature(config.text_extraction.comparison_temperature),
//! )
//! .await?;
//!
//! let controller = RefinementController::new(
//!     VisionExtractor::new(extraction_model, prompts.text_extraction),
//!     ConfidenceEvaluator::new(judge_model, prompts.comparison),
//!     (&config.text_extraction).into(),
//! );
//! let processor = PdfProcessor::new(
//!     PdfRenderer::new()?,
//!     controller,
//!     config.llm.clone(),
//!     config.pdf_processing.clone(),
//! );
//!
//! let result = processor
//!     .process_pdf(Path::new("scan.pdf"), Path::new("output"))
//!     .await?;
//! println!("{:.1}% of pages extracted", result.success_rate());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Configuration file and provider settings
//! - [`prompts`] - Prompt templates
//! - [`models`] - Page state, results and language-model clients
//! - [`pdf`] - PDF rendering and text-layer access using pdfium
//! - [`extract`] - Text-layer and vision extraction
//! - [`evaluate`] - Confidence scoring with judge and fallback
//! - [`refine`] - The per-page refinement loop
//! - [`pipeline`] - Per-PDF and per-directory processing
//! - [`output`] - Result files and page documents

pub mod config;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod models;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod prompts;
pub mod refine;

pub use config::{LlmConfig, Provider, RefineConfig, TextExtractionConfig};
pub use error::{ModelError, RefineError};
pub use evaluate::{fallback_evaluation, ConfidenceEvaluator};
pub use extract::{TextLayer, TextLayerExtractor, VisionExtractor};
pub use models::{
    bind_model, bind_model_with_fallback, ChatModel, EvaluationResult, ExtractedResult,
    PageState, ScoreSource, UserContent,
};
pub use output::{page_documents, save_documents_jsonl, PageDocument};
pub use pdf::{PageImage, PageSource, PdfRenderer};
pub use pipeline::{BatchReport, PdfProcessor};
pub use prompts::Prompts;
pub use refine::{RefinePolicy, RefinementController, RefinementOutcome};
