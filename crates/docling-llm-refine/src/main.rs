//! Vision-model PDF text extraction CLI
//!
//! Extract text from scanned PDFs and refine it against the embedded text
//! layer.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docling_llm_refine::{
    bind_model, bind_model_with_fallback,
    extract::normalize_text,
    output::{self, page_documents, save_documents_jsonl},
    ChatModel, ConfidenceEvaluator, ExtractedResult, LlmConfig, PdfProcessor, PdfRenderer,
    Prompts, RefineConfig, RefinementController, TextLayer, VisionExtractor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::filter::{Directive, EnvFilter};

#[derive(Parser)]
#[command(name = "docling-llm-refine")]
#[command(about = "Vision-model PDF text extraction refined against the text layer")]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(long, global = true, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Prompt overrides (YAML or JSON); built-in prompts when omitted
    #[arg(long, global = true)]
    prompts: Option<PathBuf>,

    /// Use a named entry of `llm_alternatives` instead of `llm`
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Fall back to `llm` and the other `llm_alternatives` entries when the
    /// selected model cannot be bound
    #[arg(long, global = true)]
    fallback_providers: bool,

    /// Also export page documents as JSON Lines to this file
    #[arg(long, global = true)]
    documents: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract text from a single PDF
    Extract {
        /// Path to PDF file
        #[arg(short, long)]
        pdf: PathBuf,

        /// Output directory (default: `pdf_processing.output_directory`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract text from all PDFs in a directory
    ExtractAll {
        /// Directory containing PDF files (default: `pdf_processing.pdf_directory`)
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Output directory (default: `pdf_processing.output_directory`)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Score a candidate transcription against a reference text
    Evaluate {
        /// Reference text file
        #[arg(long)]
        reference: PathBuf,

        /// Candidate text file
        #[arg(long)]
        candidate: PathBuf,

        /// Use only the phrase-overlap heuristic, no judge model
        #[arg(long)]
        offline: bool,
    },

    /// Print the normalized text layer of one page
    PageText {
        /// Path to PDF file
        #[arg(short, long)]
        pdf: PathBuf,

        /// 1-based page number
        #[arg(long)]
        page: u32,
    },
}

impl Command {
    const fn needs_config(&self) -> bool {
        match self {
            Self::Extract { .. } | Self::ExtractAll { .. } => true,
            Self::Evaluate { offline, .. } => !*offline,
            Self::PageText { .. } => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.command.needs_config() {
        Some(RefineConfig::load(&args.config)?)
    } else {
        None
    };

    let level = config.as_ref().map_or("info", |c| c.logging.level.as_str());
    init_logging(level)?;

    let prompts = match &args.prompts {
        Some(path) => Prompts::load(path)?,
        None => Prompts::default(),
    };

    let provider = args.provider.as_deref();
    let fallback = args.fallback_providers;

    match args.command {
        Command::Extract { pdf, output } => {
            let config = config.context("configuration required")?;
            let output_dir = output.unwrap_or_else(|| config.pdf_processing.output_directory.clone());
            let processor = build_processor(&config, prompts, provider, fallback).await?;

            let result = processor.process_pdf(&pdf, &output_dir).await?;
            info!(
                pdf = %result.pdf_name,
                pages = result.page_count(),
                success_rate = result.success_rate(),
                "Extraction complete"
            );
            export_documents(args.documents.as_deref(), std::slice::from_ref(&result))?;
        }
        Command::ExtractAll {
            input_dir,
            output_dir,
        } => {
            let config = config.context("configuration required")?;
            let input_dir = input_dir.unwrap_or_else(|| config.pdf_processing.pdf_directory.clone());
            let output_dir =
                output_dir.unwrap_or_else(|| config.pdf_processing.output_directory.clone());
            let processor = build_processor(&config, prompts, provider, fallback).await?;

            let report = processor.process_all_pdfs(&input_dir, &output_dir).await?;
            println!("{}", output::generate_report(&report.summaries));
            export_documents(args.documents.as_deref(), &report.results)?;
        }
        Command::Evaluate {
            reference,
            candidate,
            offline,
        } => {
            let reference = std::fs::read_to_string(&reference)
                .with_context(|| format!("Failed to read {}", reference.display()))?;
            let candidate = std::fs::read_to_string(&candidate)
                .with_context(|| format!("Failed to read {}", candidate.display()))?;

            let evaluator = if offline {
                ConfidenceEvaluator::offline()
            } else {
                let config = config.context("configuration required")?;
                let (_, llm) = bind_extraction(&config, provider, fallback).await?;
                let judge = bind_model(&judge_config(&config, &llm)).await?;
                ConfidenceEvaluator::new(judge, prompts.comparison)
            };

            let result = evaluator
                .evaluate(&normalize_text(&reference), &normalize_text(&candidate))
                .await;
            println!("Confidence: {:.2}% ({})", result.confidence, result.source);
            if !result.missing_terms.is_empty() {
                println!("\nMissing terms:");
                for term in &result.missing_terms {
                    println!("  - {term}");
                }
            }
        }
        Command::PageText { pdf, page } => {
            let renderer = PdfRenderer::new()?;
            let page_count = renderer.page_count(&pdf)?;
            anyhow::ensure!(
                (1..=page_count).contains(&(page as usize)),
                "page {page} out of range: {} has {page_count} pages",
                pdf.display()
            );
            let text = renderer.page_text(&pdf, page)?;
            println!("{}", normalize_text(&text));
        }
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level, rust_log.as_deref())?)
        .init();
    Ok(())
}

/// `RUST_LOG` when set, otherwise the configured level for this crate.
fn log_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directives)
            .with_context(|| format!("invalid {}: {directives}", EnvFilter::DEFAULT_ENV));
    }
    let directive: Directive = format!("docling_llm_refine={level}")
        .parse()
        .with_context(|| format!("invalid logging level: {level}"))?;
    Ok(EnvFilter::default().add_directive(directive))
}

/// The judge uses the extraction model at the comparison temperature.
fn judge_config(config: &RefineConfig, llm: &LlmConfig) -> LlmConfig {
    llm.with_temperature(config.text_extraction.comparison_temperature)
}

/// Extraction model and the settings it was bound from.
async fn bind_extraction(
    config: &RefineConfig,
    provider: Option<&str>,
    fallback: bool,
) -> Result<(Arc<dyn ChatModel>, LlmConfig)> {
    let (model, llm) = if fallback {
        bind_model_with_fallback(config, provider).await?
    } else {
        let llm = config.llm_for(provider)?;
        (bind_model(&llm).await?, llm)
    };
    info!(provider = %llm.provider, model = %llm.model_name, "Using LLM configuration");
    Ok((model, llm))
}

async fn build_processor(
    config: &RefineConfig,
    prompts: Prompts,
    provider: Option<&str>,
    fallback: bool,
) -> Result<PdfProcessor<PdfRenderer>> {
    let (extraction_model, llm) = bind_extraction(config, provider, fallback).await?;
    let judge_model = bind_model(&judge_config(config, &llm)).await?;

    let controller = RefinementController::new(
        VisionExtractor::new(extraction_model, prompts.text_extraction),
        ConfidenceEvaluator::new(judge_model, prompts.comparison),
        (&config.text_extraction).into(),
    );

    Ok(PdfProcessor::new(
        PdfRenderer::new()?,
        controller,
        llm,
        config.pdf_processing.clone(),
    ))
}

fn export_documents(path: Option<&Path>, results: &[ExtractedResult]) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let documents = page_documents(results);
    save_documents_jsonl(&documents, path)?;
    info!(documents = documents.len(), path = %path.display(), "Exported page documents");
    Ok(())
}
