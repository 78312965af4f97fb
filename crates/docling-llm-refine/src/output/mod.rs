//! Persistence of extraction results.
//!
//! ## Output Files
//!
//! For a PDF named `scan.pdf` processed into `output/`:
//! - `output/scan_all_pages.txt` - Model text of every page with banners
//!   (suffix configurable)
//! - `output/scan_result.json` - Per-page confidence, attempts and
//!   convergence, plus the success rate
//!
//! [`save_documents_jsonl`] additionally writes one JSON object per page for
//! downstream indexing.

// Clippy pedantic allows:
// - Percentage calculations use f64 from usize
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::models::ExtractedResult;
use crate::refine::RefinementOutcome;

/// Per-page line of a result summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page: u32,
    pub confidence: f64,
    pub attempts: u32,
    pub converged: bool,
    /// Characters of model text kept for the page
    pub characters: usize,
}

impl From<&RefinementOutcome> for PageSummary {
    fn from(outcome: &RefinementOutcome) -> Self {
        Self {
            page: outcome.page.page_number,
            confidence: outcome.confidence,
            attempts: outcome.attempts,
            converged: outcome.converged,
            characters: outcome.page.model_text.chars().count(),
        }
    }
}

/// Machine-readable summary of one processed PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub pdf_name: String,
    pub pdf_path: PathBuf,
    /// RFC 3339 timestamp
    pub generated_at: String,
    pub page_count: usize,
    pub successful_pages: usize,
    pub success_rate: f64,
    /// Pages that failed and are absent from the text output
    pub failed_pages: Vec<u32>,
    pub pages: Vec<PageSummary>,
}

impl ResultSummary {
    #[must_use]
    pub fn new(result: &ExtractedResult, mut pages: Vec<PageSummary>, failed_pages: Vec<u32>) -> Self {
        pages.sort_by_key(|p| p.page);
        Self {
            pdf_name: result.pdf_name.clone(),
            pdf_path: result.pdf_path.clone(),
            generated_at: chrono::Local::now().to_rfc3339(),
            page_count: result.page_count(),
            successful_pages: result.successful_pages().len(),
            success_rate: result.success_rate(),
            failed_pages,
            pages,
        }
    }

    /// Mean confidence over processed pages; 0.0 when there are none.
    #[must_use]
    pub fn mean_confidence(&self) -> f64 {
        if self.pages.is_empty() {
            return 0.0;
        }
        self.pages.iter().map(|p| p.confidence).sum::<f64>() / self.pages.len() as f64
    }
}

/// Path of the full-text output for `pdf_name`.
#[must_use]
pub fn text_output_path(output_dir: &Path, pdf_name: &str, suffix: &str) -> PathBuf {
    output_dir.join(format!("{pdf_name}{suffix}"))
}

/// Write [`ExtractedResult::all_text`] to `<output_dir>/<pdf_name><suffix>`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file written.
pub fn save_text(result: &ExtractedResult, output_dir: &Path, suffix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let path = text_output_path(output_dir, &result.pdf_name, suffix);
    std::fs::write(&path, result.all_text())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Write the summary to `<output_dir>/<pdf_name>_result.json`.
///
/// # Errors
///
/// Returns an error if file operations or serialization fail.
pub fn save_result_summary(summary: &ResultSummary, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join(format!("{}_result.json", summary.pdf_name));
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// One page of model text with its provenance, ready for indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDocument {
    pub text: String,
    pub pdf_name: String,
    pub page: u32,
}

/// Convert every page with non-blank model text into a [`PageDocument`].
/// Blank pages are skipped with a warning.
#[must_use]
pub fn page_documents(results: &[ExtractedResult]) -> Vec<PageDocument> {
    let mut documents = Vec::new();
    for page in results.iter().flat_map(|r| &r.pages) {
        if page.has_text() {
            documents.push(PageDocument {
                text: page.model_text.clone(),
                pdf_name: page.pdf_name.clone(),
                page: page.page_number,
            });
        } else {
            tracing::warn!(
                pdf = %page.pdf_name,
                page = page.page_number,
                "No extracted text, skipping document creation"
            );
        }
    }
    documents
}

/// Write documents as JSON Lines.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn save_documents_jsonl(documents: &[PageDocument], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    for document in documents {
        serde_json::to_writer(&mut writer, document)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Generate a Markdown report over processed PDFs.
#[must_use = "generates a report string"]
pub fn generate_report(summaries: &[ResultSummary]) -> String {
    let mut report = String::new();

    report.push_str("# Extraction Report\n\n");
    let _ = writeln!(
        report,
        "Generated: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    if summaries.is_empty() {
        report.push_str("No PDFs processed.\n");
        return report;
    }

    let total_pages: usize = summaries.iter().map(|s| s.page_count).sum();
    let successful: usize = summaries.iter().map(|s| s.successful_pages).sum();
    let failed: usize = summaries.iter().map(|s| s.failed_pages.len()).sum();

    report.push_str("## Summary\n\n");
    let _ = writeln!(report, "- **PDFs**: {}", summaries.len());
    let _ = writeln!(report, "- **Pages processed**: {total_pages}");
    let _ = writeln!(report, "- **Pages with text**: {successful}");
    let _ = writeln!(report, "- **Pages failed**: {failed}\n");

    report.push_str("## Per-PDF Results\n\n");
    report.push_str("| PDF | Pages | Success | Mean Confidence | Converged |\n");
    report.push_str("|-----|-------|---------|-----------------|-----------|\n");
    for summary in summaries {
        let converged = summary.pages.iter().filter(|p| p.converged).count();
        let _ = writeln!(
            report,
            "| {} | {} | {:.1}% | {:.1}% | {}/{} |",
            summary.pdf_name,
            summary.page_count,
            summary.success_rate,
            summary.mean_confidence(),
            converged,
            summary.pages.len()
        );
    }

    report
}
