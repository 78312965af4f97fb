//! Batch processing of PDFs, one page at a time.
//!
//! Pages within a PDF and PDFs within a directory run strictly in sequence.
//! A page that fails is logged and left out of the result; a PDF that cannot
//! be rendered is logged and skipped by [`PdfProcessor::process_all_pdfs`].

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{LlmConfig, PdfProcessingConfig};
use crate::error::RefineError;
use crate::extract::TextLayerExtractor;
use crate::models::{ExtractedResult, PageState};
use crate::output::{save_result_summary, save_text, PageSummary, ResultSummary};
use crate::pdf::{PageImage, PageSource};
use crate::refine::{RefinementController, RefinementOutcome};

/// Everything produced by one directory run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub results: Vec<ExtractedResult>,
    pub summaries: Vec<ResultSummary>,
    /// PDFs that could not be processed at all
    pub skipped: Vec<PathBuf>,
}

/// Renders PDFs, reads their text layer and refines every page.
#[derive(Debug)]
pub struct PdfProcessor<S> {
    source: S,
    controller: RefinementController,
    llm_config: LlmConfig,
    settings: PdfProcessingConfig,
}

impl<S: PageSource> PdfProcessor<S> {
    #[must_use]
    pub fn new(
        source: S,
        controller: RefinementController,
        llm_config: LlmConfig,
        settings: PdfProcessingConfig,
    ) -> Self {
        Self {
            source,
            controller,
            llm_config,
            settings,
        }
    }

    /// Read the text layer of one rendered page and refine it.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::TextLayer`] or [`RefineError::Extraction`].
    #[allow(clippy::future_not_send)] // pdfium-backed sources are not Sync
    pub async fn process_page(
        &self,
        pdf_name: &str,
        pdf_path: &Path,
        image: PageImage,
    ) -> Result<RefinementOutcome, RefineError> {
        tracing::info!(pdf = pdf_name, page = image.page_number, "Starting page");

        let mut state = PageState::new(
            pdf_name,
            pdf_path,
            image.page_number,
            image.png_data,
            self.llm_config.clone(),
        );
        TextLayerExtractor::new(&self.source).extract(&mut state)?;

        self.controller.refine(state).await
    }

    /// Process every page of one PDF and write its outputs to `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be rendered or the outputs cannot
    /// be written. Individual page failures are not errors.
    #[allow(clippy::future_not_send)] // pdfium-backed sources are not Sync
    pub async fn process_pdf(&self, pdf_path: &Path, output_dir: &Path) -> Result<ExtractedResult> {
        let (result, _) = self.process_pdf_with_summary(pdf_path, output_dir).await?;
        Ok(result)
    }

    /// [`Self::process_pdf`], also returning the written summary.
    ///
    /// # Errors
    ///
    /// See [`Self::process_pdf`].
    #[allow(clippy::future_not_send)] // pdfium-backed sources are not Sync
    pub async fn process_pdf_with_summary(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<(ExtractedResult, ResultSummary)> {
        let pdf_name = pdf_stem(pdf_path);
        let render_error = |e: anyhow::Error| RefineError::Render {
            path: pdf_path.to_path_buf(),
            message: format!("{e:#}"),
        };

        let page_count = self.source.page_count(pdf_path).map_err(render_error)?;
        let policy = self.controller.policy();
        tracing::info!(
            pdf = %pdf_name,
            path = %pdf_path.display(),
            pages = page_count,
            max_attempts = policy.attempt_limit(),
            threshold = policy.confidence_threshold,
            "Starting PDF"
        );

        let images = self
            .source
            .render_pages(pdf_path, self.settings.render_dpi)
            .map_err(render_error)?;
        tracing::debug!(pdf = %pdf_name, pages = images.len(), "Rendered pages");

        let mut pages = Vec::with_capacity(images.len());
        let mut page_summaries = Vec::with_capacity(images.len());
        let mut failed_pages = Vec::new();

        for image in images {
            let page_number = image.page_number;
            match self.process_page(&pdf_name, pdf_path, image).await {
                Ok(outcome) => {
                    page_summaries.push(PageSummary::from(&outcome));
                    pages.push(outcome.page);
                }
                Err(e) => {
                    tracing::error!(
                        pdf = %pdf_name,
                        page = page_number,
                        attempt = e.attempt(),
                        error = %e,
                        "Page failed, skipping"
                    );
                    failed_pages.push(page_number);
                }
            }
        }

        let result = ExtractedResult {
            pdf_name,
            pdf_path: pdf_path.to_path_buf(),
            pages,
        };

        let text_path = save_text(&result, output_dir, &self.settings.output_suffix)?;
        let summary = ResultSummary::new(&result, page_summaries, failed_pages);
        save_result_summary(&summary, output_dir)?;

        tracing::info!(
            pdf = %result.pdf_name,
            pages = result.page_count(),
            success_rate = result.success_rate(),
            output = %text_path.display(),
            "Finished PDF"
        );
        Ok((result, summary))
    }

    /// Process every `*.pdf` in `pdf_dir`, in path order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    #[allow(clippy::future_not_send)] // pdfium-backed sources are not Sync
    pub async fn process_all_pdfs(&self, pdf_dir: &Path, output_dir: &Path) -> Result<BatchReport> {
        let pdf_paths = find_pdf_files(pdf_dir)?;
        if pdf_paths.is_empty() {
            tracing::warn!(dir = %pdf_dir.display(), "No PDF files found");
        }

        let mut report = BatchReport::default();
        for pdf_path in pdf_paths {
            match self.process_pdf_with_summary(&pdf_path, output_dir).await {
                Ok((result, summary)) => {
                    report.results.push(result);
                    report.summaries.push(summary);
                }
                Err(e) => {
                    tracing::error!(pdf = %pdf_path.display(), error = %format!("{e:#}"), "PDF failed, skipping");
                    report.skipped.push(pdf_path);
                }
            }
        }

        tracing::info!(
            processed = report.results.len(),
            skipped = report.skipped.len(),
            "PDF processing complete"
        );
        Ok(report)
    }
}

/// File stem used to name outputs, e.g. `scan` for `in/scan.pdf`.
#[must_use]
pub fn pdf_stem(pdf_path: &Path) -> String {
    pdf_path
        .file_stem()
        .map_or_else(|| "document".to_string(), |s| s.to_string_lossy().into_owned())
}

/// Files in `dir` with a lowercase `.pdf` extension, sorted by path.
///
/// Matching is case-sensitive so `scan.pdf` and `scan.PDF` never both map to
/// the `scan` output stem.
///
/// # Errors
///
/// Returns an error if `dir` cannot be read.
pub fn find_pdf_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read PDF directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext == "pdf");
        if is_pdf && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
