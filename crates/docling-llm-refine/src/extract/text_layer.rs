use std::path::Path;

use crate::error::RefineError;
use crate::models::PageState;

/// Reader for the text embedded in a PDF page.
pub trait TextLayer {
    /// Raw text of the 1-based `page_number`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be read or the page does not exist.
    fn page_text(&self, pdf_path: &Path, page_number: u32) -> anyhow::Result<String>;
}

impl<T: TextLayer + ?Sized> TextLayer for &T {
    fn page_text(&self, pdf_path: &Path, page_number: u32) -> anyhow::Result<String> {
        (**self).page_text(pdf_path, page_number)
    }
}

/// Replace literal `\n` and `\t` escape sequences with the characters they
/// name, then trim surrounding whitespace.
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\\n", "\n").replace("\\t", "\t").trim().to_string()
}

/// Fills [`PageState::deterministic_text`] from the text layer.
#[derive(Debug, Clone)]
pub struct TextLayerExtractor<T> {
    reader: T,
}

impl<T: TextLayer> TextLayerExtractor<T> {
    pub const fn new(reader: T) -> Self {
        Self { reader }
    }

    /// Read, normalize and store the page's text layer.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::TextLayer`] if the reader fails. The page
    /// cannot be refined without a reference, so this is not retried.
    pub fn extract(&self, state: &mut PageState) -> Result<(), RefineError> {
        let raw = self
            .reader
            .page_text(&state.pdf_path, state.page_number)
            .map_err(|e| RefineError::TextLayer {
                pdf_name: state.pdf_name.clone(),
                page: state.page_number,
                message: format!("{e:#}"),
            })?;

        state.deterministic_text = normalize_text(&raw);
        tracing::debug!(
            pdf = %state.pdf_name,
            page = state.page_number,
            chars = state.deterministic_text.len(),
            "Read text layer"
        );
        Ok(())
    }
}
