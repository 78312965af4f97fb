//! PDF rasterization and text-layer access using pdfium.
//!
//! [`PdfRenderer`] turns every page of a PDF into a PNG for the vision model
//! and reads the embedded text layer used as the deterministic reference.
//!
//! ## Usage
//!
//! ```no_run
//! use docling_llm_refine::{PdfRenderer, TextLayer};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let renderer = PdfRenderer::new()?;
//!
//! // Render all pages at 150 DPI
//! let pages = renderer.render_pages(Path::new("scan.pdf"), 150)?;
//! for page in &pages {
//!     println!("Page {}: {} bytes PNG", page.page_number, page.size());
//! }
//!
//! // Embedded text of page 2
//! let text = renderer.page_text(Path::new("scan.pdf"), 2)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## DPI Recommendations
//!
//! - **72 DPI**: Fast, small files, only for large print
//! - **150 DPI**: Good balance for vision models (default)
//! - **300 DPI**: Small print and dense forms, more tokens per page

// Clippy pedantic allows:
// - DPI and dimension calculations involve various cast types
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::Path;

use crate::extract::TextLayer;

/// PDF points per inch (1 point = 1/72 inch).
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// A source of rendered pages that can also read the text layer.
///
/// [`PdfRenderer`] is the production implementation; the batch processor is
/// generic over this trait.
pub trait PageSource: TextLayer {
    /// Number of pages in `pdf_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be opened.
    fn page_count(&self, pdf_path: &Path) -> Result<usize>;

    /// Render every page of `pdf_path` to PNG at `dpi`, in page order.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be opened or a page fails to render.
    fn render_pages(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<PageImage>>;
}

/// pdfium-backed renderer and text-layer reader.
pub struct PdfRenderer {
    pdfium: Pdfium,
}

impl std::fmt::Debug for PdfRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfRenderer").finish_non_exhaustive()
    }
}

impl PdfRenderer {
    /// Bind the pdfium library, preferring a copy next to the executable's
    /// working directory over the system one.
    ///
    /// # Errors
    ///
    /// Returns an error if no pdfium library can be loaded.
    pub fn new() -> Result<Self> {
        let pdfium = Pdfium::new(
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .context("Failed to bind pdfium library")?,
        );
        Ok(Self { pdfium })
    }

    fn load<'a>(&'a self, pdf_path: &Path) -> Result<PdfDocument<'a>> {
        self.pdfium
            .load_pdf_from_file(pdf_path, None)
            .with_context(|| format!("Failed to load PDF: {}", pdf_path.display()))
    }

    /// Number of pages in a PDF.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be loaded.
    pub fn page_count(&self, pdf_path: &Path) -> Result<usize> {
        let document = self.load(pdf_path)?;
        Ok(document.pages().len() as usize)
    }

    /// Render all pages of a PDF to PNG images.
    ///
    /// # Errors
    ///
    /// Returns an error if the PDF cannot be loaded or rendering fails.
    pub fn render_pages(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<PageImage>> {
        let document = self.load(pdf_path)?;

        let mut pages = Vec::with_capacity(document.pages().len() as usize);
        for (i, page) in document.pages().iter().enumerate() {
            pages.push(render_page(&page, (i + 1) as u32, dpi)?);
        }

        tracing::debug!(pdf = %pdf_path.display(), pages = pages.len(), dpi, "Rendered PDF");
        Ok(pages)
    }
}

fn render_page(page: &PdfPage<'_>, page_number: u32, dpi: u32) -> Result<PageImage> {
    let width = page.width().value;
    let height = page.height().value;

    let render_config = PdfRenderConfig::new()
        .set_target_width((width * dpi as f32 / PDF_POINTS_PER_INCH) as i32)
        .set_target_height((height * dpi as f32 / PDF_POINTS_PER_INCH) as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .with_context(|| format!("Failed to render page {page_number}"))?;

    let mut png_data = Vec::new();
    bitmap
        .as_image()
        .write_to(&mut std::io::Cursor::new(&mut png_data), ImageFormat::Png)
        .context("Failed to encode PNG")?;

    Ok(PageImage {
        page_number,
        width_pts: width,
        height_pts: height,
        png_data,
    })
}

impl TextLayer for PdfRenderer {
    fn page_text(&self, pdf_path: &Path, page_number: u32) -> Result<String> {
        let document = self.load(pdf_path)?;
        let index = page_number
            .checked_sub(1)
            .ok_or_else(|| anyhow!("page numbers start at 1"))? as usize;

        let page = document
            .pages()
            .iter()
            .nth(index)
            .with_context(|| format!("Page {page_number} not found"))?;
        let text = page
            .text()
            .map_err(|e| anyhow!("Failed to get page text: {e}"))?;
        Ok(text.all())
    }
}

impl PageSource for PdfRenderer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize> {
        Self::page_count(self, pdf_path)
    }

    fn render_pages(&self, pdf_path: &Path, dpi: u32) -> Result<Vec<PageImage>> {
        Self::render_pages(self, pdf_path, dpi)
    }
}

/// Rendered page image with metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageImage {
    /// 1-based page number
    pub page_number: u32,
    /// Page width in PDF points (1/72 inch)
    pub width_pts: f32,
    /// Page height in PDF points (1/72 inch)
    pub height_pts: f32,
    /// PNG image data
    pub png_data: Vec<u8>,
}

impl PageImage {
    /// Size in bytes.
    #[inline]
    #[must_use = "returns PNG data size in bytes"]
    pub const fn size(&self) -> usize {
        self.png_data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_image_size() {
        let page = PageImage {
            page_number: 1,
            width_pts: 612.0,
            height_pts: 792.0,
            png_data: vec![0; 42],
        };
        assert_eq!(page.size(), 42);
        assert_eq!(PageImage::default().size(), 0);
    }

    #[test]
    fn test_target_pixels_at_150_dpi() {
        // US Letter at 150 DPI
        let width = (612.0_f32 * 150.0 / PDF_POINTS_PER_INCH) as i32;
        let height = (792.0_f32 * 150.0 / PDF_POINTS_PER_INCH) as i32;
        assert_eq!((width, height), (1275, 1650));
    }
}
