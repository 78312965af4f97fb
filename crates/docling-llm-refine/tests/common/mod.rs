//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use docling_llm_refine::{
    ChatModel, ModelError, PageImage, PageSource, PageState, TextLayer, UserContent,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Answers calls from a fixed script and records every system prompt.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    systems: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<S, S>>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(Into::into).map_err(Into::into))
                    .collect(),
            ),
            systems: Mutex::new(Vec::new()),
        }
    }

    /// Model that answers every call successfully with `texts` in order.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok::<_, &str>(*t)))
    }

    /// Judge answering with the given confidences and no missing terms.
    pub fn judge(confidences: &[f64]) -> Self {
        Self::new(confidences.iter().map(|c| {
            Ok::<_, String>(format!(r#"{{"confidence": {c}, "missing_keywords": []}}"#))
        }))
    }

    pub fn calls(&self) -> usize {
        self.systems.lock().unwrap().len()
    }

    pub fn system_prompt(&self, call: usize) -> String {
        self.systems.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    async fn invoke(
        &self,
        system: &str,
        _content: &[UserContent<'_>],
    ) -> Result<String, ModelError> {
        self.systems.lock().unwrap().push(system.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(ModelError::Decode {
                provider: "scripted",
                message,
            }),
            None => Err(ModelError::EmptyResponse {
                provider: "scripted",
            }),
        }
    }
}

/// In-memory PDFs: file name -> page texts. Unknown files fail to render;
/// pages whose text is `None` fail text-layer extraction.
#[derive(Default)]
pub struct FakePdfs {
    pdfs: HashMap<String, Vec<Option<String>>>,
}

impl FakePdfs {
    pub fn with_pdf(mut self, file_name: &str, pages: &[Option<&str>]) -> Self {
        self.pdfs.insert(
            file_name.to_string(),
            pages.iter().map(|p| p.map(str::to_string)).collect(),
        );
        self
    }

    fn pages(&self, pdf_path: &Path) -> anyhow::Result<&Vec<Option<String>>> {
        let name = pdf_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.pdfs
            .get(&name)
            .ok_or_else(|| anyhow::anyhow!("Failed to load PDF: {name}"))
    }
}

impl TextLayer for FakePdfs {
    fn page_text(&self, pdf_path: &Path, page_number: u32) -> anyhow::Result<String> {
        let pages = self.pages(pdf_path)?;
        pages
            .get(page_number as usize - 1)
            .cloned()
            .flatten()
            .ok_or_else(|| anyhow::anyhow!("corrupt text layer on page {page_number}"))
    }
}

impl PageSource for FakePdfs {
    fn page_count(&self, pdf_path: &Path) -> anyhow::Result<usize> {
        Ok(self.pages(pdf_path)?.len())
    }

    fn render_pages(&self, pdf_path: &Path, _dpi: u32) -> anyhow::Result<Vec<PageImage>> {
        let pages = self.pages(pdf_path)?;
        Ok((1..=pages.len() as u32)
            .map(|page_number| PageImage {
                page_number,
                width_pts: 612.0,
                height_pts: 792.0,
                png_data: vec![0x89, 0x50, 0x4e, 0x47],
            })
            .collect())
    }
}

/// A page ready for refinement.
pub fn page_with_reference(deterministic_text: &str) -> PageState {
    PageState {
        pdf_name: "invoice".to_string(),
        pdf_path: PathBuf::from("invoice.pdf"),
        page_number: 1,
        image_png: vec![0x89, 0x50],
        deterministic_text: deterministic_text.to_string(),
        ..PageState::default()
    }
}
