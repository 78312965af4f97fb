//! Page text extraction.
//!
//! - [`TextLayerExtractor`] - reads the embedded text layer (deterministic)
//! - [`VisionExtractor`] - transcribes the page image with a language model,
//!   either plainly or with hints about terms a previous attempt missed

mod text_layer;
mod vision;

pub use text_layer::{normalize_text, TextLayer, TextLayerExtractor};
pub use vision::{keyword_instructions, VisionExtractor};
