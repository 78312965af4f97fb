//! Prompt templates for extraction and comparison.
//!
//! Templates use `{name}` placeholders which are substituted in a single pass,
//! so text pulled from a document can never introduce a placeholder of its
//! own.
//!
//! | Template | Placeholders |
//! |----------|--------------|
//! | `text_extraction.base_system_prompt` | `{reference_block}` |
//! | `text_extraction.reference_block_template` | `{reference_text}` |
//! | `text_extraction.re_extraction_system_prompt` | `{additional_instructions}`, `{reference_block}` |
//! | `comparison.system_prompt` | none |
//! | `comparison.user_message_template` | `{deterministic_text}`, `{model_text}` |

use crate::error::RefineError;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// Prompts for the vision extraction model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionPrompts {
    pub base_system_prompt: String,
    pub reference_block_template: String,
    pub re_extraction_system_prompt: String,
}

impl Default for ExtractionPrompts {
    fn default() -> Self {
        Self {
            base_system_prompt: BASE_SYSTEM_PROMPT.to_string(),
            reference_block_template: REFERENCE_BLOCK_TEMPLATE.to_string(),
            re_extraction_system_prompt: RE_EXTRACTION_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Prompts for the judge model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonPrompts {
    pub system_prompt: String,
    pub user_message_template: String,
}

impl Default for ComparisonPrompts {
    fn default() -> Self {
        Self {
            system_prompt: COMPARISON_SYSTEM_PROMPT.to_string(),
            user_message_template: COMPARISON_USER_TEMPLATE.to_string(),
        }
    }
}

/// All prompt templates. Missing entries in a prompts file keep their
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub text_extraction: ExtractionPrompts,
    pub comparison: ComparisonPrompts,
}

impl Prompts {
    /// Load prompt overrides from a YAML (or JSON) file.
    ///
    /// # Errors
    ///
    /// Returns [`RefineError::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RefineError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RefineError::Config(format!("prompts file not found: {} ({e})", path.display()))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RefineError::Config(format!("failed to parse prompts: {e}")))
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid"))
}

/// Substitute `{name}` placeholders in one pass. Unknown placeholders are
/// left untouched.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            vars.iter()
                .find(|(name, _)| *name == &caps[1])
                .map_or_else(|| caps[0].to_string(), |(_, value)| (*value).to_string())
        })
        .into_owned()
}

const BASE_SYSTEM_PROMPT: &str = r"You are an expert document transcription system. Transcribe ALL text visible on this scanned document page with full fidelity.

TRANSCRIPTION RULES:
1. Transcribe every word, number, date, and identifier exactly as printed
2. Preserve reading order: left-to-right, top-to-bottom
3. Keep line breaks between separate lines, blocks, and table rows
4. For tables, place each row on its own line and separate cells with ' | '
5. For checkboxes, write [x] for checked and [ ] for unchecked, followed by the label
6. Include headers, footers, stamps, and handwritten annotations
7. Do not summarize, translate, correct, or add commentary
{reference_block}
Return ONLY the transcribed text.";

const REFERENCE_BLOCK_TEMPLATE: &str = r"
REFERENCE TEXT:
The following text was read from the page's embedded text layer. It may be incomplete, out of order, or contain encoding artifacts. Use it to confirm spelling of names, numbers, and terms, but transcribe what the image shows.
<reference>
{reference_text}
</reference>
";

const RE_EXTRACTION_SYSTEM_PROMPT: &str = r"You are an expert document transcription system. A previous transcription of this scanned page missed content. Transcribe ALL text visible on the page again with full fidelity.{additional_instructions}

TRANSCRIPTION RULES:
1. Transcribe every word, number, date, and identifier exactly as printed
2. Preserve reading order: left-to-right, top-to-bottom
3. Keep line breaks between separate lines, blocks, and table rows
4. For tables, place each row on its own line and separate cells with ' | '
5. For checkboxes, write [x] for checked and [ ] for unchecked, followed by the label
6. Do not summarize, translate, correct, or add commentary
{reference_block}
Return ONLY the transcribed text.";

const COMPARISON_SYSTEM_PROMPT: &str = r#"You compare two transcriptions of the same document page and judge how completely the candidate covers the reference. Respond with a single JSON object and nothing else:
{"confidence": <number 0-100>, "missing_keywords": ["<term or phrase present in the reference but absent from the candidate>", ...]}"#;

const COMPARISON_USER_TEMPLATE: &str = r"REFERENCE (embedded text layer):
<reference>
{deterministic_text}
</reference>

CANDIDATE (vision model transcription):
<candidate>
{model_text}
</candidate>

Score 100 when every meaningful word, number, and phrase of the reference appears in the candidate. Lower the score for each omission or alteration. List the omitted terms in missing_keywords.";
