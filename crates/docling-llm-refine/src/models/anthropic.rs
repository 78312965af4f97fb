//! Anthropic messages API client.
//!
//! Images are sent as base64 `image` blocks; the system instruction goes in
//! the top-level `system` field. Text blocks of the answer are concatenated.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatModel, UserContent};
use crate::config::{LlmConfig, ANTHROPIC_MAX_TEMPERATURE};
use crate::error::ModelError;

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    r#type: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<serde_json::Value>,
}

/// HTTP client bound to one Anthropic model.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl AnthropicClient {
    /// Create a client for the model named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the HTTP client cannot
    /// be built.
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        let api_key = config.api_key()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| ModelError::Http {
                provider: PROVIDER,
                source,
            })?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(0.0..=ANTHROPIC_MAX_TEMPERATURE).contains(&config.temperature) {
            tracing::warn!(
                model = %config.model_name,
                temperature = config.temperature,
                "Temperature outside 0-1, clamping"
            );
        }

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request<'a>(
        &'a self,
        system: &'a str,
        content: &[UserContent<'_>],
    ) -> MessagesRequest<'a> {
        let blocks = content
            .iter()
            .map(|part| match part {
                UserContent::Text(text) => ContentBlock::Text {
                    text: (*text).to_string(),
                },
                UserContent::PngImage(png) => ContentBlock::Image {
                    source: ImageSource {
                        r#type: "base64",
                        media_type: "image/png",
                        data: base64::engine::general_purpose::STANDARD.encode(png),
                    },
                },
            })
            .collect();

        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            // The messages API accepts 0.0-1.0
            temperature: self.temperature.clamp(0.0, ANTHROPIC_MAX_TEMPERATURE),
            system,
            messages: vec![Message {
                role: "user",
                content: blocks,
            }],
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicClient {
    fn name(&self) -> String {
        format!("{PROVIDER}/{}", self.model)
    }

    async fn invoke(
        &self,
        system: &str,
        content: &[UserContent<'_>],
    ) -> Result<String, ModelError> {
        let request = self.build_request(system, content);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|source| ModelError::Http {
                provider: PROVIDER,
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| ModelError::Http {
            provider: PROVIDER,
            source,
        })?;

        if !status.is_success() {
            return Err(ModelError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<String, ModelError> {
    let response: MessagesResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Decode {
            provider: PROVIDER,
            message: e.to_string(),
        })?;

    if response.content.is_empty() {
        return Err(ModelError::EmptyResponse { provider: PROVIDER });
    }

    let texts: Vec<&str> = response
        .content
        .iter()
        .filter(|block| block.get("type").and_then(serde_json::Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(serde_json::Value::as_str))
        .collect();

    if texts.is_empty() {
        // No text blocks: hand back the raw blocks
        return Ok(serde_json::Value::Array(response.content).to_string());
    }
    Ok(texts.concat())
}
