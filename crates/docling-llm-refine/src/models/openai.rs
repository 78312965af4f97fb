//! `OpenAI` chat completions client.
//!
//! ## API Differences
//!
//! - GPT-4o family: `max_tokens`, caller-controlled temperature
//! - o-series reasoning models (`o1`, `o3`, ...): `max_completion_tokens`,
//!   temperature fixed at 1
//!
//! The endpoint defaults to `https://api.openai.com/v1` and can be overridden
//! with `base_url` in the config or the `OPENAI_API_BASE` environment variable.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{coerce_text, ChatModel, UserContent};
use crate::config::LlmConfig;
use crate::error::ModelError;

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    #[serde(flatten)]
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text { content: String },
    Multimodal { content: Vec<ContentPart> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: serde_json::Value,
}

/// HTTP client bound to one `OpenAI` model.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAIClient {
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
            .or_else(|| std::env::var("OPENAI_API_BASE").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request(&self, system: &str, content: &[UserContent<'_>]) -> ChatRequest<'_> {
        let parts = content
            .iter()
            .map(|part| match part {
                UserContent::Text(text) => ContentPart::Text {
                    text: (*text).to_string(),
                },
                UserContent::PngImage(png) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/png;base64,{encoded}"),
                            detail: "high",
                        },
                    }
                }
            })
            .collect();

        let messages = vec![
            Message {
                role: "system",
                content: MessageContent::Text {
                    content: system.to_string(),
                },
            },
            Message {
                role: "user",
                content: MessageContent::Multimodal { content: parts },
            },
        ];

        // Reasoning models take max_completion_tokens and only temperature 1
        let (max_tokens, max_completion_tokens, temperature) = if is_reasoning_model(&self.model)
        {
            (None, Some(self.max_tokens), 1.0)
        } else {
            (Some(self.max_tokens), None, self.temperature)
        };

        ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            max_completion_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAIClient {
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
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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

fn is_reasoning_model(model: &str) -> bool {
    let model = model.to_lowercase();
    ["o1", "o3", "o4"]
        .iter()
        .any(|prefix| model == *prefix || model.starts_with(&format!("{prefix}-")))
}

fn parse_response(body: &str) -> Result<String, ModelError> {
    let chat: ChatResponse = serde_json::from_str(body).map_err(|e| ModelError::Decode {
        provider: PROVIDER,
        message: e.to_string(),
    })?;
    let choice = chat.choices.first().ok_or_else(|| ModelError::Decode {
        provider: PROVIDER,
        message: "no choices in response".to_string(),
    })?;
    Ok(coerce_text(&choice.message.content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;

    fn client(model: &str) -> OpenAIClient {
        let config = LlmConfig {
            provider: Provider::OpenAi,
            model_name: model.to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            api_key: Some("test-key".to_string()),
            base_url: Some("https://example.test/v1/".to_string()),
            ..LlmConfig::default()
        };
        OpenAIClient::new(&config).unwrap()
    }

    #[test]
    fn test_request_shape_with_image() {
        let client = client("gpt-4o");
        let request = client.build_request(
            "system text",
            &[UserContent::PngImage(&[0x89, 0x50]), UserContent::Text("hi")],
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 1024);
        assert!(json.get("max_completion_tokens").is_none());
        assert_eq!(json["temperature"], 0.2);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "system text");
        let parts = &json["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[0]["image_url"]["url"], "data:image/png;base64,iVA=");
        assert_eq!(parts[0]["image_url"]["detail"], "high");
        assert_eq!(parts[1]["type"], "text");
        assert_eq!(parts[1]["text"], "hi");
    }

    #[test]
    fn test_reasoning_models_use_completion_tokens() {
        let client = client("o1");
        let json = serde_json::to_value(client.build_request("s", &[])).unwrap();
        assert_eq!(json["max_completion_tokens"], 1024);
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["temperature"], 1.0);

        assert!(is_reasoning_model("o3-mini"));
        assert!(!is_reasoning_model("gpt-4o"));
        assert!(!is_reasoning_model("omni"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(client("gpt-4o").base_url, "https://example.test/v1");
        assert_eq!(client("gpt-4o").name(), "openai/gpt-4o");
    }

    #[test]
    fn test_parse_response_text_and_parts() {
        let body = r#"{"choices":[{"message":{"content":"Invoice Total"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "Invoice Total");

        let parts = r#"{"choices":[{"message":{"content":[{"type":"text","text":"A"},{"type":"text","text":"B"}]}}]}"#;
        assert_eq!(parse_response(parts).unwrap(), "AB");
    }

    #[test]
    fn test_parse_response_errors() {
        assert!(matches!(
            parse_response(r#"{"choices":[]}"#),
            Err(ModelError::Decode { .. })
        ));
        assert!(matches!(
            parse_response("not json"),
            Err(ModelError::Decode { .. })
        ));
    }
}
