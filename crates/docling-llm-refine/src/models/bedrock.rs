//! AWS Bedrock client for Claude models.
//!
//! Calls the Converse API with the page image and instruction text in one
//! user message. `model_name` in the config is the Bedrock model or
//! inference-profile identifier, e.g.
//! `us.anthropic.claude-3-5-sonnet-20241022-v2:0`.
//!
//! ## Authentication
//!
//! Uses the default AWS credentials chain:
//! 1. Environment variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
//! 2. AWS credentials file (`~/.aws/credentials`)
//! 3. IAM role (for EC2/Lambda)
//!
//! The region comes from `region` in the config, falling back to the AWS
//! defaults.

// Token budgets are configured as u32, the SDK takes i32
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]

use async_trait::async_trait;
use aws_sdk_bedrockruntime::{
    primitives::Blob,
    types::{
        ContentBlock, ConversationRole, ImageBlock, ImageFormat, ImageSource,
        InferenceConfiguration, Message, SystemContentBlock,
    },
    Client,
};

use super::{ChatModel, UserContent};
use crate::config::LlmConfig;
use crate::error::ModelError;

/// Bedrock Converse client bound to one model.
#[derive(Debug, Clone)]
pub struct BedrockClient {
    client: Client,
    model_id: String,
    temperature: f64,
    max_tokens: u32,
}

impl BedrockClient {
    /// Create a client using the default AWS credentials chain.
    pub async fn new(config: &LlmConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        Self {
            client: Client::new(&sdk_config),
            model_id: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn build_message(content: &[UserContent<'_>]) -> Result<Message, ModelError> {
        let mut builder = Message::builder().role(ConversationRole::User);
        for part in content {
            let block = match part {
                UserContent::Text(text) => ContentBlock::Text((*text).to_string()),
                UserContent::PngImage(png) => {
                    let image = ImageBlock::builder()
                        .format(ImageFormat::Png)
                        .source(ImageSource::Bytes(Blob::new(png.to_vec())))
                        .build()
                        .map_err(|e| {
                            ModelError::Bedrock(format!("failed to build image block: {e}"))
                        })?;
                    ContentBlock::Image(image)
                }
            };
            builder = builder.content(block);
        }
        builder
            .build()
            .map_err(|e| ModelError::Bedrock(format!("failed to build message: {e}")))
    }

    fn inference_config(&self) -> InferenceConfiguration {
        InferenceConfiguration::builder()
            .temperature(self.temperature as f32)
            .max_tokens(self.max_tokens.min(i32::MAX as u32) as i32)
            .build()
    }
}

#[async_trait]
impl ChatModel for BedrockClient {
    fn name(&self) -> String {
        format!("bedrock/{}", self.model_id)
    }

    async fn invoke(
        &self,
        system: &str,
        content: &[UserContent<'_>],
    ) -> Result<String, ModelError> {
        let message = Self::build_message(content)?;

        let response = self
            .client
            .converse()
            .model_id(&self.model_id)
            .system(SystemContentBlock::Text(system.to_string()))
            .messages(message)
            .inference_config(self.inference_config())
            .send()
            .await
            .map_err(|e| ModelError::Bedrock(format!("{e:?}")))?;

        let output = response
            .output()
            .ok_or(ModelError::EmptyResponse { provider: "bedrock" })?;
        let message = output
            .as_message()
            .map_err(|_| ModelError::Bedrock("output is not a message".to_string()))?;

        let texts: Vec<&str> = message
            .content()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if texts.is_empty() {
            // No text blocks: fall back to the debug form of the content
            return Ok(format!("{:?}", message.content()));
        }
        Ok(texts.concat())
    }
}
