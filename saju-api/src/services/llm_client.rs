//! LLM text generation client (Messages API)

use async_trait::async_trait;
use saju_common::config::LlmConfig;
use serde::{Deserialize, Serialize};

use super::{http_client, ProviderError, LLM_PROVIDER};

/// One generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub user: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, recorded in the request log
    fn model(&self) -> &str;

    /// Generate text; returns the first content block's text
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Messages API client
pub struct AnthropicClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::not_configured(LLM_PROVIDER));
        }

        let body = MessagesBody {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: [Message {
                role: "user",
                content: &request.user,
            }],
        };

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(LLM_PROVIDER, e))?;

        let response = ProviderError::check_status(LLM_PROVIDER, response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::parse(LLM_PROVIDER, e.to_string()))?;

        let text = parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| ProviderError::parse(LLM_PROVIDER, "response has no content blocks"))?;

        tracing::debug!(model = %self.model, chars = text.len(), "LLM generation complete");
        Ok(text)
    }
}
