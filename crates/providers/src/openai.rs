use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use switchboard_core::config::NetworkConfig;
use switchboard_core::types::{ChatMessage, LLMResponse};
use switchboard_core::{Error, Result};
use tracing::{debug, error, info};

use crate::client::build_http_client;
use crate::Provider;

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Any OpenAI-compatible `/chat/completions` endpoint (OpenRouter, OpenAI,
/// DeepSeek, Groq, vLLM).
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(
        api_key: &str,
        api_base: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self::new_with_proxy(
            api_key,
            api_base,
            model,
            max_tokens,
            temperature,
            timeout,
            None,
            &NetworkConfig::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_with_proxy(
        api_key: &str,
        api_base: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
        provider_proxy: Option<&str>,
        network: &NetworkConfig,
    ) -> Self {
        let api_base = api_base.trim_end_matches('/').to_string();
        let client = build_http_client(provider_proxy, network, &api_base, timeout);
        Self {
            client,
            api_key: api_key.to_string(),
            api_base,
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_request(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        info!(url = %url, model = %self.model, messages_count = messages.len(), "Calling LLM");

        let mut builder = self.client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let end = truncate_at_char_boundary(&raw_body, 500);
            error!(status = %status, body = %&raw_body[..end], "LLM API error");
            return Err(Error::Provider(format!(
                "API error {}: {}",
                status,
                &raw_body[..end]
            )));
        }

        {
            let end = truncate_at_char_boundary(&raw_body, 300);
            debug!(body_len = raw_body.len(), preview = %&raw_body[..end], "LLM raw response");
        }

        serde_json::from_str(&raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(&raw_body, 500);
            Error::Provider(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                &raw_body[..end]
            ))
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    /// Some reasoning models put the whole answer here and leave `content` empty.
    reasoning_content: Option<String>,
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse> {
        let chat_response = self.send_request(messages).await?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

        let content = match choice.message.content {
            Some(c) if !c.trim().is_empty() => Some(c),
            _ => choice.message.reasoning_content,
        };

        Ok(LLMResponse {
            content,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage: chat_response.usage.unwrap_or(Value::Null),
        })
    }
}
