pub mod client;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use switchboard_core::types::{ChatMessage, LLMResponse};
use switchboard_core::Result;

/// A chat-completion backend used for planning and answer synthesis.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse>;
}

pub use client::build_http_client;
pub use factory::{create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;
