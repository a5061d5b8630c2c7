use serde::{Deserialize, Serialize};

/// One message of an OpenAI-compatible chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub finish_reason: String,
    pub usage: serde_json::Value,
}

impl LLMResponse {
    /// Trimmed content, `None` when the model produced nothing usable.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Default for LLMResponse {
    fn default() -> Self {
        Self {
            content: None,
            finish_reason: String::new(),
            usage: serde_json::Value::Null,
        }
    }
}
