use std::sync::Arc;
use std::time::Duration;

use switchboard_core::config::ProviderConfig;
use switchboard_core::Config;
use tracing::{info, warn};

use crate::{OpenAIProvider, Provider};

fn default_api_base(provider_name: &str) -> &'static str {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "vllm" => "http://localhost:8000/v1",
        _ => "https://openrouter.ai/api/v1",
    }
}

/// Provider implied by a model name, `None` when the prefix is not recognized.
///
/// Vendor-namespaced ids like `google/gemini-2.5-flash-lite` are OpenRouter
/// routes.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("openai/") || model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
        Some("openai")
    } else if model.starts_with("deepseek") {
        Some("deepseek")
    } else if model.starts_with("groq/") {
        Some("groq")
    } else if model.starts_with("vllm/") {
        Some("vllm")
    } else if model.contains('/') {
        Some("openrouter")
    } else {
        None
    }
}

fn has_key(cfg: &ProviderConfig) -> bool {
    !cfg.api_key.trim().is_empty()
}

/// Builds the model collaborator for planning and synthesis.
///
/// Resolution order: `llm.provider`, then the model prefix, then the first
/// provider holding a key. Returns `None` when the chosen provider has no key
/// (vLLM excepted), which the supervisor treats as "model unconfigured".
pub fn create_provider(config: &Config) -> Option<Arc<dyn Provider>> {
    let llm = &config.llm;
    let explicit = llm.provider.as_deref();

    let name: &str = match explicit.or_else(|| infer_provider_from_model(&llm.model)) {
        Some(name) => name,
        None => match config.get_api_key() {
            Some((name, _)) => name,
            None => {
                info!(model = %llm.model, "No LLM provider configured, using deterministic planning");
                return None;
            }
        },
    };

    let empty = ProviderConfig::default();
    let provider_cfg = config.get_provider(name).unwrap_or(&empty);
    if name != "vllm" && !has_key(provider_cfg) {
        if explicit.is_some() {
            warn!(provider = %name, "Provider is configured explicitly but has no API key");
        } else {
            info!(provider = %name, model = %llm.model, "Provider has no API key, using deterministic planning");
        }
        return None;
    }

    let api_base = provider_cfg
        .api_base
        .as_deref()
        .unwrap_or_else(|| default_api_base(name));
    let model = llm.model.strip_prefix("vllm/").unwrap_or(&llm.model);

    info!(provider = %name, model = %model, "LLM provider ready");
    Some(Arc::new(OpenAIProvider::new_with_proxy(
        &provider_cfg.api_key,
        api_base,
        model,
        llm.max_tokens,
        llm.temperature,
        Duration::from_secs(llm.timeout_secs),
        provider_cfg.proxy.as_deref(),
        &config.network,
    )))
}
