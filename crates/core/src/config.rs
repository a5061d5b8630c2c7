use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// `None` follows the global proxy, `Some("")` forces a direct connection.
    #[serde(default)]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
}

/// Settings for the planning and synthesis model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Explicit provider name; inferred from `model` when absent.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_true")]
    pub planner_enabled: bool,
    #[serde(default = "default_true")]
    pub synthesis_enabled: bool,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "google/gemini-2.5-flash-lite".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            planner_enabled: true,
            synthesis_enabled: true,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// Appends a dependent step after any step that matches `after_agent`
/// (and `after_intent`, when set).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRule {
    pub after_agent: String,
    #[serde(default)]
    pub after_intent: Option<String>,
    pub agent: String,
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    /// Agent used by the fallback plan when no agent matches the query.
    /// Defaults to the first registered agent.
    #[serde(default)]
    pub default_agent: Option<String>,
    /// Agent whose structured output gets the task-name rewrite.
    #[serde(default = "default_dependency_agent")]
    pub dependency_agent: Option<String>,
    /// Agent whose structured review output is rendered as markdown.
    #[serde(default = "default_review_agent")]
    pub review_agent: Option<String>,
    /// Maximum number of independent steps in flight at once.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,
    /// Outer wall-clock bound for one request.
    #[serde(default)]
    pub request_deadline_ms: Option<u64>,
    /// Task listing used to resolve task ids to names.
    #[serde(default)]
    pub task_lookup_url: Option<String>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUpRule>,
}

fn default_dependency_agent() -> Option<String> {
    Some("task_dependency_agent".to_string())
}

fn default_review_agent() -> Option<String> {
    Some("document_reviewer_agent".to_string())
}

fn default_fan_out() -> usize {
    4
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_agent: None,
            dependency_agent: default_dependency_agent(),
            review_agent: default_review_agent(),
            fan_out: default_fan_out(),
            request_deadline_ms: None,
            task_lookup_url: None,
            follow_ups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Http,
    Local,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Http => write!(f, "http"),
            AgentKind::Local => write!(f, "local"),
        }
    }
}

/// One registry entry as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intents: Vec<String>,
    /// Extra routing hints matched against the query by the fallback planner.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub kind: AgentKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub healthcheck: Option<String>,
    #[serde(default = "default_agent_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_agent_timeout_ms() -> u64 {
    15_000
}

impl AgentConfig {
    pub fn local(name: &str, handler: &str, intents: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            intents: intents.iter().map(|s| s.to_string()).collect(),
            keywords: Vec::new(),
            kind: AgentKind::Local,
            endpoint: None,
            handler: Some(handler.to_string()),
            healthcheck: None,
            timeout_ms: default_agent_timeout_ms(),
        }
    }

    pub fn http(name: &str, endpoint: &str, intents: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            intents: intents.iter().map(|s| s.to_string()).collect(),
            keywords: Vec::new(),
            kind: AgentKind::Http,
            endpoint: Some(endpoint.to_string()),
            handler: None,
            healthcheck: None,
            timeout_ms: default_agent_timeout_ms(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_gateway_host() -> String {
    "0.0.0.0".to_string()
}

fn default_gateway_port() -> u16 {
    18800
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            allowed_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_agents() -> Vec<AgentConfig> {
    vec![AgentConfig::local("echo", "echo", &["general"])
        .with_description("Repeats the query text back. Useful for smoke-testing the pipeline.")]
}

/// Provider names that read their key from an environment variable when the
/// config file leaves it empty.
const PROVIDER_KEY_ENV: &[(&str, &str)] = &[
    ("openrouter", "OPENROUTER_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("groq", "GROQ_API_KEY"),
];

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("openrouter".to_string(), ProviderConfig {
            api_key: String::new(),
            api_base: Some("https://openrouter.ai/api/v1".to_string()),
            proxy: None,
        });
        providers.insert("openai".to_string(), ProviderConfig::default());
        providers.insert("deepseek".to_string(), ProviderConfig::default());
        providers.insert("groq".to_string(), ProviderConfig::default());

        Self {
            providers,
            network: NetworkConfig::default(),
            llm: LlmConfig::default(),
            supervisor: SupervisorConfig::default(),
            agents: default_agents(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env_keys();
        config.check()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        Self::load_or_default_at(&paths.config_file())
    }

    /// Like [`Config::load_or_default`] for an explicit file location.
    pub fn load_or_default_at(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let mut config = Self::default();
            config.apply_env_keys();
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// First provider (in priority order) that carries an API key.
    pub fn get_api_key(&self) -> Option<(&str, &ProviderConfig)> {
        let priority = ["openrouter", "openai", "deepseek", "groq", "vllm"];
        for name in priority {
            if let Some(provider) = self.providers.get(name) {
                if !provider.api_key.is_empty() {
                    return Some((name, provider));
                }
            }
        }
        None
    }

    fn apply_env_keys(&mut self) {
        for (name, var) in PROVIDER_KEY_ENV {
            let Ok(key) = std::env::var(var) else { continue };
            if key.trim().is_empty() {
                continue;
            }
            let entry = self.providers.entry(name.to_string()).or_default();
            if entry.api_key.is_empty() {
                debug!(provider = %name, env = %var, "Using API key from environment");
                entry.api_key = key.trim().to_string();
            }
        }
    }

    fn check(&self) -> Result<()> {
        if self.supervisor.fan_out == 0 {
            return Err(Error::Config("supervisor.fanOut must be at least 1".to_string()));
        }
        if self.gateway.port == 0 {
            return Err(Error::Config("gateway.port must be non-zero".to_string()));
        }
        Ok(())
    }
}
