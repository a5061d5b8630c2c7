pub mod agents;
pub mod config_cmd;
pub mod query;
pub mod serve;

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use switchboard_core::{Config, Paths};
use switchboard_supervisor::{AgentDescriptor, Connection};

pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| Paths::new().config_file())
}

pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    Ok(Config::load_or_default_at(path)?)
}

/// Public view of one registry entry, shared by `agents list` and `GET /v1/agents`.
pub fn agent_summary(agent: &AgentDescriptor) -> Value {
    let target = match &agent.connection {
        Connection::Http { endpoint } => endpoint.clone(),
        Connection::Local { handler } => handler.to_string(),
    };
    json!({
        "name": agent.name,
        "kind": agent.kind().to_string(),
        "target": target,
        "description": agent.description,
        "intents": agent.intents,
        "keywords": agent.keywords,
        "timeout_ms": agent.timeout.as_millis() as u64,
        "healthcheck": agent.healthcheck,
    })
}
