use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use switchboard_core::{AgentConfig, AgentKind, Error, Result};
use tracing::info;

use crate::local::LocalHandler;

/// How an agent is reached.
#[derive(Debug, Clone, PartialEq)]
pub enum Connection {
    Http { endpoint: String },
    Local { handler: LocalHandler },
}

/// One invokable agent. Immutable once the registry is built.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub intents: Vec<String>,
    pub keywords: Vec<String>,
    pub connection: Connection,
    pub healthcheck: Option<String>,
    pub timeout: Duration,
}

impl AgentDescriptor {
    pub fn kind(&self) -> AgentKind {
        match self.connection {
            Connection::Http { .. } => AgentKind::Http,
            Connection::Local { .. } => AgentKind::Local,
        }
    }

    fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let name = cfg.name.trim();
        if name.is_empty() {
            return Err(Error::Config("agent name must not be empty".to_string()));
        }
        if cfg.timeout_ms == 0 {
            return Err(Error::Config(format!("agent '{}': timeoutMs must be positive", name)));
        }

        let connection = match cfg.kind {
            AgentKind::Http => {
                let endpoint = cfg.endpoint.as_deref().map(str::trim).unwrap_or_default();
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(Error::Config(format!(
                        "agent '{}': http agents need an http(s):// endpoint, got '{}'",
                        name, endpoint
                    )));
                }
                Connection::Http {
                    endpoint: endpoint.to_string(),
                }
            }
            AgentKind::Local => {
                let handler_name = cfg.handler.as_deref().unwrap_or(name);
                let handler = LocalHandler::from_name(handler_name).ok_or_else(|| {
                    Error::Config(format!(
                        "agent '{}': unknown local handler '{}'",
                        name, handler_name
                    ))
                })?;
                Connection::Local { handler }
            }
        };

        Ok(Self {
            name: name.to_string(),
            description: cfg.description.clone(),
            intents: cfg.intents.clone(),
            keywords: cfg.keywords.clone(),
            connection,
            healthcheck: cfg.healthcheck.clone().filter(|h| !h.trim().is_empty()),
            timeout: Duration::from_millis(cfg.timeout_ms),
        })
    }
}

/// What the planning model sees about each agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentBriefing<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub intents: &'a [String],
}

/// Static catalog of agents, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    by_name: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn from_configs(configs: &[AgentConfig]) -> Result<Self> {
        let mut registry = Self::default();
        for cfg in configs {
            let agent = AgentDescriptor::from_config(cfg)?;
            if registry.by_name.contains_key(&agent.name) {
                return Err(Error::Config(format!("duplicate agent name '{}'", agent.name)));
            }
            registry.by_name.insert(agent.name.clone(), registry.agents.len());
            registry.agents.push(agent);
        }
        info!(count = registry.agents.len(), "Agent registry loaded");
        Ok(registry)
    }

    pub fn lookup(&self, name: &str) -> Result<&AgentDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::NotFound(format!("agent '{}'", name)))
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.by_name.get(name).map(|&i| &self.agents[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn all(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn briefing(&self) -> Vec<AgentBriefing<'_>> {
        self.agents
            .iter()
            .map(|a| AgentBriefing {
                name: &a.name,
                description: &a.description,
                intents: &a.intents,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
