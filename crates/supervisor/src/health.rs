use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use switchboard_core::config::NetworkConfig;
use switchboard_providers::build_http_client;
use tracing::{info, warn};

use crate::registry::{AgentDescriptor, AgentRegistry, Connection};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub name: String,
    pub healthy: bool,
    pub detail: String,
    pub latency_ms: u64,
}

/// Hits every agent's `healthcheck` URL concurrently, through the same
/// proxy rules the invoker uses.
pub struct HealthChecker;

impl HealthChecker {
    pub async fn check_all(registry: &AgentRegistry, network: &NetworkConfig) -> Vec<AgentHealth> {
        let report = join_all(registry.all().iter().map(|a| Self::check(network, a))).await;

        let unhealthy: Vec<&str> = report
            .iter()
            .filter(|h| !h.healthy)
            .map(|h| h.name.as_str())
            .collect();
        if unhealthy.is_empty() {
            info!(agents = report.len(), "All agents healthy");
        } else {
            warn!(unhealthy = ?unhealthy, "Some agents failed their health check");
        }
        report
    }

    async fn check(network: &NetworkConfig, agent: &AgentDescriptor) -> AgentHealth {
        let started = Instant::now();
        let (healthy, detail) = match (&agent.connection, agent.healthcheck.as_deref()) {
            (Connection::Local { handler }, _) => (true, format!("local handler '{}'", handler)),
            (Connection::Http { .. }, None) => (true, "no healthcheck configured".to_string()),
            (Connection::Http { .. }, Some(url)) => {
                let client = build_http_client(None, network, url, CHECK_TIMEOUT);
                Self::get(&client, url).await
            }
        };
        AgentHealth {
            name: agent.name.clone(),
            healthy,
            detail,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn get(client: &Client, url: &str) -> (bool, String) {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => (true, format!("HTTP {}", resp.status().as_u16())),
            Ok(resp) => (false, format!("HTTP {}", resp.status().as_u16())),
            Err(e) if e.is_timeout() => (false, format!("timed out after {} s", CHECK_TIMEOUT.as_secs())),
            Err(e) => (false, e.to_string()),
        }
    }
}
