use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use switchboard_core::config::NetworkConfig;
use switchboard_core::{Error, Result};
use switchboard_providers::build_http_client;
use tracing::debug;

/// Read-only source of task names, keyed by task id.
#[async_trait]
pub trait TaskNameLookup: Send + Sync {
    async fn names(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

/// GETs a task listing, either a bare array or `{"tasks": [...]}`.
pub struct HttpTaskLookup {
    client: Client,
    url: String,
}

impl HttpTaskLookup {
    pub fn new(url: &str, network: &NetworkConfig) -> Self {
        Self {
            client: build_http_client(None, network, url, Duration::from_secs(15)),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl TaskNameLookup for HttpTaskLookup {
    async fn names(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("task lookup failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("task lookup returned HTTP {}", response.status())));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("task lookup body: {}", e)))?;

        let mut names = task_names(&body);
        names.retain(|id, _| ids.contains(id));
        debug!(requested = ids.len(), resolved = names.len(), "Task names resolved");
        Ok(names)
    }
}

/// Id comes from `task_id`, `_id` or `id`; name from `task_name` or `title`,
/// else `Task <id>`.
pub fn task_names(listing: &Value) -> HashMap<String, String> {
    let tasks: &[Value] = match listing {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("tasks") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    let mut names = HashMap::new();
    for task in tasks {
        let Some(id) = ["task_id", "_id", "id"]
            .iter()
            .find_map(|k| task.get(*k).and_then(id_text))
        else {
            continue;
        };
        let name = ["task_name", "title"]
            .iter()
            .find_map(|k| task.get(*k).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Task {}", id));
        names.insert(id, name);
    }
    names
}

/// String ids as-is, numeric ids stringified; empty and null ids are skipped.
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
