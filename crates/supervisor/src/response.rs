use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use switchboard_core::WorkerResponse;

use crate::executor::StepResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsedAgent {
    pub name: String,
    pub intent: String,
    /// `"success"` or `"error"`.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLevelError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// What the caller gets back for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorResponse {
    pub answer: String,
    pub used_agents: Vec<UsedAgent>,
    /// Keyed by `step_id`; present only when debug detail was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_results: Option<BTreeMap<u32, WorkerResponse>>,
    pub error: Option<TopLevelError>,
}

impl SupervisorResponse {
    /// Answer produced without invoking any agent.
    pub fn answered(answer: impl Into<String>, debug: bool) -> Self {
        Self {
            answer: answer.into(),
            used_agents: Vec::new(),
            intermediate_results: debug.then(BTreeMap::new),
            error: None,
        }
    }

    pub fn failed(kind: &str, message: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            used_agents: Vec::new(),
            intermediate_results: None,
            error: Some(TopLevelError {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }

    /// One `used_agents` entry per step in execution order, dispatched or not.
    pub fn assemble(answer: String, results: Vec<StepResult>, debug: bool) -> Self {
        let used_agents = results
            .iter()
            .map(|r| UsedAgent {
                name: r.step.agent.clone(),
                intent: r.step.intent.clone(),
                status: r.response.status().to_string(),
            })
            .collect();
        let intermediate_results = debug.then(|| {
            results
                .into_iter()
                .map(|r| (r.step.step_id, r.response))
                .collect()
        });
        Self {
            answer,
            used_agents,
            intermediate_results,
            error: None,
        }
    }
}
