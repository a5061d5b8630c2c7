use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::config::SupervisorConfig;
use switchboard_core::{Config, RequestContext, Result};
use switchboard_providers::{create_provider, Provider};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use crate::executor::{within_deadline, PlanExecutor};
use crate::invoker::{AgentInvoker, Invoker};
use crate::planner::{PlanOutcome, Planner};
use crate::registry::AgentRegistry;
use crate::response::SupervisorResponse;
use crate::synthesizer::Synthesizer;
use crate::tasks::{HttpTaskLookup, TaskNameLookup};

/// Inbound query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub debug: bool,
    /// Overrides `supervisor.requestDeadlineMs` for this request.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl QueryRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Default::default()
        }
    }
}

/// Whole-pipeline failures. Folded into the response's top-level `error`.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Query cannot be empty")]
    EmptyQuery,
    #[error("No agents are registered")]
    EmptyRegistry,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::EmptyQuery => "invalid_request",
            SupervisorError::EmptyRegistry => "registry_error",
            SupervisorError::Internal(_) => "internal_error",
        }
    }

    pub fn into_response(self) -> SupervisorResponse {
        let answer = match self {
            SupervisorError::EmptyQuery => "Please enter a question.",
            SupervisorError::EmptyRegistry => "No agents are available to handle this request.",
            SupervisorError::Internal(_) => "Something went wrong while handling your request.",
        };
        SupervisorResponse::failed(self.kind(), self.to_string(), answer)
    }
}

/// Query → plan → execution → synthesis → response. Holds no per-request
/// state, so one instance serves concurrent requests.
pub struct Supervisor {
    registry: Arc<AgentRegistry>,
    planner: Planner,
    executor: PlanExecutor,
    synthesizer: Synthesizer,
    deadline: Option<Duration>,
}

impl Supervisor {
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(AgentRegistry::from_configs(&config.agents)?);
        let provider = create_provider(config);
        let invoker: Arc<dyn Invoker> = Arc::new(AgentInvoker::new(&registry, &config.network));
        let task_lookup = config
            .supervisor
            .task_lookup_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|url| Arc::new(HttpTaskLookup::new(url, &config.network)) as Arc<dyn TaskNameLookup>);

        Ok(Self::new(
            registry,
            config.llm.planner_enabled.then(|| provider.clone()).flatten(),
            config.llm.synthesis_enabled.then(|| provider).flatten(),
            invoker,
            task_lookup,
            &config.supervisor,
        ))
    }

    pub fn new(
        registry: Arc<AgentRegistry>,
        planner_model: Option<Arc<dyn Provider>>,
        synthesis_model: Option<Arc<dyn Provider>>,
        invoker: Arc<dyn Invoker>,
        task_lookup: Option<Arc<dyn TaskNameLookup>>,
        settings: &SupervisorConfig,
    ) -> Self {
        Self {
            planner: Planner::new(
                registry.clone(),
                planner_model,
                settings.default_agent.clone(),
                settings.follow_ups.clone(),
            ),
            executor: PlanExecutor::new(registry.clone(), invoker, settings.fan_out),
            synthesizer: Synthesizer::new(
                synthesis_model,
                task_lookup,
                settings.dependency_agent.clone(),
            )
            .with_review_agent(settings.review_agent.clone()),
            registry,
            deadline: settings.request_deadline_ms.map(Duration::from_millis),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn handle(&self, request: QueryRequest) -> SupervisorResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("request", request_id = %request_id);
        self.handle_inner(request).instrument(span).await
    }

    async fn handle_inner(&self, request: QueryRequest) -> SupervisorResponse {
        let query = request.query.trim();
        if query.is_empty() {
            return SupervisorError::EmptyQuery.into_response();
        }
        let debug = request.options.debug;
        let started = Instant::now();
        let deadline = request
            .options
            .deadline_ms
            .map(Duration::from_millis)
            .or(self.deadline)
            .map(|d| started + d);

        let plan = match self.planner.plan_until(query, deadline).await {
            PlanOutcome::ShortCircuit { answer, .. } => {
                return SupervisorResponse::answered(answer, debug);
            }
            PlanOutcome::Plan { plan, .. } => plan,
        };
        if plan.is_empty() && self.registry.is_empty() {
            return SupervisorError::EmptyRegistry.into_response();
        }

        let context = RequestContext::new(request.user_id.as_deref(), request.conversation_id.clone());
        let mut results = self.executor.execute(query, &plan, &context, deadline).await;
        if within_deadline(deadline, self.synthesizer.rewrite_dependency_results(&mut results))
            .await
            .is_none()
        {
            warn!("Deadline reached during task-name rewrite; results left unchanged");
        }
        let answer = self.synthesizer.compose_until(query, &results, deadline).await;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            steps = results.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );
        SupervisorResponse::assemble(answer, results, debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use switchboard_core::{AgentConfig, WorkerOutput, WorkerRequest, WorkerResponse};

    use crate::registry::AgentDescriptor;

    fn offline(config: &mut Config) -> Supervisor {
        for p in config.providers.values_mut() {
            p.api_key.clear();
        }
        Supervisor::from_config(config).unwrap()
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid_request() {
        let sup = offline(&mut Config::default());
        let resp = sup.handle(QueryRequest::new("   ")).await;
        assert_eq!(resp.error.unwrap().kind, "invalid_request");
        assert!(resp.used_agents.is_empty());
    }

    #[tokio::test]
    async fn test_default_config_answers_with_echo() {
        let sup = offline(&mut Config::default());
        let resp = sup.handle(QueryRequest::new("ping the pipeline")).await;
        assert!(resp.error.is_none());
        assert_eq!(resp.answer, "ping the pipeline");
        assert_eq!(resp.used_agents[0].name, "echo");
    }

    #[tokio::test]
    async fn test_empty_registry_is_registry_error() {
        let mut config = Config::default();
        config.agents.clear();
        let sup = offline(&mut config);
        let resp = sup.handle(QueryRequest::new("summarize my notes")).await;
        assert_eq!(resp.error.unwrap().kind, "registry_error");
    }

    /// Records the user id each worker request carries.
    struct RecordingInvoker {
        users: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Invoker for RecordingInvoker {
        async fn invoke(&self, agent: &AgentDescriptor, request: &WorkerRequest) -> WorkerResponse {
            self.users.lock().unwrap().push(request.context.user_id.clone());
            WorkerResponse::success(
                &request.request_id,
                &agent.name,
                WorkerOutput::new(serde_json::json!("done")),
            )
        }
    }

    fn recording() -> (Supervisor, Arc<RecordingInvoker>) {
        let registry = Arc::new(
            AgentRegistry::from_configs(&[AgentConfig::local("echo", "echo", &["general"])]).unwrap(),
        );
        let invoker = Arc::new(RecordingInvoker { users: Mutex::new(Vec::new()) });
        let sup = Supervisor::new(
            registry,
            None,
            None,
            invoker.clone(),
            None,
            &SupervisorConfig::default(),
        );
        (sup, invoker)
    }

    #[tokio::test]
    async fn test_user_id_defaults_to_anonymous() {
        let (sup, invoker) = recording();
        sup.handle(QueryRequest::new("run the report")).await;

        let mut req = QueryRequest::new("run the report");
        req.user_id = Some("u-42".to_string());
        sup.handle(req).await;

        assert_eq!(*invoker.users.lock().unwrap(), vec!["anonymous", "u-42"]);
    }

    #[tokio::test]
    async fn test_debug_flag_exposes_steps() {
        let mut config = Config::default();
        config.agents = vec![AgentConfig::local("counter", "word_count", &["text.count"])];
        let sup = offline(&mut config);

        let resp = sup.handle(QueryRequest::new("count these four words")).await;
        assert!(resp.intermediate_results.is_none());

        let mut req = QueryRequest::new("count these four words");
        req.options.debug = true;
        let resp = sup.handle(req).await;
        let steps = resp.intermediate_results.unwrap();
        assert_eq!(steps[&1].output().unwrap().result, serde_json::json!(4));
    }

    #[test]
    fn test_query_request_shape() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"query":"hi","options":{"debug":true}}"#).unwrap();
        assert!(req.options.debug);
        assert!(req.user_id.is_none());
        assert!(req.options.deadline_ms.is_none());
    }
}
