use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{ErrorKind, RequestContext, WorkerInput, WorkerRequest, WorkerResponse};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::invoker::Invoker;
use crate::plan::{InputSource, Plan, Step, StepRef};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    ResolvingInput,
    Dispatched,
    Succeeded,
    Failed,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::ResolvingInput => "resolving_input",
            StepState::Dispatched => "dispatched",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
        }
    }
}

fn transition(step: &Step, state: StepState) {
    debug!(step_id = step.step_id, agent = %step.agent, state = state.as_str(), "Step transition");
}

/// Terminal record of one step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    pub response: WorkerResponse,
    /// Time spent in the invoker; zero for steps that were never dispatched.
    pub elapsed: Duration,
    pub dispatched: bool,
}

impl StepResult {
    fn skipped(step: &Step, kind: ErrorKind, message: String) -> Self {
        transition(step, StepState::Failed);
        warn!(step_id = step.step_id, agent = %step.agent, error_type = %kind, message = %message, "Step not dispatched");
        Self {
            response: WorkerResponse::failure("", &step.agent, kind, message),
            step: step.clone(),
            elapsed: Duration::ZERO,
            dispatched: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.response.is_success()
    }
}

/// Awaits `fut`, giving up at `deadline` when one is set.
pub(crate) async fn within_deadline<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// JSON strings pass through verbatim; anything else is compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Runs a validated plan level by level. Independent steps in a level run
/// concurrently, at most `fan_out` at a time.
pub struct PlanExecutor {
    registry: Arc<AgentRegistry>,
    invoker: Arc<dyn Invoker>,
    fan_out: usize,
}

impl PlanExecutor {
    pub fn new(registry: Arc<AgentRegistry>, invoker: Arc<dyn Invoker>, fan_out: usize) -> Self {
        Self {
            registry,
            invoker,
            fan_out: fan_out.max(1),
        }
    }

    /// Returns one result per step, in plan order.
    pub async fn execute(
        &self,
        query: &str,
        plan: &Plan,
        context: &RequestContext,
        deadline: Option<Instant>,
    ) -> Vec<StepResult> {
        let index_of: HashMap<u32, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.step_id, i))
            .collect();
        let mut slots: Vec<Option<StepResult>> = vec![None; plan.steps.len()];

        for level in plan.levels() {
            let mut ready = Vec::with_capacity(level.len());
            for idx in level {
                let step = &plan.steps[idx];
                transition(step, StepState::Pending);
                transition(step, StepState::ResolvingInput);
                match resolve_input(&step.input_source, query, &slots, &index_of) {
                    Ok(text) => ready.push((idx, text)),
                    Err(message) => {
                        slots[idx] = Some(StepResult::skipped(step, ErrorKind::DependencyFailed, message));
                    }
                }
            }

            let finished: Vec<(usize, StepResult)> = stream::iter(ready)
                .map(|(idx, text)| async move {
                    (idx, self.run_step(&plan.steps[idx], text, context, deadline).await)
                })
                .buffer_unordered(self.fan_out)
                .collect()
                .await;
            for (idx, result) in finished {
                slots[idx] = Some(result);
            }
        }

        slots.into_iter().flatten().collect()
    }

    async fn run_step(
        &self,
        step: &Step,
        text: String,
        context: &RequestContext,
        deadline: Option<Instant>,
    ) -> StepResult {
        let Some(agent) = self.registry.get(&step.agent) else {
            return StepResult::skipped(
                step,
                ErrorKind::ConfigError,
                format!("agent '{}' is not registered", step.agent),
            );
        };

        let now = Instant::now();
        let remaining = deadline.map(|d| d.saturating_duration_since(now));
        if remaining == Some(Duration::ZERO) {
            return StepResult::skipped(
                step,
                ErrorKind::Cancelled,
                "request deadline passed before dispatch".to_string(),
            );
        }
        let (limit, cut_by_deadline) = match remaining {
            Some(r) if r < agent.timeout => (r, true),
            _ => (agent.timeout, false),
        };

        let input = WorkerInput {
            text,
            metadata: step.metadata.clone(),
        };
        let request = WorkerRequest::new(&agent.name, &step.intent, input, context.clone());

        transition(step, StepState::Dispatched);
        info!(step_id = step.step_id, agent = %agent.name, intent = %step.intent, request_id = %request.request_id, "Step dispatched");

        let started = Instant::now();
        let response = match tokio::time::timeout(limit, self.invoker.invoke(agent, &request)).await {
            Ok(resp) => resp,
            Err(_) if cut_by_deadline => WorkerResponse::failure(
                &request.request_id,
                &agent.name,
                ErrorKind::Cancelled,
                "request deadline reached while the agent was running",
            ),
            Err(_) => WorkerResponse::failure(
                &request.request_id,
                &agent.name,
                ErrorKind::Timeout,
                format!("{} did not respond within {} ms", agent.name, agent.timeout.as_millis()),
            ),
        };
        let elapsed = started.elapsed();

        let state = if response.is_success() { StepState::Succeeded } else { StepState::Failed };
        transition(step, state);
        info!(
            step_id = step.step_id,
            agent = %agent.name,
            status = response.status(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Step finished"
        );

        StepResult {
            step: step.clone(),
            response,
            elapsed,
            dispatched: true,
        }
    }
}

fn resolve_input(
    source: &InputSource,
    query: &str,
    slots: &[Option<StepResult>],
    index_of: &HashMap<u32, usize>,
) -> Result<String, String> {
    let reference: &StepRef = match source {
        InputSource::UserQuery => return Ok(query.to_string()),
        InputSource::Step(r) => r,
    };

    let upstream = index_of
        .get(&reference.step_id)
        .and_then(|&i| slots[i].as_ref())
        .ok_or_else(|| format!("step {} has not completed", reference.step_id))?;

    let output = match upstream.response.error() {
        Some(err) => {
            return Err(format!(
                "step {} ({}) failed: {}",
                reference.step_id, upstream.step.agent, err.kind
            ))
        }
        None => upstream.response.output().map(|o| o.as_value()).unwrap_or(Value::Null),
    };

    let mut cursor = &output;
    for segment in &reference.field {
        let next = match cursor {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        cursor = match next {
            Some(v) if !v.is_null() => v,
            _ => {
                return Err(format!(
                    "step {} output has no field '{}'",
                    reference.step_id,
                    reference.field.join(".")
                ))
            }
        };
    }
    Ok(value_text(cursor))
}
