use serde_json::{json, Value};
use std::sync::Arc;
use switchboard_core::types::ChatMessage;
use switchboard_providers::Provider;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::executor::{value_text, within_deadline, StepResult};
use crate::tasks::{id_text, TaskNameLookup};

pub const OUT_OF_SCOPE: &str = "This information is not in my scope.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Given the user's query and the outputs of \
the worker agents that handled it, write one concise, actionable answer. Use only facts present in \
the tool outputs. If some agents failed, say briefly what could not be done.";

const NO_TOOLS_PROMPT: &str = "You are a helpful assistant behind a team of specialised agents. No \
agent was needed for this query. Answer it briefly if it is general conversation; otherwise say \
that it is outside what you can help with.";

/// Folds step results into the final answer.
pub struct Synthesizer {
    provider: Option<Arc<dyn Provider>>,
    task_lookup: Option<Arc<dyn TaskNameLookup>>,
    dependency_agent: Option<String>,
    review_agent: Option<String>,
}

impl Synthesizer {
    pub fn new(
        provider: Option<Arc<dyn Provider>>,
        task_lookup: Option<Arc<dyn TaskNameLookup>>,
        dependency_agent: Option<String>,
    ) -> Self {
        Self {
            provider,
            task_lookup,
            dependency_agent,
            review_agent: None,
        }
    }

    /// Agent whose review JSON is rendered as markdown instead of synthesized.
    pub fn with_review_agent(mut self, agent: Option<String>) -> Self {
        self.review_agent = agent;
        self
    }

    /// Replaces the dependency agent's structured result (`execution_order`,
    /// `dependencies`) with a readable list of task names. Results are left
    /// untouched when the lookup is unavailable or fails.
    pub async fn rewrite_dependency_results(&self, results: &mut [StepResult]) {
        let (Some(agent), Some(lookup)) = (&self.dependency_agent, &self.task_lookup) else {
            return;
        };

        let targets: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| &r.step.agent == agent)
            .filter(|(_, r)| r.response.output().map_or(false, |o| o.result.is_object()))
            .map(|(i, _)| i)
            .collect();
        if targets.is_empty() {
            return;
        }

        let mut ids = Vec::new();
        for &i in &targets {
            if let Some(output) = results[i].response.output() {
                let (order, deps) = dependency_ids(&output.result);
                ids.extend(order);
                ids.extend(deps);
            }
        }
        ids.sort();
        ids.dedup();

        let names = match lookup.names(&ids).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Task name lookup failed, leaving dependency output as-is");
                return;
            }
        };

        for i in targets {
            if let Some(output) = results[i].response.output_mut() {
                let (order, deps) = dependency_ids(&output.result);
                let resolve = |ids: Vec<String>| {
                    let mut seen = std::collections::HashSet::new();
                    ids.into_iter()
                        .filter_map(|id| names.get(&id).cloned())
                        .filter(|name| seen.insert(name.clone()))
                        .collect::<Vec<_>>()
                };
                output.result = Value::String(render_dependencies(&resolve(order), &resolve(deps)));
                debug!(step_id = results[i].step.step_id, "Dependency output rewritten");
            }
        }
    }

    pub async fn compose(&self, query: &str, results: &[StepResult]) -> String {
        self.compose_until(query, results, None).await
    }

    /// Like [`Synthesizer::compose`]; a model call still pending at `deadline`
    /// is dropped in favour of the deterministic answer.
    pub async fn compose_until(
        &self,
        query: &str,
        results: &[StepResult],
        deadline: Option<Instant>,
    ) -> String {
        if results.is_empty() {
            return match self.ask(NO_TOOLS_PROMPT, json!({ "user_query": query }), deadline).await {
                Some(answer) => answer,
                None => OUT_OF_SCOPE.to_string(),
            };
        }

        if !results.iter().any(StepResult::is_success) {
            return all_failed(results);
        }

        if let Some(review) = self.review_markdown(results) {
            return review;
        }

        let findings: Vec<Value> = results
            .iter()
            .map(|r| {
                let mut entry = json!({
                    "step_id": r.step.step_id,
                    "agent": r.step.agent,
                    "intent": r.step.intent,
                    "status": r.response.status(),
                });
                if let Some(o) = r.response.output() {
                    entry["result"] = o.result.clone();
                    if let Some(d) = &o.details {
                        entry["details"] = d.clone();
                    }
                }
                if let Some(e) = r.response.error() {
                    entry["error"] = json!({ "type": e.kind, "message": e.message });
                }
                entry
            })
            .collect();

        let payload = json!({ "user_query": query, "tool_outputs": findings });
        match self.ask(SYSTEM_PROMPT, payload, deadline).await {
            Some(answer) => answer,
            None => stitch(results),
        }
    }

    fn review_markdown(&self, results: &[StepResult]) -> Option<String> {
        let agent = self.review_agent.as_deref()?;
        results
            .iter()
            .filter(|r| r.step.agent == agent)
            .filter_map(|r| r.response.output())
            .find_map(|o| review_object(&o.result))
            .map(|review| {
                debug!(agent = %agent, "Rendering review result as markdown");
                render_review(&review)
            })
    }

    async fn ask(&self, system: &str, payload: Value, deadline: Option<Instant>) -> Option<String> {
        let provider = self.provider.as_ref()?;
        let user = serde_json::to_string_pretty(&payload).ok()?;
        let messages = [ChatMessage::system(system), ChatMessage::user(&user)];
        let Some(outcome) = within_deadline(deadline, provider.chat(&messages)).await else {
            warn!("Request deadline reached during synthesis, stitching results");
            return None;
        };
        match outcome {
            Ok(resp) => {
                let text = resp.text().map(str::to_string);
                if text.is_none() {
                    warn!("Synthesis model returned an empty answer");
                }
                text
            }
            Err(e) => {
                info!(error = %e, "Synthesis model unavailable, stitching results");
                None
            }
        }
    }
}

fn dependency_ids(result: &Value) -> (Vec<String>, Vec<String>) {
    let order = result
        .get("execution_order")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(id_text).collect())
        .unwrap_or_default();
    let deps = result
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter(|(_, v)| has_entries(v))
                .map(|(k, _)| k.clone())
                .collect()
        })
        .unwrap_or_default();
    (order, deps)
}

fn has_entries(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
    }
}

fn render_dependencies(order: &[String], with_deps: &[String]) -> String {
    let mut lines = Vec::new();
    if !order.is_empty() {
        lines.push("Execution order tasks:".to_string());
        lines.extend(order.iter().map(|n| format!("- {}", n)));
    }
    if !with_deps.is_empty() {
        lines.push("Tasks with dependencies:".to_string());
        lines.extend(with_deps.iter().map(|n| format!("- {}", n)));
    }
    if lines.is_empty() {
        lines.push("No task names could be resolved for dependencies.".to_string());
    }
    lines.join("\n")
}

const REVIEW_KEYS: &[&str] = &[
    "overall_score",
    "summary",
    "spelling_errors",
    "grammar_errors",
    "compliance_issues",
];

/// Review payload as an object, whether the agent sent it inline or as a JSON string.
fn review_object(result: &Value) -> Option<Value> {
    let value = match result {
        Value::String(s) => serde_json::from_str::<Value>(s).ok()?,
        other => other.clone(),
    };
    let map = value.as_object()?;
    REVIEW_KEYS.iter().any(|k| map.contains_key(*k)).then_some(value)
}

fn text_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::Null => None,
        v => Some(value_text(v)).filter(|s| !s.is_empty()),
    }
}

fn review_items<'a>(review: &'a Value, key: &str) -> &'a [Value] {
    review
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn render_review(review: &Value) -> String {
    let score = review.get("overall_score").and_then(Value::as_f64).unwrap_or(0.0);
    let mut md = vec![
        "## Document Review Summary\n".to_string(),
        format!("**Overall Score:** {:.1}%\n", score * 100.0),
    ];
    if let Some(summary) = text_field(review, "summary") {
        md.push(format!("{}\n", summary));
    }

    for (key, title) in [("spelling_errors", "Spelling Errors"), ("grammar_errors", "Grammar Errors")] {
        let items = review_items(review, key);
        if items.is_empty() {
            continue;
        }
        md.push(format!("\n### {} ({})\n", title, items.len()));
        for err in items {
            md.push(format!(
                "- **{}** → {}",
                text_field(err, "error").unwrap_or_else(|| "N/A".to_string()),
                text_field(err, "suggestion").unwrap_or_else(|| "N/A".to_string())
            ));
            if let Some(kind) = text_field(err, "type") {
                md.push(format!("  - *Type: {}*", kind));
            }
            if let Some(location) = text_field(err, "location") {
                md.push(format!("  - *Location: {}*", location));
            }
            md.push(String::new());
        }
    }

    let issues = review_items(review, "compliance_issues");
    if !issues.is_empty() {
        md.push(format!("\n### Compliance Issues ({})\n", issues.len()));
        for issue in issues {
            let severity = text_field(issue, "severity").unwrap_or_else(|| "unknown".to_string());
            let marker = match severity.as_str() {
                "high" => "🔴",
                "medium" => "🟡",
                _ => "🟢",
            };
            md.push(format!(
                "- {} **{}**: {}",
                marker,
                severity.to_uppercase(),
                text_field(issue, "issue").unwrap_or_else(|| "N/A".to_string())
            ));
            if let Some(suggestion) = text_field(issue, "suggestion") {
                md.push(format!("  - *Suggestion: {}*", suggestion));
            }
            md.push(String::new());
        }
    }

    md.join("\n")
}

fn failure_summary(r: &StepResult) -> Option<String> {
    r.response
        .error()
        .map(|e| format!("{} ({}: {})", r.step.agent, e.kind, e.message))
}

fn all_failed(results: &[StepResult]) -> String {
    let failures: Vec<String> = results.iter().filter_map(failure_summary).collect();
    format!(
        "I couldn't complete your request because every agent failed: {}.",
        failures.join("; ")
    )
}

/// Deterministic answer: successful results, then a note on failures.
fn stitch(results: &[StepResult]) -> String {
    let successes: Vec<(&str, String)> = results
        .iter()
        .filter_map(|r| {
            r.response
                .output()
                .map(|o| (r.step.agent.as_str(), value_text(&o.result)))
        })
        .collect();

    let mut answer = match successes.as_slice() {
        [(_, only)] => only.clone(),
        many => many
            .iter()
            .map(|(agent, text)| format!("- {}: {}", agent, text))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    let failures: Vec<String> = results.iter().filter_map(failure_summary).collect();
    if !failures.is_empty() {
        answer.push_str(&format!("\n\nSome agents could not complete: {}.", failures.join("; ")));
    }
    answer
}
