use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use switchboard_core::types::ChatMessage;
use switchboard_core::FollowUpRule;
use switchboard_providers::Provider;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::executor::within_deadline;
use crate::intent::{ShortCircuit, ShortCircuitClassifier};
use crate::plan::{InputSource, Plan, Step};
use crate::registry::{AgentDescriptor, AgentRegistry};

const PLANNER_PROMPT: &str = "You are a planner that selects worker agents to satisfy a user query. \
Return ONLY JSON with the shape {\"steps\":[{\"step_id\":0,\"agent\":\"...\",\"intent\":\"...\",\"input_source\":\"...\"}]}. \
input_source is either \"user_query\" or \"step:<id>.output.result\", where <id> is an earlier step. \
Use only agents and intents from available_agents. \
If the request is outside the available agents' scope, return {\"steps\":[]}. \
Avoid generic agents unless the user explicitly asks for what they do.";

const FALLBACK_INTENT: &str = "general";

/// Words too common to say anything about which agent fits.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "this", "that", "from", "into", "what", "about", "please", "can",
    "you", "your", "me", "my", "agent", "agents", "some", "give", "want", "need", "help", "are",
    "is", "of", "to", "in", "on", "a", "an", "it", "be", "do",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// Answered locally; no agent or model involved.
    ShortCircuit { kind: ShortCircuit, answer: String },
    Plan { plan: Plan, source: PlanSource },
}

/// Turns a query into a validated plan. Never fails: model errors or invalid
/// model output fall back to a keyword-routed single-step plan.
pub struct Planner {
    registry: Arc<AgentRegistry>,
    provider: Option<Arc<dyn Provider>>,
    classifier: ShortCircuitClassifier,
    default_agent: Option<String>,
    follow_ups: Vec<FollowUpRule>,
}

impl Planner {
    pub fn new(
        registry: Arc<AgentRegistry>,
        provider: Option<Arc<dyn Provider>>,
        default_agent: Option<String>,
        follow_ups: Vec<FollowUpRule>,
    ) -> Self {
        Self {
            registry,
            provider,
            classifier: ShortCircuitClassifier::new(),
            default_agent,
            follow_ups,
        }
    }

    pub async fn plan(&self, query: &str) -> PlanOutcome {
        self.plan_until(query, None).await
    }

    /// Like [`Planner::plan`], but the model call is abandoned at `deadline`
    /// and the fallback plan is used instead.
    pub async fn plan_until(&self, query: &str, deadline: Option<Instant>) -> PlanOutcome {
        if let Some(kind) = self.classifier.classify(query) {
            info!(kind = kind.as_str(), "Query short-circuited");
            return PlanOutcome::ShortCircuit {
                kind,
                answer: kind.answer(chrono::Utc::now()),
            };
        }

        let (mut plan, source) = match self.plan_with_model(query, deadline).await {
            Some(plan) => (plan, PlanSource::Model),
            None => (self.fallback_plan(query), PlanSource::Fallback),
        };
        self.append_follow_ups(&mut plan);
        info!(steps = plan.steps.len(), source = ?source, "Plan ready");
        PlanOutcome::Plan { plan, source }
    }

    async fn plan_with_model(&self, query: &str, deadline: Option<Instant>) -> Option<Plan> {
        let provider = self.provider.as_ref()?;
        let payload = json!({
            "user_query": query,
            "available_agents": self.registry.briefing(),
        });
        let user = serde_json::to_string_pretty(&payload).ok()?;
        let messages = [ChatMessage::system(PLANNER_PROMPT), ChatMessage::user(&user)];

        let response = match within_deadline(deadline, provider.chat(&messages)).await {
            Some(Ok(r)) => r,
            Some(Err(e)) => {
                warn!(error = %e, "Planning model unavailable, using fallback plan");
                return None;
            }
            None => {
                warn!("Request deadline reached while planning, using fallback plan");
                return None;
            }
        };
        let Some(raw) = response.text() else {
            warn!("Planning model returned no content, using fallback plan");
            return None;
        };
        debug!(raw = %raw, "Planner raw response");

        match Plan::parse(raw, &self.registry) {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!(error = %e, "Planning model output rejected, using fallback plan");
                None
            }
        }
    }

    /// Single step from the user query to the best keyword match, else the
    /// default agent, else the first registered agent. Empty when no agents exist.
    pub fn fallback_plan(&self, query: &str) -> Plan {
        let tokens = tokenize(query);
        let lower = query.to_lowercase();

        let mut best: Option<(&AgentDescriptor, u32)> = None;
        for agent in self.registry.all() {
            let score = score_agent(agent, &lower, &tokens);
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((agent, score));
            }
        }

        let agent = match best {
            Some((agent, score)) => {
                debug!(agent = %agent.name, score, "Fallback plan matched by keywords");
                Some(agent)
            }
            None => self
                .default_agent
                .as_deref()
                .and_then(|name| self.registry.get(name))
                .or_else(|| self.registry.all().first()),
        };

        match agent {
            Some(agent) => Plan::new(vec![Step::new(
                1,
                &agent.name,
                &pick_intent(agent, &tokens),
                InputSource::UserQuery,
            )]),
            None => Plan::default(),
        }
    }

    fn append_follow_ups(&self, plan: &mut Plan) {
        let mut present: HashSet<String> = plan.steps.iter().map(|s| s.agent.clone()).collect();
        let originals: Vec<(u32, String, String)> = plan
            .steps
            .iter()
            .map(|s| (s.step_id, s.agent.clone(), s.intent.clone()))
            .collect();

        for (step_id, agent, intent) in originals {
            for rule in &self.follow_ups {
                let intent_ok = rule.after_intent.as_deref().map_or(true, |i| i == intent);
                if rule.after_agent != agent || !intent_ok {
                    continue;
                }
                if present.contains(&rule.agent) || !self.registry.contains(&rule.agent) {
                    continue;
                }
                let Some(next_id) = plan.next_step_id() else {
                    warn!(after = step_id, agent = %rule.agent, "No step id left for follow-up, skipping it");
                    continue;
                };
                let mut step = Step::new(
                    next_id,
                    &rule.agent,
                    &rule.intent,
                    InputSource::step(step_id, "result"),
                );
                step.metadata
                    .insert("trigger".to_string(), Value::String("step_completed".to_string()));
                debug!(after = step_id, agent = %rule.agent, "Follow-up step appended");
                present.insert(rule.agent.clone());
                plan.steps.push(step);
            }
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            // split camelCase names like KnowledgeBaseBuilder
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        } else {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = false;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out.retain(|t| t.chars().count() > 2 && !STOP_WORDS.contains(&t.as_str()));
    out
}

fn overlap(query_tokens: &[String], text: &str) -> u32 {
    let words: HashSet<String> = tokenize(text).into_iter().collect();
    query_tokens.iter().filter(|t| words.contains(*t)).count() as u32
}

/// Keyword phrases weigh 3, intent and name tokens 2, description tokens 1.
fn score_agent(agent: &AgentDescriptor, lower_query: &str, tokens: &[String]) -> u32 {
    let keyword_hits = agent
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && lower_query.contains(k.as_str()))
        .count() as u32;
    let intent_hits: u32 = agent.intents.iter().map(|i| overlap(tokens, i)).sum();
    keyword_hits * 3
        + intent_hits * 2
        + overlap(tokens, &agent.name) * 2
        + overlap(tokens, &agent.description)
}

fn pick_intent(agent: &AgentDescriptor, tokens: &[String]) -> String {
    let mut best: Option<(&String, u32)> = None;
    for intent in &agent.intents {
        let score = overlap(tokens, intent);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((intent, score));
        }
    }
    best.map(|(i, _)| i.clone())
        .unwrap_or_else(|| FALLBACK_INTENT.to_string())
}
