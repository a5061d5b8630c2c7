//! Plan model and the parse-and-validate boundary for planning-model output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::registry::AgentRegistry;

const USER_QUERY: &str = "user_query";

/// A backward reference `step:<id>.output.<field>[.<field>...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRef {
    pub step_id: u32,
    /// Path inside the referenced step's output, e.g. `["result"]`.
    pub field: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    UserQuery,
    Step(StepRef),
}

impl InputSource {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == USER_QUERY {
            return Some(InputSource::UserQuery);
        }
        let rest = raw.strip_prefix("step:")?;
        let (id, path) = rest.split_once('.')?;
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let step_id = id.parse().ok()?;
        let mut segments = path.split('.');
        if segments.next() != Some("output") {
            return None;
        }
        let field: Vec<String> = segments.map(str::to_string).collect();
        if field.is_empty() || field.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(InputSource::Step(StepRef { step_id, field }))
    }

    pub fn step(step_id: u32, field: &str) -> Self {
        InputSource::Step(StepRef {
            step_id,
            field: field.split('.').map(str::to_string).collect(),
        })
    }

    pub fn depends_on(&self) -> Option<u32> {
        match self {
            InputSource::UserQuery => None,
            InputSource::Step(r) => Some(r.step_id),
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::UserQuery => f.write_str(USER_QUERY),
            InputSource::Step(r) => write!(f, "step:{}.output.{}", r.step_id, r.field.join(".")),
        }
    }
}

impl Serialize for InputSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InputSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        InputSource::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("malformed input_source '{}'", raw)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_id: u32,
    pub agent: String,
    /// Passed to the agent as-is; not checked against the agent's declared intents.
    pub intent: String,
    pub input_source: InputSource,
    /// Forwarded as `input.metadata` in the handshake.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Step {
    pub fn new(step_id: u32, agent: &str, intent: &str, input_source: InputSource) -> Self {
        Self {
            step_id,
            agent: agent.to_string(),
            intent: intent.to_string(),
            input_source,
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("plan is not valid JSON of shape {{\"steps\": [...]}}: {0}")]
    Malformed(String),
    #[error("step {step_id}: unknown agent '{agent}'")]
    UnknownAgent { step_id: u32, agent: String },
    #[error("step {step_id}: malformed input_source '{input_source}'")]
    MalformedInputSource { step_id: u32, input_source: String },
    #[error("duplicate step_id {0}")]
    DuplicateStepId(u32),
    #[error("step {0} references itself")]
    SelfReference(u32),
    #[error("step {step_id} references later step {target}")]
    ForwardReference { step_id: u32, target: u32 },
    #[error("step {step_id} references missing step {target}")]
    UnknownStepReference { step_id: u32, target: u32 },
}

/// Ordered steps. An empty plan means no agent is needed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    step_id: u32,
    agent: String,
    intent: String,
    input_source: String,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parses planning-model output and validates it against the registry.
    /// Tolerates a fenced code block or prose around the JSON object.
    pub fn parse(raw: &str, registry: &AgentRegistry) -> Result<Plan, PlanValidationError> {
        let json = extract_json_object(raw)
            .ok_or_else(|| PlanValidationError::Malformed("no JSON object found".to_string()))?;
        let parsed: RawPlan = serde_json::from_str(json)
            .map_err(|e| PlanValidationError::Malformed(e.to_string()))?;

        let mut steps = Vec::with_capacity(parsed.steps.len());
        for raw_step in parsed.steps {
            let input_source = InputSource::parse(&raw_step.input_source).ok_or_else(|| {
                PlanValidationError::MalformedInputSource {
                    step_id: raw_step.step_id,
                    input_source: raw_step.input_source.clone(),
                }
            })?;
            steps.push(Step::new(
                raw_step.step_id,
                raw_step.agent.trim(),
                raw_step.intent.trim(),
                input_source,
            ));
        }

        let plan = Plan { steps };
        plan.validate(registry)?;
        Ok(plan)
    }

    /// Checks unique ids, known agents and strictly backward references.
    pub fn validate(&self, registry: &AgentRegistry) -> Result<(), PlanValidationError> {
        let all_ids: HashSet<u32> = self.steps.iter().map(|s| s.step_id).collect();
        let mut seen = HashSet::new();

        for step in &self.steps {
            if !seen.insert(step.step_id) {
                return Err(PlanValidationError::DuplicateStepId(step.step_id));
            }
            if !registry.contains(&step.agent) {
                return Err(PlanValidationError::UnknownAgent {
                    step_id: step.step_id,
                    agent: step.agent.clone(),
                });
            }
            if let Some(target) = step.input_source.depends_on() {
                if target == step.step_id {
                    return Err(PlanValidationError::SelfReference(step.step_id));
                }
                if !seen.contains(&target) {
                    return Err(if all_ids.contains(&target) {
                        PlanValidationError::ForwardReference {
                            step_id: step.step_id,
                            target,
                        }
                    } else {
                        PlanValidationError::UnknownStepReference {
                            step_id: step.step_id,
                            target,
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Groups step indexes by dependency depth. Steps in one level never
    /// depend on each other. Assumes a validated plan.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut depth_of: HashMap<u32, usize> = HashMap::new();
        let mut levels: Vec<Vec<usize>> = Vec::new();
        for (idx, step) in self.steps.iter().enumerate() {
            let depth = step
                .input_source
                .depends_on()
                .and_then(|id| depth_of.get(&id))
                .map_or(0, |d| d + 1);
            depth_of.insert(step.step_id, depth);
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(idx);
        }
        levels
    }

    /// One past the highest id, or `None` when that would overflow `u32`.
    pub fn next_step_id(&self) -> Option<u32> {
        match self.steps.iter().map(|s| s.step_id).max() {
            Some(max) => max.checked_add(1),
            None => Some(1),
        }
    }
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::AgentConfig;

    fn registry() -> AgentRegistry {
        AgentRegistry::from_configs(&[
            AgentConfig::local("echo", "echo", &["general"]),
            AgentConfig::local("counter", "word_count", &["text.count"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_input_source_parse() {
        assert_eq!(InputSource::parse("user_query"), Some(InputSource::UserQuery));
        assert_eq!(
            InputSource::parse("step:3.output.result"),
            Some(InputSource::step(3, "result"))
        );
        assert_eq!(
            InputSource::parse("step:1.output.details.items").unwrap().to_string(),
            "step:1.output.details.items"
        );
        for bad in ["step:x.output.result", "step:1.result", "step:1.output", "step:1.output.", "query", "step:-1.output.result"] {
            assert_eq!(InputSource::parse(bad), None, "{bad}");
        }
    }

    #[test]
    fn test_parse_valid_plan_in_fence() {
        let raw = "```json\n{\"steps\":[{\"step_id\":0,\"agent\":\"echo\",\"intent\":\"general\",\"input_source\":\"user_query\"},\
                   {\"step_id\":1,\"agent\":\"counter\",\"intent\":\"text.count\",\"input_source\":\"step:0.output.result\"}]}\n```";
        let plan = Plan::parse(raw, &registry()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].input_source.depends_on(), Some(0));
    }

    #[test]
    fn test_empty_plan_is_valid() {
        let plan = Plan::parse(r#"{"steps": []}"#, &registry()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_validation_errors() {
        let reg = registry();
        let cases = [
            (r#"not json"#, "malformed"),
            (r#"{"plan": []}"#, "malformed"),
            (r#"{"steps":[{"step_id":0,"agent":"ghost","intent":"x","input_source":"user_query"}]}"#, "agent"),
            (r#"{"steps":[{"step_id":0,"agent":"echo","intent":"x","input_source":"previous"}]}"#, "input"),
            (r#"{"steps":[{"step_id":0,"agent":"echo","intent":"x","input_source":"user_query"},{"step_id":0,"agent":"echo","intent":"x","input_source":"user_query"}]}"#, "dup"),
            (r#"{"steps":[{"step_id":0,"agent":"echo","intent":"x","input_source":"step:0.output.result"}]}"#, "self"),
            (r#"{"steps":[{"step_id":0,"agent":"echo","intent":"x","input_source":"step:1.output.result"},{"step_id":1,"agent":"echo","intent":"x","input_source":"user_query"}]}"#, "forward"),
            (r#"{"steps":[{"step_id":0,"agent":"echo","intent":"x","input_source":"step:7.output.result"}]}"#, "unknown"),
        ];
        for (raw, expected) in cases {
            let err = Plan::parse(raw, &reg).unwrap_err();
            let ok = match expected {
                "malformed" => matches!(err, PlanValidationError::Malformed(_)),
                "agent" => matches!(err, PlanValidationError::UnknownAgent { .. }),
                "input" => matches!(err, PlanValidationError::MalformedInputSource { .. }),
                "dup" => matches!(err, PlanValidationError::DuplicateStepId(0)),
                "self" => matches!(err, PlanValidationError::SelfReference(0)),
                "forward" => matches!(err, PlanValidationError::ForwardReference { step_id: 0, target: 1 }),
                "unknown" => matches!(err, PlanValidationError::UnknownStepReference { step_id: 0, target: 7 }),
                _ => false,
            };
            assert!(ok, "{raw} -> {err:?}");
        }
    }

    #[test]
    fn test_levels_follow_dependencies() {
        let plan = Plan::new(vec![
            Step::new(1, "echo", "general", InputSource::UserQuery),
            Step::new(2, "echo", "general", InputSource::step(1, "result")),
            Step::new(3, "echo", "general", InputSource::UserQuery),
            Step::new(4, "echo", "general", InputSource::step(2, "result")),
        ]);
        assert_eq!(plan.levels(), vec![vec![0, 2], vec![1], vec![3]]);
        assert_eq!(plan.next_step_id(), Some(5));
    }

    #[test]
    fn test_next_step_id_at_u32_max() {
        assert_eq!(Plan::default().next_step_id(), Some(1));
        let plan = Plan::new(vec![Step::new(u32::MAX, "echo", "general", InputSource::UserQuery)]);
        assert_eq!(plan.next_step_id(), None);
    }

    #[test]
    fn test_step_serializes_directive_string() {
        let step = Step::new(2, "echo", "general", InputSource::step(1, "result"));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["input_source"], "step:1.output.result");
        assert!(json.get("metadata").is_none());
    }
}
