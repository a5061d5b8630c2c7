use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::config::{NetworkConfig, SupervisorConfig};
use switchboard_core::types::{ChatMessage, LLMResponse};
use switchboard_core::{AgentConfig, FollowUpRule, Result};
use switchboard_providers::Provider;
use switchboard_supervisor::intent::REFUSAL;
use switchboard_supervisor::{
    AgentInvoker, AgentRegistry, HttpTaskLookup, QueryRequest, Supervisor, TaskNameLookup,
};

struct Agent {
    endpoint: String,
    hits: Arc<AtomicUsize>,
}

impl Agent {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A worker that answers with `result`, or echoes its input text when `None`.
async fn spawn_agent(result: Option<Value>, delay: Duration) -> Agent {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/run",
        post(move |Json(req): Json<Value>| {
            let counter = counter.clone();
            let result = result.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                let result = result.unwrap_or_else(|| req["input"]["text"].clone());
                Json(json!({
                    "request_id": req["request_id"],
                    "agent_name": req["agent_name"],
                    "status": "success",
                    "output": {"result": result, "details": {"metadata": req["input"]["metadata"]}},
                    "error": null
                }))
            }
        }),
    );
    let base = serve(router).await;
    Agent {
        endpoint: format!("{}/run", base),
        hits,
    }
}

struct ScriptedPlanner(String);

#[async_trait]
impl Provider for ScriptedPlanner {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<LLMResponse> {
        Ok(LLMResponse {
            content: Some(self.0.clone()),
            ..Default::default()
        })
    }
}

/// A model that answers only after `delay`.
struct SlowModel {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowModel {
    fn new(ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay: Duration::from_millis(ms),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Provider for SlowModel {
    async fn chat(&self, _messages: &[ChatMessage]) -> Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(LLMResponse {
            content: Some("too late".to_string()),
            ..Default::default()
        })
    }
}

fn slow_supervisor(
    planner: Option<Arc<SlowModel>>,
    synthesis: Option<Arc<SlowModel>>,
    deadline_ms: u64,
) -> Supervisor {
    let registry =
        Arc::new(AgentRegistry::from_configs(&[AgentConfig::local("echo", "echo", &["general"])]).unwrap());
    let invoker = Arc::new(AgentInvoker::new(&registry, &NetworkConfig::default()));
    let settings = SupervisorConfig {
        request_deadline_ms: Some(deadline_ms),
        ..Default::default()
    };
    Supervisor::new(
        registry,
        planner.map(|m| m as Arc<dyn Provider>),
        synthesis.map(|m| m as Arc<dyn Provider>),
        invoker,
        None,
        &settings,
    )
}

fn http(name: &str, agent: &Agent, intents: &[&str], timeout_ms: u64) -> AgentConfig {
    let mut cfg = AgentConfig::http(name, &agent.endpoint, intents);
    cfg.timeout_ms = timeout_ms;
    cfg
}

fn supervisor(
    agents: Vec<AgentConfig>,
    plan_json: Option<&str>,
    settings: SupervisorConfig,
    task_lookup: Option<Arc<dyn TaskNameLookup>>,
) -> Supervisor {
    let registry = Arc::new(AgentRegistry::from_configs(&agents).unwrap());
    let invoker = Arc::new(AgentInvoker::new(&registry, &NetworkConfig::default()));
    let planner = plan_json.map(|p| Arc::new(ScriptedPlanner(p.to_string())) as Arc<dyn Provider>);
    Supervisor::new(registry, planner, None, invoker, task_lookup, &settings)
}

fn debug_request(query: &str) -> QueryRequest {
    let mut req = QueryRequest::new(query);
    req.options.debug = true;
    req
}

#[tokio::test]
async fn greeting_short_circuits_without_agents() {
    let agent = spawn_agent(None, Duration::ZERO).await;
    let sup = supervisor(vec![http("echo", &agent, &["general"], 1000)], None, SupervisorConfig::default(), None);

    let resp = sup.handle(QueryRequest::new("hello")).await;
    assert_eq!(resp.answer, "Hello! How can I help you today?");
    assert!(resp.used_agents.is_empty());
    assert!(resp.error.is_none());
    assert_eq!(agent.hits(), 0);

    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["used_agents"], json!([]));
    assert!(json["error"].is_null());
}

#[tokio::test]
async fn abusive_query_is_refused_without_invocation() {
    let agent = spawn_agent(None, Duration::ZERO).await;
    let plan = r#"{"steps":[{"step_id":0,"agent":"echo","intent":"general","input_source":"user_query"}]}"#;
    let sup = supervisor(vec![http("echo", &agent, &["general"], 1000)], Some(plan), SupervisorConfig::default(), None);

    let resp = sup.handle(QueryRequest::new("you are useless, you idiot")).await;
    assert_eq!(resp.answer, REFUSAL);
    assert!(resp.used_agents.is_empty());
    assert_eq!(agent.hits(), 0);
}

#[tokio::test]
async fn single_agent_fallback_without_model() {
    let agent = spawn_agent(Some(json!("hello")), Duration::ZERO).await;
    let sup = supervisor(vec![http("echo", &agent, &["general"], 1000)], None, SupervisorConfig::default(), None);

    let resp = sup.handle(debug_request("please say hello back to me")).await;
    assert!(resp.error.is_none());
    assert!(resp.answer.contains("hello"));
    assert_eq!(resp.used_agents.len(), 1);
    assert_eq!(resp.used_agents[0].name, "echo");
    assert_eq!(resp.used_agents[0].intent, "general");
    assert_eq!(resp.used_agents[0].status, "success");

    let steps = resp.intermediate_results.unwrap();
    assert_eq!(steps.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(agent.hits(), 1);
}

#[tokio::test]
async fn timed_out_step_fails_its_dependent_without_dispatch() {
    let slow = spawn_agent(Some(json!("too late")), Duration::from_secs(3)).await;
    let writer = spawn_agent(None, Duration::ZERO).await;
    let plan = r#"{"steps":[
        {"step_id":1,"agent":"fetcher","intent":"fetch","input_source":"user_query"},
        {"step_id":2,"agent":"writer","intent":"write","input_source":"step:1.output.result"}
    ]}"#;
    let sup = supervisor(
        vec![http("fetcher", &slow, &["fetch"], 100), http("writer", &writer, &["write"], 1000)],
        Some(plan),
        SupervisorConfig::default(),
        None,
    );

    let resp = sup.handle(debug_request("fetch and write up the quarterly numbers")).await;
    assert!(resp.error.is_none());
    let statuses: Vec<_> = resp.used_agents.iter().map(|u| (u.name.as_str(), u.status.as_str())).collect();
    assert_eq!(statuses, vec![("fetcher", "error"), ("writer", "error")]);

    let steps = resp.intermediate_results.unwrap();
    assert_eq!(steps[&1].error().unwrap().kind.as_str(), "timeout");
    assert_eq!(steps[&2].error().unwrap().kind.as_str(), "dependency_failed");
    assert_eq!(writer.hits(), 0);
    assert!(resp.answer.contains("fetcher"));
    assert!(resp.answer.contains("timeout"));
}

#[tokio::test]
async fn independent_steps_are_order_insensitive() {
    let a = spawn_agent(Some(json!("alpha")), Duration::from_millis(120)).await;
    let b = spawn_agent(Some(json!("beta")), Duration::from_millis(10)).await;
    let c = spawn_agent(Some(json!("gamma")), Duration::from_millis(60)).await;
    let agents = || {
        vec![
            http("a", &a, &["x"], 2000),
            http("b", &b, &["x"], 2000),
            http("c", &c, &["x"], 2000),
        ]
    };
    let forward = r#"{"steps":[
        {"step_id":1,"agent":"a","intent":"x","input_source":"user_query"},
        {"step_id":2,"agent":"b","intent":"x","input_source":"user_query"},
        {"step_id":3,"agent":"c","intent":"x","input_source":"user_query"}]}"#;
    let reversed = r#"{"steps":[
        {"step_id":3,"agent":"c","intent":"x","input_source":"user_query"},
        {"step_id":2,"agent":"b","intent":"x","input_source":"user_query"},
        {"step_id":1,"agent":"a","intent":"x","input_source":"user_query"}]}"#;

    let mut outcomes = Vec::new();
    for (plan, fan_out) in [(forward, 1), (forward, 3), (reversed, 3)] {
        let settings = SupervisorConfig {
            fan_out,
            ..Default::default()
        };
        let sup = supervisor(agents(), Some(plan), settings, None);
        let resp = sup.handle(debug_request("run all three workers")).await;
        let by_step: BTreeMap<u32, (String, Value)> = resp
            .intermediate_results
            .unwrap()
            .into_iter()
            .map(|(id, r)| (id, (r.status().to_string(), r.output().unwrap().result.clone())))
            .collect();
        outcomes.push(by_step);
    }
    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[1], outcomes[2]);
    assert_eq!(outcomes[0][&1].1, json!("alpha"));
}

#[tokio::test]
async fn request_deadline_cancels_pending_steps() {
    let slow = spawn_agent(Some(json!("slow")), Duration::from_secs(2)).await;
    let fast = spawn_agent(Some(json!("fast")), Duration::ZERO).await;
    let plan = r#"{"steps":[
        {"step_id":1,"agent":"slow","intent":"x","input_source":"user_query"},
        {"step_id":2,"agent":"fast","intent":"x","input_source":"user_query"}]}"#;
    let settings = SupervisorConfig {
        fan_out: 1,
        request_deadline_ms: Some(150),
        ..Default::default()
    };
    let sup = supervisor(
        vec![http("slow", &slow, &["x"], 5000), http("fast", &fast, &["x"], 5000)],
        Some(plan),
        settings,
        None,
    );

    let resp = sup.handle(debug_request("do both things")).await;
    let steps = resp.intermediate_results.unwrap();
    assert_eq!(steps[&1].error().unwrap().kind.as_str(), "cancelled");
    assert_eq!(steps[&2].error().unwrap().kind.as_str(), "cancelled");
    assert_eq!(fast.hits(), 0);
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn follow_up_dependency_output_is_rendered_with_task_names() {
    let kb = spawn_agent(Some(json!({"created": ["t1", "t2"]})), Duration::ZERO).await;
    let tda = spawn_agent(
        Some(json!({
            "execution_order": ["t1", "t2"],
            "dependencies": {"t1": [], "t2": ["t1"]}
        })),
        Duration::ZERO,
    )
    .await;
    let tasks_base = serve(Router::new().route(
        "/tasks",
        get(|| async {
            Json(json!({"tasks": [
                {"task_id": "t1", "task_name": "Design schema"},
                {"task_id": "t2", "title": "Write migrations"}
            ]}))
        }),
    ))
    .await;
    let lookup: Arc<dyn TaskNameLookup> = Arc::new(HttpTaskLookup::new(
        &format!("{}/tasks", tasks_base),
        &NetworkConfig::default(),
    ));

    let plan = r#"{"steps":[{"step_id":0,"agent":"KnowledgeBaseBuilderAgent","intent":"create_task","input_source":"user_query"}]}"#;
    let settings = SupervisorConfig {
        follow_ups: vec![FollowUpRule {
            after_agent: "KnowledgeBaseBuilderAgent".into(),
            after_intent: Some("create_task".into()),
            agent: "task_dependency_agent".into(),
            intent: "task.resolve_dependencies".into(),
        }],
        ..Default::default()
    };
    let sup = supervisor(
        vec![
            http("KnowledgeBaseBuilderAgent", &kb, &["create_task"], 1000),
            http("task_dependency_agent", &tda, &["task.resolve_dependencies"], 1000),
        ],
        Some(plan),
        settings,
        Some(lookup),
    );

    let resp = sup.handle(QueryRequest::new("create task: design the schema then write migrations")).await;
    assert_eq!(resp.used_agents.len(), 2);
    assert_eq!(resp.used_agents[1].name, "task_dependency_agent");
    assert_eq!(kb.hits(), 1);
    assert_eq!(tda.hits(), 1);
    assert!(resp.answer.contains("- task_dependency_agent: Execution order tasks:\n- Design schema\n- Write migrations"));
    assert!(resp.answer.contains("Tasks with dependencies:\n- Write migrations"));
}

#[tokio::test]
async fn slow_models_cannot_outlive_the_request_deadline() {
    let planner = SlowModel::new(1500);
    let synthesis = SlowModel::new(1500);
    let sup = slow_supervisor(Some(planner.clone()), Some(synthesis.clone()), 200);

    let started = std::time::Instant::now();
    let resp = sup.handle(debug_request("look up the release notes")).await;
    assert!(started.elapsed() < Duration::from_millis(1000), "took {:?}", started.elapsed());

    assert_eq!(planner.calls.load(Ordering::SeqCst), 1);
    let steps = resp.intermediate_results.unwrap();
    assert_eq!(steps[&1].agent_name, "echo");
    assert_eq!(steps[&1].error().unwrap().kind.as_str(), "cancelled");
    assert!(resp.answer.contains("echo (cancelled"), "{}", resp.answer);
}

#[tokio::test]
async fn slow_synthesis_is_stitched_at_the_request_deadline() {
    let synthesis = SlowModel::new(1500);
    let sup = slow_supervisor(None, Some(synthesis.clone()), 300);

    let started = std::time::Instant::now();
    let resp = sup.handle(QueryRequest::new("look up the release notes")).await;
    assert!(started.elapsed() < Duration::from_millis(1000), "took {:?}", started.elapsed());

    assert_eq!(synthesis.calls.load(Ordering::SeqCst), 1);
    assert_eq!(resp.answer, "look up the release notes");
    assert_eq!(resp.used_agents[0].status, "success");
    assert!(resp.error.is_none());
}
