use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use switchboard_core::config::NetworkConfig;
use switchboard_core::{ErrorKind, WorkerOutput, WorkerRequest, WorkerResponse};
use switchboard_providers::build_http_client;
use tracing::{debug, warn};

use crate::local::LocalHandler;
use crate::registry::{AgentDescriptor, AgentRegistry, Connection};

const BODY_PREVIEW: usize = 200;

/// Largest handshake body accepted from an agent.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Executes one handshake against one agent. Never fails: every fault comes
/// back as an error response.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(&self, agent: &AgentDescriptor, request: &WorkerRequest) -> WorkerResponse;
}

/// Dispatches on [`Connection`]: HTTP POST for remote agents, an in-process
/// call for built-in handlers.
pub struct AgentInvoker {
    clients: HashMap<String, Client>,
    fallback: Client,
    max_body_bytes: usize,
}

impl AgentInvoker {
    /// Builds one pooled client per HTTP agent so proxy rules apply per endpoint.
    pub fn new(registry: &AgentRegistry, network: &NetworkConfig) -> Self {
        let mut clients = HashMap::new();
        for agent in registry.all() {
            if let Connection::Http { endpoint } = &agent.connection {
                clients.insert(
                    agent.name.clone(),
                    build_http_client(None, network, endpoint, agent.timeout),
                );
            }
        }
        Self {
            clients,
            fallback: Client::new(),
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    async fn invoke_http(
        &self,
        agent: &AgentDescriptor,
        endpoint: &str,
        request: &WorkerRequest,
    ) -> WorkerResponse {
        let client = self.clients.get(&agent.name).unwrap_or(&self.fallback);
        let fail = |kind: ErrorKind, message: String| {
            WorkerResponse::failure(&request.request_id, &agent.name, kind, message)
        };

        debug!(agent = %agent.name, endpoint = %endpoint, request_id = %request.request_id, "POST handshake");
        let response = match client
            .post(endpoint)
            .timeout(agent.timeout)
            .json(request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return fail(classify_transport(&e), format!("{} calling {}: {}", agent.name, endpoint, e)),
        };

        let status = response.status();
        let body = match read_body(response, self.max_body_bytes).await {
            Ok(b) => b,
            Err((kind, message)) => return fail(kind, message),
        };

        if !status.is_success() {
            return fail(
                ErrorKind::HttpStatus,
                format!("HTTP {} from {}: {}", status.as_u16(), endpoint, preview(&body)),
            );
        }

        match serde_json::from_str::<WorkerResponse>(&body) {
            Ok(mut parsed) => {
                if parsed.request_id.is_empty() {
                    parsed.request_id = request.request_id.clone();
                }
                if parsed.agent_name.is_empty() {
                    parsed.agent_name = agent.name.clone();
                }
                parsed
            }
            Err(e) => fail(
                ErrorKind::BadResponse,
                format!("invalid handshake response: {} (body: {})", e, preview(&body)),
            ),
        }
    }

    fn invoke_local(
        &self,
        agent: &AgentDescriptor,
        handler: LocalHandler,
        request: &WorkerRequest,
    ) -> WorkerResponse {
        match run_guarded(|| handler.run(&request.input)) {
            Ok(output) => WorkerResponse::success(&request.request_id, &agent.name, output),
            Err(message) => WorkerResponse::failure(
                &request.request_id,
                &agent.name,
                ErrorKind::LocalHandlerError,
                message,
            ),
        }
    }
}

#[async_trait]
impl Invoker for AgentInvoker {
    async fn invoke(&self, agent: &AgentDescriptor, request: &WorkerRequest) -> WorkerResponse {
        let response = match &agent.connection {
            Connection::Http { endpoint } => self.invoke_http(agent, endpoint, request).await,
            Connection::Local { handler } => self.invoke_local(agent, *handler, request),
        };
        if let Some(err) = response.error() {
            warn!(agent = %agent.name, error_type = %err.kind, message = %err.message, "Agent returned error");
        }
        response
    }
}

/// Runs a local handler, turning both returned errors and panics into a message.
fn run_guarded<F>(f: F) -> Result<WorkerOutput, String>
where
    F: FnOnce() -> Result<WorkerOutput, String>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("handler panicked: {}", detail))
        }
    }
}

/// Reads the body chunk by chunk, giving up once it grows past `limit`.
async fn read_body(mut response: reqwest::Response, limit: usize) -> Result<String, (ErrorKind, String)> {
    let too_large = || (ErrorKind::BadResponse, format!("response body exceeds {} bytes", limit));
    if response.content_length().map_or(false, |len| len > limit as u64) {
        return Err(too_large());
    }
    let mut body = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if body.len() + chunk.len() > limit {
                    return Err(too_large());
                }
                body.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => {
                return Err((classify_transport(&e), format!("failed to read response body: {}", e)))
            }
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn classify_transport(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_connect() {
        ErrorKind::ConnectionError
    } else {
        ErrorKind::TransportError
    }
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(BODY_PREVIEW);
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;
    use switchboard_core::{AgentConfig, RequestContext, WorkerInput};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/run", addr)
    }

    fn setup(endpoint: &str, timeout_ms: u64) -> (AgentRegistry, AgentInvoker) {
        let mut cfg = AgentConfig::http("remote", endpoint, &["general"]);
        cfg.timeout_ms = timeout_ms;
        let registry = AgentRegistry::from_configs(&[cfg, AgentConfig::local("echo", "echo", &[])]).unwrap();
        let invoker = AgentInvoker::new(&registry, &NetworkConfig::default());
        (registry, invoker)
    }

    fn request(agent: &str, text: &str) -> WorkerRequest {
        WorkerRequest::new(agent, "general", WorkerInput::text(text), RequestContext::new(None, None))
    }

    async fn call(endpoint: &str, timeout_ms: u64) -> WorkerResponse {
        let (registry, invoker) = setup(endpoint, timeout_ms);
        let agent = registry.lookup("remote").unwrap();
        invoker.invoke(agent, &request("remote", "hi")).await
    }

    fn kind(resp: &WorkerResponse) -> ErrorKind {
        resp.error().map(|e| e.kind.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_http_success_echoes_handshake() {
        let endpoint = spawn(Router::new().route(
            "/run",
            post(|Json(req): Json<Value>| async move {
                Json(json!({
                    "request_id": req["request_id"],
                    "agent_name": req["agent_name"],
                    "status": "success",
                    "output": {"result": req["input"]["text"], "confidence": 0.9},
                    "error": null
                }))
            }),
        ))
        .await;
        let resp = call(&endpoint, 2000).await;
        assert!(resp.is_success());
        assert_eq!(resp.output().unwrap().result, json!("hi"));
        assert_eq!(resp.agent_name, "remote");
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let endpoint = spawn(Router::new().route(
            "/run",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let resp = call(&endpoint, 2000).await;
        assert_eq!(kind(&resp), ErrorKind::HttpStatus);
        assert!(resp.error().unwrap().message.contains("503"));
    }

    #[tokio::test]
    async fn test_both_output_and_error_is_bad_response() {
        let endpoint = spawn(Router::new().route(
            "/run",
            post(|| async {
                Json(json!({
                    "status": "success",
                    "output": {"result": "x"},
                    "error": {"type": "oops", "message": "both"}
                }))
            }),
        ))
        .await;
        let resp = call(&endpoint, 2000).await;
        assert_eq!(kind(&resp), ErrorKind::BadResponse);
    }

    #[tokio::test]
    async fn test_non_json_body_is_bad_response() {
        let endpoint = spawn(Router::new().route("/run", post(|| async { "<html>" }))).await;
        let resp = call(&endpoint, 2000).await;
        assert_eq!(kind(&resp), ErrorKind::BadResponse);
    }

    #[tokio::test]
    async fn test_agent_error_type_is_preserved() {
        let endpoint = spawn(Router::new().route(
            "/run",
            post(|| async {
                Json(json!({
                    "status": "error",
                    "output": null,
                    "error": {"type": "quota_exceeded", "message": "try later"}
                }))
            }),
        ))
        .await;
        let resp = call(&endpoint, 2000).await;
        assert_eq!(kind(&resp), ErrorKind::Other("quota_exceeded".to_string()));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let resp = call(&format!("http://{}/run", addr), 2000).await;
        assert_eq!(kind(&resp), ErrorKind::ConnectionError);
    }

    #[tokio::test]
    async fn test_slow_agent_times_out() {
        let endpoint = spawn(Router::new().route(
            "/run",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let resp = call(&endpoint, 100).await;
        assert_eq!(kind(&resp), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_oversized_body_is_bad_response() {
        let endpoint = spawn(Router::new().route(
            "/run",
            post(|| async { "x".repeat(4096) }),
        ))
        .await;
        let (registry, invoker) = setup(&endpoint, 2000);
        let invoker = invoker.with_max_body_bytes(1024);
        let agent = registry.lookup("remote").unwrap();
        let resp = invoker.invoke(agent, &request("remote", "hi")).await;
        assert_eq!(kind(&resp), ErrorKind::BadResponse);
        assert!(resp.error().unwrap().message.contains("exceeds 1024 bytes"));
    }

    #[tokio::test]
    async fn test_local_handler() {
        let (registry, invoker) = setup("http://127.0.0.1:1/run", 1000);
        let agent = registry.lookup("echo").unwrap();
        let req = request("echo", "ping");
        let resp = invoker.invoke(agent, &req).await;
        assert_eq!(resp.output().unwrap().result, json!("ping"));
        assert_eq!(resp.request_id, req.request_id);
    }

    #[test]
    fn test_run_guarded_catches_panics() {
        let err = run_guarded(|| panic!("boom")).unwrap_err();
        assert_eq!(err, "handler panicked: boom");
        let err = run_guarded(|| Err("bad input".to_string())).unwrap_err();
        assert_eq!(err, "bad input");
    }
}
