use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use switchboard_core::config::NetworkConfig;
use switchboard_core::Config;
use switchboard_providers::create_provider;
use switchboard_supervisor::{HealthChecker, QueryRequest, Supervisor, SupervisorError};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::agent_summary;

#[derive(Clone)]
struct GatewayState {
    supervisor: Arc<Supervisor>,
    model: String,
    model_configured: bool,
    network: NetworkConfig,
    started: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    agents: usize,
    model: String,
    model_configured: bool,
    uptime_secs: u64,
    version: String,
}

async fn handle_query(
    State(state): State<GatewayState>,
    Json(req): Json<QueryRequest>,
) -> Response {
    if req.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SupervisorError::EmptyQuery.into_response()),
        )
            .into_response();
    }

    let supervisor = state.supervisor.clone();
    match tokio::spawn(async move { supervisor.handle(req).await }).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => {
            error!(error = %e, "Query task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SupervisorError::Internal(e.to_string()).into_response()),
            )
                .into_response()
        }
    }
}

async fn handle_agents(State(state): State<GatewayState>) -> impl IntoResponse {
    let agents: Vec<_> = state
        .supervisor
        .registry()
        .all()
        .iter()
        .map(agent_summary)
        .collect();
    Json(serde_json::json!({ "agents": agents }))
}

async fn handle_agents_health(State(state): State<GatewayState>) -> impl IntoResponse {
    let report = HealthChecker::check_all(state.supervisor.registry(), &state.network).await;
    let healthy = report.iter().all(|h| h.healthy);
    Json(serde_json::json!({ "healthy": healthy, "agents": report }))
}

async fn handle_health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        agents: state.supervisor.registry().len(),
        model: state.model.clone(),
        model_configured: state.model_configured,
        uptime_secs: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive().allow_credentials(false);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

fn build_router(state: GatewayState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/v1/query", post(handle_query))
        .route("/v1/agents", get(handle_agents))
        .route("/v1/agents/health", get(handle_agents_health))
        .route("/v1/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(allowed_origins))
        .with_state(state)
}

fn gateway_state(config: &Config) -> anyhow::Result<GatewayState> {
    let supervisor = Arc::new(Supervisor::from_config(config)?);
    Ok(GatewayState {
        supervisor,
        model: config.llm.model.clone(),
        model_configured: create_provider(config).is_some(),
        network: config.network.clone(),
        started: Instant::now(),
    })
}

pub async fn run(config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);

    let state = gateway_state(&config)?;
    if !state.model_configured {
        warn!("No model provider configured; using keyword routing and stitched answers");
    }
    info!(
        agents = state.supervisor.registry().len(),
        model = %state.model,
        "Agent registry loaded"
    );

    let app = build_router(state, &config.gateway.allowed_origins);
    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}
