use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use dotenvy::dotenv;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use orchestrator_core::domain::{Assessment, RateLimitScope};
use orchestrator_core::failover::FailoverTrigger;
use orchestrator_core::platform::{Platform, PlatformConfig, PlatformContext};
use orchestrator_core::progress_gateway::ClientFrame;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file layered over defaults and `ORCHESTRATOR__*` env vars.
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP/WebSocket bind port.
    #[arg(short, long, default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let config = PlatformConfig::load_from_path(args.config)?;
    let runtime = Platform::new(config).start().await?;
    let context = runtime.context();

    let app = build_router(context.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "orchestrator api listening");

    let shutdown = context.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = shutdown.cancelled() => {}
            }
            info!("shutting down api server");
        })
        .await?;

    runtime.shutdown().await?;
    Ok(())
}

fn build_router(context: PlatformContext) -> Router {
    Router::new()
        .route("/workflows", post(start_workflow).get(list_not_supported))
        .route("/workflows/:id", get(get_workflow))
        .route("/workflows/:id/cancel", post(cancel_workflow))
        .route("/workflows/:id/resume", post(resume_workflow))
        .route("/health/system", get(system_health))
        .route("/health/component/:name", get(component_health))
        .route("/health/component/:name/check", post(run_component_check))
        .route("/failover/status/:service", get(failover_status))
        .route("/failover/service/:service/trigger", post(trigger_failover))
        .route("/circuit-breakers", get(circuit_breaker_snapshot))
        .route("/circuit-breakers/:service/reset", post(reset_circuit_breaker))
        .route("/rate-limit/:service/status", post(rate_limit_status))
        .route("/rate-limit/:service/reset", post(reset_rate_limit))
        .route("/ws", get(websocket_upgrade))
        .with_state(context)
}

async fn list_not_supported() -> impl IntoResponse {
    (axum::http::StatusCode::METHOD_NOT_ALLOWED, "list all workflows is not exposed; track by id")
}

#[derive(Deserialize)]
struct StartWorkflowRequest {
    principal_id: String,
    #[serde(default)]
    business_requirements: HashMap<String, String>,
    #[serde(default)]
    technical_requirements: HashMap<String, String>,
}

async fn start_workflow(
    State(ctx): State<PlatformContext>,
    Json(body): Json<StartWorkflowRequest>,
) -> impl IntoResponse {
    let requirements = body
        .business_requirements
        .iter()
        .chain(body.technical_requirements.iter())
        .map(|(k, v)| (k.clone(), v.clone()));
    if let Err(errors) = orchestrator_core::utils::validate_assessment_request(&body.principal_id, requirements) {
        let message = errors.into_iter().map(|e| format!("{}: {}", e.field, e.message)).collect::<Vec<_>>().join("; ");
        return error_response(&orchestrator_core::CoreError::validation(message));
    }

    let mut assessment = Assessment::new(body.principal_id, ctx.agents().names().len().max(1) as u32);
    assessment.business_requirements = body.business_requirements;
    assessment.technical_requirements = body.technical_requirements;

    match ctx.workflow_engine().start(assessment).await {
        Ok(workflow_id) => Json(json!({ "workflow_id": workflow_id })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_workflow(State(ctx): State<PlatformContext>, Path(id): Path<String>) -> impl IntoResponse {
    match ctx.store().get_workflow_state(&id).await {
        Ok(state) => Json(state).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn cancel_workflow(State(ctx): State<PlatformContext>, Path(id): Path<String>) -> impl IntoResponse {
    match ctx.workflow_engine().cancel(&id).await {
        Ok(()) => Json(json!({ "cancelled": true })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn resume_workflow(State(ctx): State<PlatformContext>, Path(id): Path<String>) -> impl IntoResponse {
    match ctx.workflow_engine().resume(&id).await {
        Ok(()) => Json(json!({ "resumed": true })).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn system_health(State(ctx): State<PlatformContext>) -> impl IntoResponse {
    let status = ctx.health().system_status();
    Json(json!({ "status": status }))
}

async fn component_health(State(ctx): State<PlatformContext>, Path(name): Path<String>) -> impl IntoResponse {
    let snapshot = ctx.health().snapshot();
    match snapshot.get(&name) {
        Some(component) => Json(component).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "unknown component").into_response(),
    }
}

async fn run_component_check(State(ctx): State<PlatformContext>, Path(name): Path<String>) -> impl IntoResponse {
    match ctx.health().check_component(&name).await {
        Some(result) => Json(result).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, "unknown component").into_response(),
    }
}

async fn failover_status(State(ctx): State<PlatformContext>, Path(service): Path<String>) -> impl IntoResponse {
    match ctx.failover().current_endpoint(&service) {
        Ok(endpoint) => Json(json!({
            "endpoint": endpoint,
            "history": ctx.failover().history(&service),
        }))
        .into_response(),
        Err(err) => error_response(&err),
    }
}

async fn trigger_failover(State(ctx): State<PlatformContext>, Path(service): Path<String>) -> impl IntoResponse {
    match ctx.failover().trigger_failover(&service, FailoverTrigger::Manual) {
        Ok(endpoint) => Json(endpoint).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn circuit_breaker_snapshot(State(ctx): State<PlatformContext>) -> impl IntoResponse {
    Json(ctx.circuit_breaker().snapshot().await)
}

async fn reset_circuit_breaker(State(ctx): State<PlatformContext>, Path(service): Path<String>) -> impl IntoResponse {
    ctx.circuit_breaker().reset(&service).await;
    Json(json!({ "reset": true }))
}

#[derive(Deserialize)]
struct RateLimitQuery {
    identifier: String,
    #[serde(default)]
    scope: Option<String>,
}

async fn rate_limit_status(
    State(ctx): State<PlatformContext>,
    Path(service): Path<String>,
    Json(query): Json<RateLimitQuery>,
) -> impl IntoResponse {
    let scope = parse_scope(query.scope.as_deref());
    match ctx.rate_limiter().check_limit(&service, scope, Some(query.identifier.as_str())).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn reset_rate_limit(
    State(ctx): State<PlatformContext>,
    Path(service): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let scope = parse_scope(query.get("scope").map(String::as_str));
    let identifier = query.get("identifier").map(String::as_str);
    match ctx.rate_limiter().reset(&service, scope, identifier).await {
        Ok(()) => Json(json!({ "reset": true })).into_response(),
        Err(err) => error_response(&err),
    }
}

fn parse_scope(raw: Option<&str>) -> RateLimitScope {
    match raw {
        Some("per_user") => RateLimitScope::PerUser,
        Some("per_ip") => RateLimitScope::PerIp,
        Some("global") => RateLimitScope::Global,
        _ => RateLimitScope::PerService,
    }
}

#[derive(Deserialize)]
struct WsQuery {
    principal_id: String,
    assessment_id: Option<String>,
}

async fn websocket_upgrade(
    State(ctx): State<PlatformContext>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, query.principal_id, query.assessment_id))
}

async fn handle_socket(socket: WebSocket, ctx: PlatformContext, principal_id: String, assessment_id: Option<String>) {
    let gateway = ctx.gateway();
    let (session_id, mut push_rx) = gateway.connect(principal_id, assessment_id);
    let (mut sender, mut receiver) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(frame) = push_rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Text(text) = message {
            match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => gateway.handle_client_frame(session_id, frame),
                Err(err) => warn!(%err, "dropping malformed client frame"),
            }
        }
    }

    forward.abort();
    gateway.disconnect(session_id);
}

fn error_response(err: &orchestrator_core::CoreError) -> axum::response::Response {
    let status = match err {
        orchestrator_core::CoreError::NotFound { .. } => axum::http::StatusCode::NOT_FOUND,
        orchestrator_core::CoreError::ValidationError { .. } => axum::http::StatusCode::BAD_REQUEST,
        orchestrator_core::CoreError::RateLimitExceeded { .. } => axum::http::StatusCode::TOO_MANY_REQUESTS,
        orchestrator_core::CoreError::CircuitBreakerOpen { .. } => axum::http::StatusCode::SERVICE_UNAVAILABLE,
        orchestrator_core::CoreError::Conflict { .. } => axum::http::StatusCode::CONFLICT,
        _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

use futures::{SinkExt, StreamExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parsing_defaults_to_per_service() {
        assert_eq!(parse_scope(None), RateLimitScope::PerService);
        assert_eq!(parse_scope(Some("global")), RateLimitScope::Global);
    }
}
