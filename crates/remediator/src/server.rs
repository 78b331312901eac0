//! HTTP ingress.
//!
//! Provides REST API endpoints for:
//! - Health checks and status
//! - Alertmanager webhook intake
//! - Approval decision callbacks from chat cards
//! - Reading and (optionally) writing vetted procedures

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::alert::AlertEnvelope;
use crate::error::RemediationError;
use crate::plan::Procedure;
use crate::types::Decision;
use crate::workflow::RemediationWorkflow;

/// Server state shared across handlers.
pub struct ServerState {
    pub workflow: Arc<RemediationWorkflow>,
}

impl ServerState {
    #[must_use]
    pub fn new(workflow: Arc<RemediationWorkflow>) -> Self {
        Self { workflow }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/alerts", post(alert_handler))
        .route("/api/approval_callback", post(decision_handler))
        .route(
            "/api/procedures/{incident}",
            get(get_procedure_handler).put(put_procedure_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically expire PENDING requests past their approval window.
pub fn spawn_expire_sweep(workflow: Arc<RemediationWorkflow>) -> tokio::task::JoinHandle<()> {
    let period = workflow.policy().sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = workflow.expire_stale().await {
                warn!(error = %e, "Expire sweep failed");
            }
        }
    })
}

/// Start the HTTP server and the expire sweep.
pub async fn run_server(state: Arc<ServerState>, addr: &str) -> Result<()> {
    let sweep = spawn_expire_sweep(Arc::clone(&state.workflow));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Remediation server listening on {addr}");

    let served = axum::serve(listener, app).await;
    sweep.abort();
    served?;

    Ok(())
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    pending_requests: usize,
    vetted_policy: &'static str,
}

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    code: &'static str,
    message: String,
}

/// HTTP status for each workflow condition.
#[must_use]
pub fn status_for(err: &RemediationError) -> StatusCode {
    match err {
        RemediationError::InvalidInput(_) | RemediationError::InvalidPlan(_) => {
            StatusCode::BAD_REQUEST
        }
        RemediationError::AlreadyResolvedOrUnknown => StatusCode::CONFLICT,
        RemediationError::Expired(_) => StatusCode::GONE,
        RemediationError::NoActionableCommands => StatusCode::UNPROCESSABLE_ENTITY,
        RemediationError::AdvisorUnavailable(_) | RemediationError::RepositoryUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RemediationError::Registry(_) | RemediationError::InvalidTransition { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for RemediationError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            status: "error",
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn json_body(payload: Result<Json<Value>, JsonRejection>) -> Result<Value, RemediationError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| RemediationError::InvalidInput(e.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Counts only. Ids are capabilities and commands belong to their cards.
async fn status_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<StatusResponse>, RemediationError> {
    let pending_requests = state.workflow.pending_count().await?;
    Ok(Json(StatusResponse {
        status: "ok",
        pending_requests,
        vetted_policy: state.workflow.policy().vetted_policy.as_str(),
    }))
}

async fn alert_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RemediationError> {
    let envelope: AlertEnvelope = serde_json::from_value(json_body(payload)?)
        .map_err(|e| RemediationError::InvalidInput(format!("invalid alert envelope: {e}")))?;

    info!(alerts = envelope.alerts.len(), receiver = %envelope.receiver, "Received alert envelope");
    let summary = state.workflow.handle_envelope(&envelope).await?;
    Ok(Json(summary).into_response())
}

/// Decision body: `{"decision": "approve" | "reject", "request_id": "..."}`.
///
/// Anything else a card sends along is ignored; the plan is always read
/// from the registry.
async fn decision_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RemediationError> {
    let body = json_body(payload)?;

    let request_id = body
        .get("request_id")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| RemediationError::InvalidInput("request_id is required".to_string()))?;

    let decision: Decision = body
        .get("decision")
        .cloned()
        .ok_or_else(|| RemediationError::InvalidInput("decision is required".to_string()))
        .and_then(|d| {
            serde_json::from_value(d).map_err(|_| {
                RemediationError::InvalidInput(
                    "decision must be \"approve\" or \"reject\"".to_string(),
                )
            })
        })?;

    let outcome = state.workflow.decide(request_id, decision).await?;
    Ok(Json(outcome).into_response())
}

async fn get_procedure_handler(
    State(state): State<Arc<ServerState>>,
    Path(incident): Path<String>,
) -> Result<Response, RemediationError> {
    let body = match state.workflow.procedure(&incident).await? {
        Some(procedure) => json!({ "found": true, "procedure": procedure }),
        None => json!({ "found": false }),
    };
    Ok(Json(body).into_response())
}

async fn put_procedure_handler(
    State(state): State<Arc<ServerState>>,
    Path(incident): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RemediationError> {
    if !state.workflow.policy().allow_procedure_writes {
        let body = ErrorResponse {
            status: "error",
            code: "forbidden",
            message: "procedure writes are disabled".to_string(),
        };
        return Ok((StatusCode::FORBIDDEN, Json(body)).into_response());
    }

    let procedure = Procedure::from_document(json_body(payload)?)?;
    state.workflow.save_procedure(&incident, &procedure).await?;
    let body = json!({ "status": "saved", "incident": incident, "procedure": procedure });
    Ok(Json(body).into_response())
}
