//! Axum route handlers for the bloodlink trigger surface.
//!
//! # Routes
//!
//! - `GET  /health`                  — liveness probe
//! - `POST /triggers/low-inventory`  — hospital, group and units needed
//! - `POST /triggers/emergency`      — manual emergency or `{"type": "auto"}`
//! - `POST /triggers/donor-accepted` — donor accepted a request
//! - `POST /triggers/donor-declined` — donor declined a request
//! - `POST /triggers/location`       — donor position update
//! - `POST /triggers/arrival`        — donor reached the hospital
//! - `POST /transfers/:id/accept`    — provider accepts a transfer
//! - `POST /transfers/:id/reject`    — provider rejects a transfer
//! - `POST /monitor/run`             — inventory scan of every active hospital
//! - `POST /transfers/sweep`         — nearby-stock sweep
//! - `POST /emergencies/scan`        — automatic emergency scan
//! - `POST /routes/refresh`          — recompute active routes
//! - `POST /shortages/prepare`       — shortage prediction and preparation
//!
//! Every workflow route answers with the [`WorkflowReport`] JSON. A failed
//! workflow keeps the same body and maps its failure kind to the status.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::{
    ArrivalTrigger, DonorAcceptedTrigger, DonorDeclinedTrigger, EmergencyTrigger, FailureKind,
    LocationTrigger, LowInventoryTrigger, Orchestrator, TransferDecision, WorkflowOutcome,
    WorkflowReport,
};

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/triggers/low-inventory", post(low_inventory_handler))
        .route("/triggers/emergency", post(emergency_handler))
        .route("/triggers/donor-accepted", post(donor_accepted_handler))
        .route("/triggers/donor-declined", post(donor_declined_handler))
        .route("/triggers/location", post(location_handler))
        .route("/triggers/arrival", post(arrival_handler))
        .route("/transfers/sweep", post(sweep_handler))
        .route("/transfers/:id/accept", post(accept_transfer_handler))
        .route("/transfers/:id/reject", post(reject_transfer_handler))
        .route("/monitor/run", post(monitor_handler))
        .route("/emergencies/scan", post(emergency_scan_handler))
        .route("/routes/refresh", post(route_refresh_handler))
        .route("/shortages/prepare", post(shortage_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn status_for(report: &WorkflowReport) -> StatusCode {
    match &report.outcome {
        WorkflowOutcome::Failed { kind, .. } => match kind {
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::InsufficientStock
            | FailureKind::AlreadyProcessed
            | FailureKind::InvalidState => StatusCode::CONFLICT,
            FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
            FailureKind::Upstream => StatusCode::BAD_GATEWAY,
            FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::OK,
    }
}

fn respond(report: WorkflowReport) -> (StatusCode, Json<WorkflowReport>) {
    (status_for(&report), Json(report))
}

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "bloodlink",
    }))
}

async fn low_inventory_handler(
    State(state): State<AppState>,
    Json(trigger): Json<LowInventoryTrigger>,
) -> impl IntoResponse {
    respond(state.orchestrator.handle_low_inventory(trigger).await)
}

async fn emergency_handler(
    State(state): State<AppState>,
    Json(trigger): Json<EmergencyTrigger>,
) -> impl IntoResponse {
    respond(state.orchestrator.handle_emergency(trigger).await)
}

async fn donor_accepted_handler(
    State(state): State<AppState>,
    Json(trigger): Json<DonorAcceptedTrigger>,
) -> impl IntoResponse {
    respond(state.orchestrator.handle_donor_accepted(trigger).await)
}

async fn donor_declined_handler(
    State(state): State<AppState>,
    Json(trigger): Json<DonorDeclinedTrigger>,
) -> impl IntoResponse {
    respond(state.orchestrator.handle_donor_declined(trigger).await)
}

async fn location_handler(
    State(state): State<AppState>,
    Json(trigger): Json<LocationTrigger>,
) -> impl IntoResponse {
    respond(state.orchestrator.handle_location_update(trigger).await)
}

async fn arrival_handler(
    State(state): State<AppState>,
    Json(trigger): Json<ArrivalTrigger>,
) -> impl IntoResponse {
    respond(state.orchestrator.handle_arrival(trigger).await)
}

/// POST /transfers/:id/accept — the body (`{"message": ...}`) is optional.
async fn accept_transfer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TransferDecision>>,
) -> impl IntoResponse {
    let decision = body.map(|Json(d)| d).unwrap_or_default();
    respond(state.orchestrator.accept_transfer(&id, decision).await)
}

async fn reject_transfer_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TransferDecision>>,
) -> impl IntoResponse {
    let decision = body.map(|Json(d)| d).unwrap_or_default();
    respond(state.orchestrator.reject_transfer(&id, decision).await)
}

async fn monitor_handler(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.orchestrator.run_inventory_scan().await)
}

async fn sweep_handler(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.orchestrator.sweep_transfers().await)
}

async fn emergency_scan_handler(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.orchestrator.scan_emergencies().await)
}

async fn route_refresh_handler(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.orchestrator.refresh_routes().await)
}

async fn shortage_handler(State(state): State<AppState>) -> impl IntoResponse {
    respond(state.orchestrator.predict_and_prepare().await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
