//! API request handlers

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::AppState;
use crate::engine::metrics::MetricsSnapshot;
use crate::engine::store::ItemView;
use crate::engine::{Outcome, UserProgress};

type ApiError = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// ========================================
// Assignments
// ========================================

#[derive(Debug, Deserialize)]
pub struct NextRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct NextResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
}

/// POST /api/v1/assignments/next
///
/// NoWork is an expected terminal state, reported as `found: false` rather
/// than an error status.
pub async fn next_assignment(
    State(state): State<AppState>,
    Json(req): Json<NextRequest>,
) -> Json<NextResponse> {
    match state.engine.next_instance(req.user_id) {
        Some(item_id) => Json(NextResponse {
            found: true,
            item_id: Some(item_id),
        }),
        None => Json(NextResponse {
            found: false,
            item_id: None,
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Annotated,
    Abandoned,
}

#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub user_id: Uuid,
    pub item_id: Uuid,
    pub outcome: OutcomeKind,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// POST /api/v1/assignments/outcome
pub async fn record_outcome(
    State(state): State<AppState>,
    Json(req): Json<OutcomeRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = match req.outcome {
        OutcomeKind::Annotated => Outcome::Annotated { labels: req.labels },
        OutcomeKind::Abandoned => Outcome::Abandoned,
    };
    state
        .engine
        .record_outcome(req.user_id, req.item_id, outcome)
        .map_err(|e| error_response(StatusCode::CONFLICT, e.to_string()))?;
    Ok(Json(json!({ "status": "ok" })))
}

// ========================================
// Monitoring
// ========================================

/// GET /api/v1/items/:item_id
pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ItemView>, ApiError> {
    state
        .engine
        .item_summary(item_id)
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("unknown item {item_id}")))
}

/// GET /api/v1/users/:user_id/progress
pub async fn get_progress(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Json<UserProgress> {
    Json(state.engine.user_progress(user_id))
}

/// GET /api/v1/metrics
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics_snapshot())
}

// ========================================
// Inbound signals
// ========================================

#[derive(Debug, Deserialize)]
pub struct ExpertiseSignal {
    pub user_id: Uuid,
    pub scores: HashMap<String, f64>,
}

/// POST /api/v1/signals/expertise
pub async fn ingest_expertise(
    State(state): State<AppState>,
    Json(signal): Json<ExpertiseSignal>,
) -> (StatusCode, Json<Value>) {
    state
        .engine
        .on_expertise_recomputed(signal.user_id, signal.scores);
    accepted()
}

#[derive(Debug, Deserialize)]
pub struct ClustersSignal {
    pub assignments: HashMap<Uuid, u32>,
    pub generation: u64,
}

/// POST /api/v1/signals/clusters
pub async fn ingest_clusters(
    State(state): State<AppState>,
    Json(signal): Json<ClustersSignal>,
) -> (StatusCode, Json<Value>) {
    state
        .engine
        .on_cluster_assignments_updated(signal.assignments, signal.generation);
    accepted()
}

#[derive(Debug, Deserialize)]
pub struct ScoresSignal {
    pub scores: HashMap<Uuid, f64>,
}

/// POST /api/v1/signals/uncertainty
pub async fn ingest_uncertainty(
    State(state): State<AppState>,
    Json(signal): Json<ScoresSignal>,
) -> (StatusCode, Json<Value>) {
    state.engine.on_uncertainty_scores_updated(signal.scores);
    accepted()
}

/// POST /api/v1/signals/llm-confidence
pub async fn ingest_llm_confidence(
    State(state): State<AppState>,
    Json(signal): Json<ScoresSignal>,
) -> (StatusCode, Json<Value>) {
    state.engine.on_llm_confidence_updated(signal.scores);
    accepted()
}

fn accepted() -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}
