//! REST API for the assignment engine
//!
//! Thin adapter over the engine's exposed contract; all assignment
//! semantics live below this layer. The web request layer proper
//! (authentication, sessions) sits in front of this service.

pub mod handlers;
pub mod sse;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Assignment engine
    pub engine: Arc<Engine>,
    /// Server port
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(health_check))

        // API v1 routes
        .nest("/api/v1", Router::new()
            // Assignment endpoints
            .route("/assignments/next", post(handlers::next_assignment))
            .route("/assignments/outcome", post(handlers::record_outcome))

            // Read-only monitoring endpoints
            .route("/items/:item_id", get(handlers::get_item))
            .route("/users/:user_id/progress", get(handlers::get_progress))
            .route("/metrics", get(handlers::get_metrics))

            // Inbound signal updates (fire-and-forget)
            .route("/signals/expertise", post(handlers::ingest_expertise))
            .route("/signals/clusters", post(handlers::ingest_clusters))
            .route("/signals/uncertainty", post(handlers::ingest_uncertainty))
            .route("/signals/llm-confidence", post(handlers::ingest_llm_confidence))

            // SSE events
            .route("/events", get(sse::event_stream))
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "corvee-ae",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "strategy": state.engine.active_strategy_name(),
        "items": state.engine.item_count(),
    }))
}
