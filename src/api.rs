//! Operator-facing HTTP endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::{AppState, ChatMode};

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Whether the inference backend answered the reachability probe
    pub available: bool,
    /// Model completions are requested with
    pub model: String,
    /// Models the backend has pulled; empty when unreachable
    pub models: Vec<String>,
    /// Currently open chat connections
    pub connections: usize,
    /// Active deployment variant of the chat endpoint
    pub mode: ChatMode,
}

/// GET /api/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let available = state.llm.is_available().await;
    let models = state.llm.list_models().await;

    Json(StatusResponse {
        available,
        model: state.llm.model().to_string(),
        models,
        connections: state.registry.connection_count().await,
        mode: state.config.mode,
    })
}

/// GET /, trivial liveness check
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Hello, World!" }))
}
