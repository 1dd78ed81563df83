use super::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub transcriber: String,
    pub generator: String,
    pub synthesizer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint, names the configured engines
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            transcriber: state.engines.transcriber.name().to_string(),
            generator: state.engines.generator.name().to_string(),
            synthesizer: state
                .engines
                .synthesizer
                .as_ref()
                .map(|s| s.name().to_string()),
        }),
    )
}

/// GET /sessions
/// List connected voice sessions
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.snapshots().await))
}

/// GET /sessions/:session_id
/// State and epoch of one session
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let snapshot = {
        let sessions = state.sessions.read().await;
        sessions.get(&session_id).map(|rx| rx.borrow().clone())
    };

    match snapshot {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}
