//! HTTP endpoints
//!
//! REST surface over the facade: session lifecycle, chat, configuration
//! and health. Error kinds map to statuses here and nowhere else.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_core::{Error, Turn, TurnRole};

use crate::service::ChatConfigPatch;
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session lifecycle
        .route("/sessions", post(create_session))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/extend", post(extend_session))
        .route("/sessions/:id/last-run", get(last_run))
        // Chat
        .route("/chat", post(chat))
        // Configuration
        .route("/chat-config", get(get_chat_config))
        .route("/chat-config", post(update_chat_config))
        // Health
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Error body with a stable machine-readable kind.
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    detail: String,
}

impl ApiError {
    /// The `/chat` mapping: an expired or unknown session is 410 Gone.
    fn for_chat(error: Error) -> Self {
        let status = match &error {
            Error::SessionNotFound(_) => StatusCode::GONE,
            Error::RetrievalBackendFailure(_)
            | Error::GenerationBackendFailure(_)
            | Error::StructuredResponseMalformed(_) => StatusCode::BAD_GATEWAY,
            Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::ConfigurationInvalid(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            kind: error.kind(),
            detail: error.to_string(),
        }
    }

    fn not_found(id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "session_not_found",
            detail: format!("session not found or expired: {id}"),
        }
    }

    fn invalid(error: Error) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind,
            "detail": self.detail,
        });
        (self.status, Json(body)).into_response()
    }
}

// ---- Sessions ----

async fn create_session(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.sessions.create().map_err(|e| ApiError::invalid(e.into()))?;
    let now = chrono::Utc::now();
    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "created_at": session.created_at().to_rfc3339(),
        "remaining_time": session.remaining_seconds(now),
        "timeout_minutes": session.timeout_minutes(),
    })))
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.active_infos();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state
        .sessions
        .info(&id)
        .map_err(|_| ApiError::not_found(&id))?;
    Ok(Json(serde_json::to_value(info).unwrap_or_default()))
}

async fn extend_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let remaining = state
        .sessions
        .extend(&id)
        .map_err(|_| ApiError::not_found(&id))?;
    Ok(Json(serde_json::json!({
        "message": "session extended",
        "remaining_time": remaining,
    })))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.sessions.end(&id);
    StatusCode::NO_CONTENT
}

/// Diagnostic snapshot of the session's last retrieval.
async fn last_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .map_err(|_| ApiError::not_found(&id))?;
    let conversation = session.conversation.lock();
    let passages: Vec<serde_json::Value> = conversation
        .last_retrieval
        .iter()
        .map(|p| {
            serde_json::json!({
                "chunk_id": p.chunk,
                "doc_id": p.document.id,
                "rank": p.rank,
                "fused": p.fused,
                "signals": p.signals,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "clarify_count": conversation.clarify_count,
        "pending_question": conversation.pending_question,
        "focus_hint": conversation.focus_hint,
        "chunks": passages,
    })))
}

// ---- Chat ----

#[derive(Debug, Deserialize)]
struct ClientTurn {
    role: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    conversation_history: Option<Vec<ClientTurn>>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
    session_id: String,
    timestamp: String,
    generated_by: String,
    sources: Vec<crate::service::SourceInfo>,
    metrics: serde_json::Value,
}

fn score_or_na(value: Option<f32>) -> serde_json::Value {
    match value {
        Some(v) => serde_json::json!(v),
        None => serde_json::json!("n/a"),
    }
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let history = request.conversation_history.map(|turns| {
        turns
            .into_iter()
            .map(|t| Turn {
                role: if t.role == "user" {
                    TurnRole::User
                } else {
                    TurnRole::Assistant
                },
                text: t.text,
                at: chrono::Utc::now(),
                metadata: None,
            })
            .collect()
    });

    let response = state
        .service
        .ask(request.session_id.as_deref(), &request.message, history)
        .await
        .map_err(ApiError::for_chat)?;

    let artifact = &response.artifact;
    let metrics = serde_json::json!({
        "answer_type": artifact.kind.as_str(),
        "abstained": artifact.abstained,
        "faithfulness": score_or_na(artifact.faithfulness),
        "completeness": score_or_na(artifact.completeness),
        "missing_information": artifact.missing_information,
        "reasoning_notes": artifact.reasoning_notes,
        "clarifying_question": artifact.clarification,
        "cited_chunks": artifact.cited,
        "grounding": artifact.evidence,
        "diagnostics": response.diagnostics,
    });

    Ok(Json(ChatResponse {
        answer: artifact.answer.clone(),
        session_id: response.session_id,
        timestamp: response.timestamp,
        generated_by: response.generated_by,
        sources: response.sources,
        metrics,
    }))
}

// ---- Configuration ----

async fn get_chat_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.service.chat_config())
}

async fn update_chat_config(
    State(state): State<AppState>,
    Json(patch): Json<ChatConfigPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .service
        .update_chat_config(patch)
        .map_err(ApiError::invalid)?;
    Ok(Json(serde_json::json!({
        "message": "configuration updated",
        "config": state.service.chat_config(),
    })))
}

// ---- Health ----

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let index_status = match state.index.count().await {
        Ok(count) => serde_json::json!({"status": "ok", "chunks": count}),
        Err(e) => serde_json::json!({"status": "error", "detail": e.to_string()}),
    };
    let llm_ok = state.llm.is_available().await;
    let healthy = index_status["status"] == "ok" && llm_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "index": index_status,
                "llm": {"status": if llm_ok { "ok" } else { "unreachable" }, "model": state.llm.model_name()},
                "sessions": {"status": "ok", "count": state.sessions.count()},
            },
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_error_statuses_match_kinds() {
        assert_eq!(
            ApiError::for_chat(Error::SessionNotFound("x".into())).status,
            StatusCode::GONE
        );
        assert_eq!(
            ApiError::for_chat(Error::RetrievalBackendFailure("x".into())).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::for_chat(Error::DeadlineExceeded(std::time::Duration::from_secs(60)))
                .status,
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::for_chat(Error::ConfigurationInvalid("x".into())).status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn na_scores_serialize_as_token() {
        assert_eq!(score_or_na(None), serde_json::json!("n/a"));
        assert_eq!(score_or_na(Some(0.5)), serde_json::json!(0.5));
    }
}
