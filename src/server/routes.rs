//! Axum route handlers for the agent core's HTTP control surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;

use crate::core::AgentCore;
use crate::types::ScheduleType;

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<AgentCore>,
}

impl AppState {
    pub fn new(core: Arc<AgentCore>) -> Self {
        Self { core }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/missions/{id}", get(get_mission_handler).delete(cancel_mission_handler))
        .route("/cron/jobs", post(create_job_handler).get(list_jobs_handler))
        .route("/cron/jobs/{id}", delete(delete_job_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "agentcore",
    }))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponseBody {
    response: String,
    mission_id: Option<String>,
    tier: String,
    escalation_id: Option<String>,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponseBody>, (StatusCode, Json<Value>)> {
    let outcome = state.core.pipeline.chat(&request.message).await.map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
    })?;

    Ok(Json(ChatResponseBody {
        response: outcome.response,
        mission_id: outcome.mission_id,
        tier: format!("{:?}", outcome.tier),
        escalation_id: outcome.escalation_id,
    }))
}

async fn get_mission_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let mission = state.core.scheduler.get_mission(&id).await.map_err(|err| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
    })?;
    Ok(Json(serde_json::to_value(mission).unwrap_or(Value::Null)))
}

async fn cancel_mission_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    state.core.scheduler.cancel_mission(&id).await.map_err(|err| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct CreateJobRequest {
    name: String,
    schedule: ScheduleType,
    agent_id: String,
    #[serde(default)]
    payload: Value,
}

async fn create_job_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let job = state
        .core
        .cron
        .create_job(request.name, request.schedule, request.agent_id, request.payload)
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
        })?;
    Ok(Json(serde_json::to_value(job).unwrap_or(Value::Null)))
}

async fn list_jobs_handler(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let jobs = state.core.cron.list_jobs().map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
    })?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

async fn delete_job_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    state.core.cron.delete_job(&id).map_err(|err| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_config_yaml() -> &'static str {
        r#"
database_path: ":memory:"
inference:
  default_model: chat-default
  backends:
    - name: local
      type: open_ai_compat
      endpoint: "http://127.0.0.1:1234"
  models:
    chat-default:
      backend: local
      model_id: demo-model
      tier: always_loaded
    planner:
      backend: local
      model_id: demo-model
      tier: always_loaded
"#
    }

    fn test_state() -> AppState {
        let config = crate::config::Config::from_yaml_str(test_config_yaml()).unwrap();
        let core = Arc::new(AgentCore::new(config).unwrap());
        AppState::new(core)
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let app = app_router(test_state());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_mission_returns_404() {
        let app = app_router(test_state());
        let request = Request::builder()
            .uri("/missions/does-not-exist")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
