//! 健康检查 API
//!
//! 包含 /health, /status 端点

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    strategy: &'static str,
    work_dir: String,
    auth_enabled: bool,
    active_deploys: usize,
    active_deployments: Vec<String>,
    active_streams: usize,
    tracked_tasks: usize,
    history_size: usize,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(health_check))
}

/// 健康检查 - 返回状态、版本、运行时间等信息
///
/// GET /health, GET /status
/// 无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_deployments: Vec<String> = {
        let running = state.running.read().await;
        running.keys().cloned().collect()
    };

    let now = chrono::Utc::now();

    Json(HealthResponse {
        status: "ok",
        service: "infraflow-agent",
        version: VERSION,
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        strategy: state.config.strategy.as_str(),
        work_dir: state.config.work_dir.display().to_string(),
        auth_enabled: state.config.api_key.is_some(),
        active_deploys: active_deployments.len(),
        active_deployments,
        active_streams: state.event_hub.active_count().await,
        tracked_tasks: state.task_store.active_count().await,
        history_size: state.task_store.history_count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvConfig;

    #[tokio::test]
    async fn test_health_reports_running_deployments() {
        let state = Arc::new(AppState::new(EnvConfig::default()));
        state.register_running_deploy("dep-1").await;

        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_deploys"], 1);
        assert_eq!(body["strategy"], "ansible");
        assert_eq!(body["active_deployments"][0], "dep-1");
    }
}
