//! 部署管理 API
//!
//! 包含 /deploy, /deployments/* 端点

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::{DeployTask, DeploymentRequest};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::services;
use crate::state::{AppState, CreateRejected};

/// 部署请求参数
#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    /// 是否等待部署结束再返回，默认 true
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

/// 部署响应
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    pub status: String,
    pub stream_url: String,
}

/// 任务历史查询参数
#[derive(Debug, Deserialize)]
pub struct TaskHistoryQuery {
    /// 返回数量限制，默认 20
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// 状态过滤 (success, failed, running)
    pub status: Option<String>,
}

fn default_limit() -> usize {
    20
}

/// 任务历史响应
#[derive(Debug, Serialize)]
pub struct TaskHistoryResponse {
    pub tasks: Vec<DeployTask>,
    pub total: usize,
}

/// 取消响应
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub deployment_id: String,
    pub cancelled: bool,
}

/// 创建部署管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/deployments/recent", get(get_recent_deployments))
        .route("/deployments/:id", get(get_deployment))
        .route("/deployments/:id/events", get(stream_events))
        .route("/deployments/:id/cancel", post(cancel_deployment))
}

fn stream_url(deployment_id: &str) -> String {
    format!("/deployments/{}/events", deployment_id)
}

/// 触发部署
///
/// POST /deploy[?wait=false]
/// 需要 API Key
///
/// 默认同步：部署结束后返回 200，或 500 + 单条致命错误信息。
/// 各 VM 的结果只出现在事件流中。
async fn deploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeployQuery>,
    Json(request): Json<DeploymentRequest>,
) -> ApiResult<Response> {
    // 校验资源名、登录用户和服务名，非法时直接拒绝
    request.validate()?;

    let deployment_id = request
        .deployment_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state
        .task_store
        .try_create(DeployTask::new(deployment_id.clone(), request.vms.len()))
        .await
        .map_err(|rejected| match rejected {
            CreateRejected::Duplicate => {
                ApiError::conflict(format!("Deployment '{}' already exists", deployment_id))
            }
            CreateRejected::AtCapacity => ApiError::conflict("Too many active deployments"),
        })?;
    let cancel_token = state.register_running_deploy(&deployment_id).await;

    tracing::info!(
        deployment_id = %deployment_id,
        vms = request.vms.len(),
        wait = query.wait,
        "Deployment accepted"
    );

    if !query.wait {
        let state_clone = state.clone();
        let id_clone = deployment_id.clone();
        tokio::spawn(async move {
            // 结果已记录在任务存储和事件流中
            let _ = services::deploy::execute(state_clone, id_clone, request, cancel_token).await;
        });

        let response = DeployResponse {
            stream_url: stream_url(&deployment_id),
            deployment_id,
            status: "running".to_string(),
        };
        return Ok((StatusCode::ACCEPTED, Json(response)).into_response());
    }

    services::deploy::execute(state, deployment_id.clone(), request, cancel_token).await?;

    Ok(Json(DeployResponse {
        stream_url: stream_url(&deployment_id),
        deployment_id,
        status: "success".to_string(),
    })
    .into_response())
}

/// 获取部署状态
///
/// GET /deployments/:id
/// 无需认证
async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .task_store
        .get_any(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Deployment '{}'", id)))?;

    Ok(Json(task))
}

/// 获取最近的部署
///
/// GET /deployments/recent
/// 无需认证
async fn get_recent_deployments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskHistoryQuery>,
) -> impl IntoResponse {
    let mut tasks: Vec<DeployTask> = state
        .task_store
        .get_all()
        .await
        .into_iter()
        .filter(|task| {
            query
                .status
                .as_deref()
                .map_or(true, |s| task.status.as_str() == s)
        })
        .collect();
    tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    tasks.extend(
        state
            .task_store
            .get_history(query.limit, query.status.as_deref())
            .await,
    );
    tasks.truncate(query.limit);

    let total = tasks.len();
    Json(TaskHistoryResponse { tasks, total })
}

/// 事件流
///
/// GET /deployments/:id/events
/// 无需认证
///
/// 可以在部署开始前订阅（配合请求体中的 deployment_id）
async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let mut rx = state
        .event_hub
        .subscribe_or_create(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Deployment '{}' is already completed", id)))?;

    let state_clone = state.clone();
    let id_clone = id.clone();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(Event::default().data(json));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(deployment_id = %id_clone, lagged = n, "Event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // 发送结束事件
                    if let Some(task) = state_clone.task_store.get_any(&id_clone).await {
                        yield Ok(Event::default().event("complete").data(
                            serde_json::json!({
                                "status": task.status.as_str(),
                                "error": task.error,
                            }).to_string()
                        ));
                    }
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// 取消部署
///
/// POST /deployments/:id/cancel
/// 需要 API Key
async fn cancel_deployment(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.cancel_deploy(&id).await {
        return Err(ApiError::not_found(format!("Running deployment '{}'", id)));
    }

    tracing::info!(deployment_id = %id, "Cancellation requested");
    Ok(Json(CancelResponse {
        deployment_id: id,
        cancelled: true,
    }))
}
