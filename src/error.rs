//! 统一错误处理
//!
//! - `DeployError`: 部署流水线错误分类（配置 / 外部工具 / 发现 / 连接 / 超时 / 取消）
//! - `ApiError`: 实现 `IntoResponse`，替代重复的 `(StatusCode, Json<ErrorResponse>)` 模式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::GraphError;

/// 部署流水线错误
#[derive(Debug, Error)]
pub enum DeployError {
    /// 缺失或不可读的凭据、缺少必填配置
    #[error("configuration error: {0}")]
    Config(String),

    /// 外部进程以非零状态退出
    #[error("{command} failed with {}", exit_label(.code))]
    ToolFailure { command: String, code: Option<i32> },

    /// 外部进程无法启动
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// 无法解析 VM 地址
    #[error("could not resolve an address for '{infra_name}'")]
    DiscoveryMiss { infra_name: String },

    /// 远程会话无法建立或中途断开
    #[error("connection error: {0}")]
    Connection(String),

    /// 主机在限定时间内不可达
    #[error("{address} was not reachable within {waited_secs}s")]
    ProbeTimeout { address: String, waited_secs: u64 },

    /// 外部进程超时被终止
    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("deployment cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl From<GraphError> for DeployError {
    fn from(err: GraphError) -> Self {
        DeployError::Config(err.to_string())
    }
}

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 401 - 未授权（API Key 无效或缺失）
    Unauthorized,
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest(String),
    /// 409 - 冲突（如：部署 ID 已存在）
    Conflict(String),
    /// 500 - 部署失败（单条致命信息）
    DeployFailed(String),
}

impl ApiError {
    /// 创建未授权错误
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    /// 创建未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 创建冲突错误
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        ApiError::DeployFailed(err.to_string())
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid or missing API key".to_string(),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::DeployFailed(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "deploy_failed", msg)
            }
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Conflict(m) => write!(f, "Conflict: {}", m),
            ApiError::DeployFailed(m) => write!(f, "Deployment failed: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
