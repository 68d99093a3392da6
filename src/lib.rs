//! InfraFlow Deploy Agent - VM 拓扑部署代理
//!
//! 接收部署图，生成 Terraform / compose / nginx 产物，创建 VM 并逐台下发服务栈

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod artifacts;
pub mod api;
pub mod services;

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::env::constants::{CLEANUP_INTERVAL_SECS, TASK_RETENTION_HOURS, VERSION};
use crate::state::AppState;

/// 命令行覆盖项
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    /// 覆盖 PORT
    pub port_override: Option<u16>,
    /// 覆盖 INFRAFLOW_WORK_DIR
    pub work_dir_override: Option<PathBuf>,
}

/// 初始化日志、加载配置并运行 HTTP 服务，直到收到 Ctrl-C
pub async fn init_and_run_agent_with_config(runtime: RuntimeConfig) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infraflow_agent=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    if let Some(work_dir) = runtime.work_dir_override {
        config.work_dir = work_dir;
    }

    tracing::info!(version = VERSION, "Starting InfraFlow deploy agent");

    let state = Arc::new(AppState::new(config));
    spawn_cleanup(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "Listening");

    let app = api::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("Agent stopped");
    Ok(())
}

/// 定期清理过期任务和事件通道
fn spawn_cleanup(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        // 第一次 tick 立即返回
        interval.tick().await;
        loop {
            interval.tick().await;
            state.task_store.cleanup_stale().await;
            state.event_hub.cleanup().await;
            state.event_hub.cleanup_expired(TASK_RETENTION_HOURS).await;
            tracing::debug!("Periodic cleanup finished");
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
