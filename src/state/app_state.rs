//! 应用状态

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::env::EnvConfig;

use super::event_hub::EventHub;
use super::task_store::TaskStore;

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 任务管理 ==========
    /// 任务存储
    pub task_store: Arc<TaskStore>,
    /// 事件中心（按部署 ID 区分）
    pub event_hub: EventHub,
    /// 运行中的部署 (deployment_id -> cancel token)
    pub running: RwLock<HashMap<String, CancellationToken>>,
    /// 工作目录锁：共享同一工作目录的部署必须串行
    pub workspace_lock: Mutex<()>,
}

impl AppState {
    /// 从环境变量创建
    pub fn from_env() -> Self {
        Self::new(EnvConfig::from_env())
    }

    /// 创建新的应用状态
    pub fn new(config: EnvConfig) -> Self {
        tracing::info!(
            auth = config.api_key.is_some(),
            port = config.port,
            work_dir = %config.work_dir.display(),
            strategy = config.strategy.as_str(),
            vm_concurrency = config.vm_concurrency,
            deploy_timeout_secs = ?config.deploy_timeout_secs,
            probe_mode = ?config.probe.mode,
            "Loaded configuration"
        );

        Self {
            config,
            started_at: Utc::now(),
            task_store: Arc::new(TaskStore::new()),
            event_hub: EventHub::new(),
            running: RwLock::new(HashMap::new()),
            workspace_lock: Mutex::new(()),
        }
    }

    /// 注册运行中的部署
    pub async fn register_running_deploy(&self, deployment_id: &str) -> CancellationToken {
        let cancel_token = CancellationToken::new();
        let mut running = self.running.write().await;
        running.insert(deployment_id.to_string(), cancel_token.clone());
        cancel_token
    }

    /// 取消注册运行中的部署
    pub async fn unregister_running_deploy(&self, deployment_id: &str) {
        let mut running = self.running.write().await;
        running.remove(deployment_id);
    }

    /// 是否正在运行
    pub async fn is_running(&self, deployment_id: &str) -> bool {
        let running = self.running.read().await;
        running.contains_key(deployment_id)
    }

    /// 取消部署
    pub async fn cancel_deploy(&self, deployment_id: &str) -> bool {
        let running = self.running.read().await;
        if let Some(token) = running.get(deployment_id) {
            token.cancel();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_cancel() {
        let state = AppState::new(EnvConfig::default());
        let token = state.register_running_deploy("dep-1").await;

        assert!(state.is_running("dep-1").await);
        assert!(state.cancel_deploy("dep-1").await);
        assert!(token.is_cancelled());

        state.unregister_running_deploy("dep-1").await;
        assert!(!state.cancel_deploy("dep-1").await);
    }
}
