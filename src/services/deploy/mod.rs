//! 部署服务模块
//!
//! 流水线编排、两种远程配置策略，以及部署任务的入口

pub mod ansible;
pub mod bootstrap;
pub mod context;
pub mod orchestrator;
pub mod ssh;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::artifacts::DefaultArtifacts;
use crate::config::EnvConfig;
use crate::domain::{DeployStatus, DeployStrategy, DeploymentReport, DeploymentRequest, PipelinePhase};
use crate::error::DeployError;
use crate::infra::{probe, CommandRunner, MultipassDiscovery};
use crate::state::{AppState, EventSink};

pub use ansible::AnsibleExecutor;
pub use context::DeployContext;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use ssh::SshExecutor;

/// 单台 VM 的生成产物（原样写盘、原样下发）
#[derive(Clone, Debug, Default)]
pub struct VmArtifacts {
    pub manifest: String,
    pub proxy_config: String,
    /// 仅 ansible 策略生成
    pub playbook: Option<String>,
}

/// 远程配置目标
#[derive(Clone, Debug)]
pub struct VmTarget {
    pub vm_id: String,
    pub label: String,
    pub address: String,
    pub user: String,
    /// 本地 VM 目录 `<work_dir>/<vm id>`
    pub work_dir: PathBuf,
    pub artifacts: VmArtifacts,
}

/// 远程配置策略
///
/// 两种实现可以互换，编排器只依赖这个 trait
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    fn strategy(&self) -> DeployStrategy;

    async fn execute(
        &self,
        target: &VmTarget,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;
}

/// 按配置组装编排器
pub fn build_orchestrator(config: &EnvConfig) -> Orchestrator {
    let runner = Arc::new(CommandRunner::new(config.tools.timeout()));
    let discovery = Arc::new(MultipassDiscovery::new(
        config.tools.multipass_bin.clone(),
        Duration::from_secs(config.tools.discovery_timeout_secs),
    ));
    let prober = Arc::from(probe::from_config(&config.probe, config.ssh.port));

    let executor: Arc<dyn RemoteExecutor> = match config.strategy {
        DeployStrategy::Ansible => Arc::new(AnsibleExecutor::new(
            runner.clone(),
            config.tools.ansible_playbook_bin.clone(),
            config.ssh.key_path.clone(),
        )),
        DeployStrategy::Ssh => Arc::new(SshExecutor::new(&config.ssh)),
    };

    Orchestrator::new(
        OrchestratorSettings::from_config(config),
        Arc::new(DefaultArtifacts),
        runner,
        discovery,
        prober,
        executor,
    )
}

/// 执行部署任务
///
/// 这是部署的主入口点：等待工作目录锁，运行流水线，收尾任务记录和事件通道。
/// 调用方需先在任务存储中创建任务并注册取消令牌。
pub async fn execute(
    state: Arc<AppState>,
    deployment_id: String,
    request: DeploymentRequest,
    cancel_token: CancellationToken,
) -> Result<DeploymentReport, DeployError> {
    let events = state.event_hub.create(&deployment_id).await;
    let ctx = DeployContext::new(events, cancel_token.clone()).with_store(state.task_store.clone());

    // 共享工作目录的部署必须串行
    let _workspace = match state.workspace_lock.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            ctx.set_phase(PipelinePhase::Queued).await;
            ctx.events
                .info("Another deployment is using the working directory, waiting");
            tokio::select! {
                guard = state.workspace_lock.lock() => guard,
                _ = cancel_token.cancelled() => {
                    ctx.events.error("Deployment cancelled while waiting");
                    finish(&state, &deployment_id, &Err(DeployError::Cancelled)).await;
                    return Err(DeployError::Cancelled);
                }
            }
        }
    };

    tracing::info!(
        deployment_id = %deployment_id,
        vms = request.vms.len(),
        services = request.services.len(),
        strategy = state.config.strategy.as_str(),
        "Starting deployment"
    );

    // 仅在配置了 DEPLOY_TIMEOUT_SECS 时启动超时保护
    let timeout_task = spawn_timeout(
        deployment_id.clone(),
        cancel_token.clone(),
        state.config.deploy_timeout_secs,
    );

    let orchestrator = build_orchestrator(&state.config);
    let result = orchestrator.run(&ctx, &request).await;

    if let Some(task) = timeout_task {
        task.abort();
    }
    finish(&state, &deployment_id, &result).await;

    result
}

/// 记录结果、关闭事件通道、取消注册
async fn finish(
    state: &AppState,
    deployment_id: &str,
    result: &Result<DeploymentReport, DeployError>,
) {
    match result {
        Ok(report) => {
            tracing::info!(
                deployment_id = %deployment_id,
                deployed = report.deployed(),
                skipped = report.skipped(),
                failed = report.failed(),
                "Deployment completed"
            );
            state
                .task_store
                .finish(deployment_id, DeployStatus::Success, None)
                .await;
        }
        Err(e) => {
            tracing::error!(deployment_id = %deployment_id, error = %e, "Deployment failed");
            state
                .task_store
                .finish(deployment_id, DeployStatus::Failed, Some(e.to_string()))
                .await;
        }
    }

    state.event_hub.finish(deployment_id).await;
    state.unregister_running_deploy(deployment_id).await;
}

/// 启动超时保护任务，未配置上限时不启动
fn spawn_timeout(
    deployment_id: String,
    cancel_token: CancellationToken,
    limit_secs: Option<u64>,
) -> Option<tokio::task::JoinHandle<()>> {
    let secs = limit_secs?;
    Some(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        tracing::error!(deployment_id = %deployment_id, limit_secs = secs, "Deployment timed out");
        cancel_token.cancel();
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeployTask;

    #[test]
    fn test_build_orchestrator_uses_config() {
        let config = EnvConfig {
            vm_concurrency: 3,
            ..EnvConfig::default()
        };
        let orchestrator = build_orchestrator(&config);
        assert_eq!(orchestrator.settings().vm_concurrency, 3);
        assert_eq!(orchestrator.settings().remote_dir, "/opt/infraflow");
    }

    #[tokio::test]
    async fn test_no_deploy_limit_by_default() {
        let token = CancellationToken::new();
        let limit = EnvConfig::default().deploy_timeout_secs;
        assert_eq!(limit, None);
        assert!(spawn_timeout("dep-long".to_string(), token.clone(), limit).is_none());
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_configured_deploy_limit_cancels() {
        let token = CancellationToken::new();
        let task = spawn_timeout("dep-capped".to_string(), token.clone(), Some(1)).unwrap();

        assert!(!token.is_cancelled());
        task.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_succeeds_without_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EnvConfig::default();
        config.work_dir = dir.path().join("infra");
        config.tools.terraform_bin = "true".to_string();
        let state = Arc::new(AppState::new(config));

        state
            .task_store
            .create(DeployTask::new("dep-ok".to_string(), 0))
            .await;
        let token = state.register_running_deploy("dep-ok").await;

        let result = execute(state.clone(), "dep-ok".to_string(), DeploymentRequest::default(), token.clone()).await;

        assert!(result.is_ok());
        assert!(!token.is_cancelled());
        let task = state.task_store.get_any("dep-ok").await.unwrap();
        assert_eq!(task.status, DeployStatus::Success);
    }

    #[tokio::test]
    async fn test_execute_records_failure_and_closes_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EnvConfig::default();
        config.work_dir = dir.path().join("infra");
        config.tools.terraform_bin = "nonexistent_terraform_12345".to_string();
        let state = Arc::new(AppState::new(config));

        state
            .task_store
            .create(DeployTask::new("dep-1".to_string(), 0))
            .await;
        let token = state.register_running_deploy("dep-1").await;
        let mut rx = state.event_hub.subscribe_or_create("dep-1").await.unwrap();

        let result = execute(state.clone(), "dep-1".to_string(), DeploymentRequest::default(), token).await;

        assert!(matches!(result, Err(DeployError::Spawn { .. })));
        let task = state.task_store.get_any("dep-1").await.unwrap();
        assert_eq!(task.status, DeployStatus::Failed);
        assert!(task.error.unwrap().contains("nonexistent_terraform_12345"));
        assert!(!state.is_running("dep-1").await);
        assert!(state.event_hub.is_finished("dep-1").await);

        let mut last = None;
        while let Ok(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last.unwrap().severity, crate::domain::Severity::Error);
    }
}
