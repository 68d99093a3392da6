//! 部署上下文
//!
//! 统一的部署执行上下文，包含部署 ID、事件发布端、取消令牌和可选的任务存储

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::deploy::{DeployStage, PipelinePhase};
use crate::error::DeployError;
use crate::state::{EventSink, TaskStore};

/// 部署执行上下文
#[derive(Clone)]
pub struct DeployContext {
    /// 部署 ID
    pub deployment_id: String,
    /// 事件发布端
    pub events: EventSink,
    /// 取消令牌
    pub cancel_token: CancellationToken,
    /// 任务存储（记录阶段和进度；测试中可以不提供）
    store: Option<Arc<TaskStore>>,
}

impl DeployContext {
    pub fn new(events: EventSink, cancel_token: CancellationToken) -> Self {
        Self {
            deployment_id: events.deployment_id().to_string(),
            events,
            cancel_token,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 标记了 VM 的事件发布端
    pub fn for_vm(&self, vm_id: &str) -> EventSink {
        self.events.for_vm(vm_id)
    }

    /// 检查是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 阶段边界检查：已取消时返回 `DeployError::Cancelled`
    pub fn ensure_active(&self) -> Result<(), DeployError> {
        if self.is_cancelled() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 更新流水线阶段
    pub async fn set_phase(&self, phase: PipelinePhase) {
        if let Some(store) = &self.store {
            store.set_phase(&self.deployment_id, phase).await;
        }
    }

    /// 记录单个阶段
    pub async fn track(&self, stage: &DeployStage) {
        if let Some(store) = &self.store {
            store.upsert_stage(&self.deployment_id, stage.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeployTask;

    #[tokio::test]
    async fn test_context_tracks_into_store() {
        let store = Arc::new(TaskStore::new());
        store.create(DeployTask::new("dep-1".to_string(), 0)).await;

        let (events, _rx) = EventSink::channel("dep-1");
        let ctx = DeployContext::new(events, CancellationToken::new()).with_store(store.clone());

        ctx.set_phase(PipelinePhase::Provisioning).await;
        let mut stage = DeployStage::new("terraform_init", "Terraform Init");
        stage.start();
        ctx.track(&stage).await;

        let task = store.get("dep-1").await.unwrap();
        assert_eq!(task.phase, PipelinePhase::Provisioning);
        assert_eq!(task.stages[0].name, "terraform_init");
    }

    #[test]
    fn test_ensure_active() {
        let (events, _rx) = EventSink::channel("dep-1");
        let ctx = DeployContext::new(events, CancellationToken::new());
        assert!(ctx.ensure_active().is_ok());

        ctx.cancel_token.cancel();
        assert!(matches!(ctx.ensure_active(), Err(DeployError::Cancelled)));
    }
}
