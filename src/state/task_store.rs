//! 任务存储
//!
//! 管理进行中的部署和历史记录，自动清理过期任务

use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::config::env::constants::{MAX_ACTIVE_TASKS, MAX_TASK_HISTORY, TASK_RETENTION_HOURS};
use crate::domain::deploy::{DeployStage, DeployStatus, DeployTask, PipelinePhase};

/// 任务创建被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateRejected {
    /// ID 已被活跃任务或历史记录占用
    Duplicate,
    /// 活跃任务数已达上限
    AtCapacity,
}

/// 任务存储
pub struct TaskStore {
    /// 活跃任务
    tasks: RwLock<HashMap<String, DeployTask>>,
    /// 历史记录（最新的在前）
    history: RwLock<VecDeque<DeployTask>>,
    max_active: usize,
    max_history: usize,
    retention: Duration,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::with_config(MAX_ACTIVE_TASKS, MAX_TASK_HISTORY, TASK_RETENTION_HOURS)
    }

    /// 使用自定义配置创建
    pub fn with_config(max_active: usize, max_history: usize, retention_hours: i64) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_active,
            max_history,
            retention: Duration::hours(retention_hours),
        }
    }

    /// 创建新任务
    pub async fn create(&self, task: DeployTask) -> String {
        let task_id = task.id.clone();
        let mut tasks = self.tasks.write().await;
        tasks.insert(task_id.clone(), task);
        task_id
    }

    /// 检查 ID 与容量后创建任务，检查和插入在同一把写锁内完成
    ///
    /// 锁顺序固定为 tasks → history
    pub async fn try_create(&self, task: DeployTask) -> Result<(), CreateRejected> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(CreateRejected::Duplicate);
        }
        {
            let history = self.history.read().await;
            if history.iter().any(|t| t.id == task.id) {
                return Err(CreateRejected::Duplicate);
            }
        }
        if tasks.len() >= self.max_active {
            return Err(CreateRejected::AtCapacity);
        }

        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// 获取活跃任务
    pub async fn get(&self, task_id: &str) -> Option<DeployTask> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).cloned()
    }

    /// 获取任务（优先活跃任务，然后查历史记录）
    pub async fn get_any(&self, task_id: &str) -> Option<DeployTask> {
        if let Some(task) = self.get(task_id).await {
            return Some(task);
        }
        let history = self.history.read().await;
        history.iter().find(|t| t.id == task_id).cloned()
    }

    /// 获取所有活跃任务
    pub async fn get_all(&self) -> Vec<DeployTask> {
        let tasks = self.tasks.read().await;
        tasks.values().cloned().collect()
    }

    /// 更新流水线阶段
    pub async fn set_phase(&self, task_id: &str, phase: PipelinePhase) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.phase = phase;
        }
    }

    /// 插入或更新单个阶段
    pub async fn upsert_stage(&self, task_id: &str, stage: DeployStage) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.upsert_stage(stage);
        }
    }

    /// 完成任务并移到历史记录
    ///
    /// 持有活跃任务写锁直到写入历史，ID 在两者之间不会短暂消失
    pub async fn finish(&self, task_id: &str, status: DeployStatus, error: Option<String>) {
        let mut tasks = self.tasks.write().await;
        if let Some(mut task) = tasks.remove(task_id) {
            task.complete(status, error);
            self.add_to_history(task).await;
        }
    }

    /// 添加任务到历史记录
    pub async fn add_to_history(&self, task: DeployTask) {
        let mut history = self.history.write().await;
        history.push_front(task);

        while history.len() > self.max_history {
            history.pop_back();
        }
    }

    /// 获取历史记录
    pub async fn get_history(&self, limit: usize, status: Option<&str>) -> Vec<DeployTask> {
        let history = self.history.read().await;

        history
            .iter()
            .filter(|task| status.map_or(true, |s| task.status.as_str() == s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// 获取历史记录总数
    pub async fn history_count(&self) -> usize {
        let history = self.history.read().await;
        history.len()
    }

    /// 清理过期历史
    pub async fn cleanup_stale(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut history = self.history.write().await;
        history.retain(|task| task.finished_at.map_or(true, |t| t > cutoff));
    }

    /// 获取活跃任务数量
    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.len()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_lifecycle() {
        let store = TaskStore::new();

        store.create(DeployTask::new("dep-1".to_string(), 1)).await;
        store.set_phase("dep-1", PipelinePhase::Provisioning).await;

        let mut stage = DeployStage::new("terraform_init", "Terraform Init");
        stage.start();
        store.upsert_stage("dep-1", stage).await;

        let task = store.get("dep-1").await.unwrap();
        assert_eq!(task.phase, PipelinePhase::Provisioning);
        assert_eq!(task.stages.len(), 1);

        store.finish("dep-1", DeployStatus::Success, None).await;

        // 任务从活跃列表移除，进入历史记录
        assert!(store.get("dep-1").await.is_none());
        let task = store.get_any("dep-1").await.unwrap();
        assert_eq!(task.phase, PipelinePhase::Completed);

        let history = store.get_history(10, Some("success")).await;
        assert_eq!(history.len(), 1);
        assert!(store.get_history(10, Some("failed")).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_limit() {
        let store = TaskStore::with_config(10, 5, 24);

        for i in 0..10 {
            let mut task = DeployTask::new(format!("dep-{}", i), 0);
            task.complete(DeployStatus::Success, None);
            store.add_to_history(task).await;
        }

        assert_eq!(store.history_count().await, 5);
        // 最新的在前
        assert_eq!(store.get_history(1, None).await[0].id, "dep-9");
    }

    #[tokio::test]
    async fn test_try_create_rejects_duplicates_and_capacity() {
        let store = TaskStore::with_config(2, 5, 24);

        assert_eq!(store.try_create(DeployTask::new("dep-1".to_string(), 0)).await, Ok(()));
        assert_eq!(
            store.try_create(DeployTask::new("dep-1".to_string(), 0)).await,
            Err(CreateRejected::Duplicate)
        );

        // 已完成的 ID 同样不能复用
        store.finish("dep-1", DeployStatus::Success, None).await;
        assert_eq!(
            store.try_create(DeployTask::new("dep-1".to_string(), 0)).await,
            Err(CreateRejected::Duplicate)
        );

        store.try_create(DeployTask::new("dep-2".to_string(), 0)).await.unwrap();
        store.try_create(DeployTask::new("dep-3".to_string(), 0)).await.unwrap();
        assert_eq!(
            store.try_create(DeployTask::new("dep-4".to_string(), 0)).await,
            Err(CreateRejected::AtCapacity)
        );
    }

    #[tokio::test]
    async fn test_concurrent_try_create_admits_one() {
        let store = std::sync::Arc::new(TaskStore::new());

        let attempts = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store.try_create(DeployTask::new("same-id".to_string(), 0)).await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let accepted = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(()))))
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(store.active_count().await, 1);
    }
}
