//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 部署任务状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Running,
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Success | DeployStatus::Failed)
    }
}

/// 流水线阶段
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// 等待工作目录（另一次部署正在占用）
    Queued,
    Preparing,
    Provisioning,
    /// 逐台配置 VM
    Configuring,
    Completed,
    Failed,
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "prepare", "terraform_apply", "vm:web")
    pub name: String,
    /// 显示名称
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 部署任务信息
#[derive(Clone, Debug, Serialize)]
pub struct DeployTask {
    pub id: String,
    pub status: DeployStatus,
    pub phase: PipelinePhase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub vm_count: usize,
    /// 致命错误信息（仅失败时）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 部署阶段详情
    #[serde(default)]
    pub stages: Vec<DeployStage>,
}

impl DeployTask {
    /// 创建新任务
    pub fn new(id: String, vm_count: usize) -> Self {
        Self {
            id,
            status: DeployStatus::Running,
            phase: PipelinePhase::Queued,
            started_at: Utc::now(),
            finished_at: None,
            vm_count,
            error: None,
            stages: Vec::new(),
        }
    }

    /// 设置任务完成
    pub fn complete(&mut self, status: DeployStatus, error: Option<String>) {
        self.phase = if status == DeployStatus::Success {
            PipelinePhase::Completed
        } else {
            PipelinePhase::Failed
        };
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.error = error;
    }

    /// 按名称插入或替换阶段
    pub fn upsert_stage(&mut self, stage: DeployStage) {
        match self.stages.iter_mut().find(|s| s.name == stage.name) {
            Some(existing) => *existing = stage,
            None => self.stages.push(stage),
        }
    }
}

/// 远程配置策略
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployStrategy {
    /// 写入 playbook，交给 ansible-playbook 执行
    #[default]
    Ansible,
    /// 直接 SSH 会话执行引导脚本
    Ssh,
}

impl DeployStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ssh" | "direct" | "session" => DeployStrategy::Ssh,
            _ => DeployStrategy::Ansible,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStrategy::Ansible => "ansible",
            DeployStrategy::Ssh => "ssh",
        }
    }
}

/// 单台 VM 的部署结果
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VmOutcome {
    Deployed,
    Skipped { reason: String },
    Failed { error: String },
}

/// 单台 VM 的部署报告
#[derive(Clone, Debug, Serialize)]
pub struct VmReport {
    pub vm_id: String,
    pub label: String,
    pub address: Option<String>,
    #[serde(flatten)]
    pub outcome: VmOutcome,
}

/// 一次部署的最终报告
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentReport {
    pub deployment_id: String,
    pub vms: Vec<VmReport>,
}

impl DeploymentReport {
    pub fn deployed(&self) -> usize {
        self.count(|o| matches!(o, VmOutcome::Deployed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, VmOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, VmOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&VmOutcome) -> bool) -> usize {
        self.vms.iter().filter(|r| pred(&r.outcome)).count()
    }
}
