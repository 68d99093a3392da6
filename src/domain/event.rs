//! 部署进度事件

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件级别
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Success => "success",
        }
    }
}

/// 阶段事件
///
/// 同一次部署内的事件按发送顺序到达订阅者
#[derive(Clone, Debug, Serialize)]
pub struct StageEvent {
    pub deployment_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
    /// 事件所属 VM（全局阶段为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
}

impl StageEvent {
    pub fn new(deployment_id: &str, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            timestamp: Utc::now(),
            severity,
            text: text.into(),
            vm_id: None,
        }
    }

    pub fn with_vm(mut self, vm_id: Option<&str>) -> Self {
        self.vm_id = vm_id.map(str::to_string);
        self
    }
}
