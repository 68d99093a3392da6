//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;
pub mod event;
pub mod graph;

// Re-exports for convenience
pub use deploy::{
    DeployStage, DeployStatus, DeployStrategy, DeployTask, DeploymentReport, PipelinePhase,
    StageStatus, VmOutcome, VmReport,
};
pub use event::{Severity, StageEvent};
pub use graph::{
    DeploymentRequest, Edge, GraphError, InfraNames, Service, ServiceKind, Vm, VmResources,
};
