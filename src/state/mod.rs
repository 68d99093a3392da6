//! 运行时状态模块
//!
//! 管理应用状态、任务存储和事件通道

pub mod app_state;
pub mod event_hub;
pub mod task_store;

pub use app_state::AppState;
pub use event_hub::{EventHub, EventSink};
pub use task_store::{CreateRejected, TaskStore};
