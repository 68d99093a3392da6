//! 基础设施模块
//!
//! 封装外部依赖（外部进程、库存查询、可达性探测、SSH 会话）

pub mod command;
pub mod discovery;
pub mod probe;
pub mod ssh;

pub use command::{CommandRunner, ProcessRunner, ToolInvocation};
pub use discovery::{InfraDiscovery, MultipassDiscovery};
pub use probe::{FixedDelayProber, HostProber, TcpProber};
pub use ssh::RemoteSession;
