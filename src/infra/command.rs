//! 命令执行器
//!
//! 提供统一的外部工具执行接口，支持：
//! - 实时日志流式输出（stdout → info，stderr → warning）
//! - 环境变量覆盖
//! - 超时控制
//! - 取消支持

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::DeployError;
use crate::state::EventSink;

/// 一次外部工具调用
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// 覆盖在继承环境之上的变量
    pub env: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, work_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.as_ref().to_path_buf(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 非交互模式，并对临时主机关闭 host key 校验
    pub fn automation_env(self) -> Self {
        self.env("TF_IN_AUTOMATION", "true")
            .env("ANSIBLE_FORCE_COLOR", "true")
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
    }

    /// 用于日志和错误信息的命令名 (e.g. "terraform apply")
    pub fn label(&self) -> String {
        match self.args.iter().find(|a| !a.starts_with('-')) {
            Some(sub) if sub.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => {
                format!("{} {}", self.program, sub)
            }
            _ => self.program.clone(),
        }
    }

    /// 完整命令行
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 外部进程执行能力
///
/// 编排器只依赖这个 trait，测试中可以替换为记录调用的假实现
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// 执行命令，退出码为 0 时成功；从不重试
    async fn run(
        &self,
        invocation: &ToolInvocation,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError>;
}

/// 命令执行器
#[derive(Clone, Debug)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// 执行简单命令（无流式输出）
    ///
    /// 用于不需要实时日志的场景（如库存查询）
    pub async fn run_simple(
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<std::process::Output, DeployError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => {
                result.map_err(|source| DeployError::Spawn {
                    command: program.to_string(),
                    source,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                Err(DeployError::Timeout {
                    command: program.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let label = invocation.label();
        debug!(command = %invocation.command_line(), work_dir = %invocation.work_dir.display(), "Spawning tool");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeployError::Spawn {
                command: label.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 启动 stdout 读取任务
        let stdout_events = events.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    stdout_events.info(line);
                }
            }
        });

        // 启动 stderr 读取任务
        let stderr_events = events.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    stderr_events.warning(line);
                }
            }
        });

        // 等待命令完成，支持超时和取消
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(command = %label, "Command cancelled, killing process");
                let _ = child.kill().await;
                Err(DeployError::Cancelled)
            }
            _ = tokio::time::sleep(self.timeout) => {
                error!(command = %label, "Command timed out after {:?}", self.timeout);
                let _ = child.kill().await;
                Err(DeployError::Timeout {
                    command: label.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(DeployError::ToolFailure {
                        command: label.clone(),
                        code: status.code(),
                    })
                }
            }
        };

        // 等待日志读取完成，保证输出先于结果到达订阅者
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }
}
