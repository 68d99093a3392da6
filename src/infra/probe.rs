//! 主机可达性探测
//!
//! - `TcpProber`: 主动连接 SSH 端口，指数退避，硬超时
//! - `FixedDelayProber`: 固定等待

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::config::{ProbeConfig, ProbeMode};
use crate::error::DeployError;
use crate::state::EventSink;

/// 可达性探测能力
#[async_trait]
pub trait HostProber: Send + Sync {
    /// 等待主机可以执行远程命令；超时返回 `DeployError::ProbeTimeout`
    async fn await_reachable(&self, address: &str, events: &EventSink) -> Result<(), DeployError>;
}

/// 根据配置构造探测器
pub fn from_config(config: &ProbeConfig, port: u16) -> Box<dyn HostProber> {
    match config.mode {
        ProbeMode::Tcp => Box::new(TcpProber::new(config, port)),
        ProbeMode::Delay => Box::new(FixedDelayProber::new(Duration::from_secs(
            config.fixed_delay_secs,
        ))),
    }
}

/// 主动 TCP 探测
#[derive(Clone, Debug)]
pub struct TcpProber {
    port: u16,
    timeout: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    settle: Duration,
}

impl TcpProber {
    pub fn new(config: &ProbeConfig, port: u16) -> Self {
        Self {
            port,
            timeout: Duration::from_secs(config.timeout_secs),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            settle: Duration::from_secs(config.settle_secs),
        }
    }

    /// 单次连接尝试，不超过剩余时间
    async fn try_connect(&self, target: &str, remaining: Duration) -> bool {
        match timeout(remaining, TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(target = %target, error = %e, "Probe attempt failed");
                false
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl HostProber for TcpProber {
    async fn await_reachable(&self, address: &str, events: &EventSink) -> Result<(), DeployError> {
        let target = format!("{}:{}", address, self.port);
        events.info(format!(
            "Waiting for {} to accept connections (up to {}s)",
            target,
            self.timeout.as_secs()
        ));

        let deadline = Instant::now() + self.timeout;
        let mut backoff = self.initial_backoff;
        let mut attempts = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            if self.try_connect(&target, remaining).await {
                if !self.settle.is_zero() {
                    tokio::time::sleep(self.settle).await;
                }
                events.info(format!("{} is reachable after {} attempt(s)", target, attempts));
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(backoff.min(remaining)).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }

        events.warning(format!(
            "{} did not become reachable within {}s",
            target,
            self.timeout.as_secs()
        ));
        Err(DeployError::ProbeTimeout {
            address: address.to_string(),
            waited_secs: self.timeout.as_secs(),
        })
    }
}

/// 固定等待（不做任何探测，从不超时）
#[derive(Clone, Debug)]
pub struct FixedDelayProber {
    delay: Duration,
}

impl FixedDelayProber {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl HostProber for FixedDelayProber {
    async fn await_reachable(&self, address: &str, events: &EventSink) -> Result<(), DeployError> {
        events.info(format!(
            "Waiting {}s for {} to finish booting",
            self.delay.as_secs(),
            address
        ));
        tokio::time::sleep(self.delay).await;
        events.info(format!("Wait for {} finished", address));
        Ok(())
    }
}
