//! SSH 客户端会话
//!
//! 基于 russh 的单次远程命令执行：公钥认证，stdout → info，stderr → warning。
//! 目标主机是刚创建的临时 VM，主机密钥一律接受。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::state::EventSink;

/// 读取并解码私钥
///
/// 每次调用都重新读取文件，密钥轮换在下一次部署生效
pub async fn load_private_key(path: &Path) -> Result<KeyPair, DeployError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        DeployError::Config(format!(
            "cannot read private key {}: {}",
            path.display(),
            e
        ))
    })?;

    russh_keys::decode_secret_key(&contents, None).map_err(|e| {
        DeployError::Config(format!(
            "cannot decode private key {}: {}",
            path.display(),
            e
        ))
    })
}

/// 接受任意主机密钥的客户端处理器
struct EphemeralHostHandler {
    address: String,
}

#[async_trait]
impl client::Handler for EphemeralHostHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        debug!(
            address = %self.address,
            fingerprint = %server_public_key.fingerprint(),
            "Accepting host key"
        );
        Ok(true)
    }
}

/// 已认证的远程会话
pub struct RemoteSession {
    handle: Handle<EphemeralHostHandler>,
    address: String,
}

impl RemoteSession {
    /// 连接并以公钥认证
    pub async fn connect(
        address: &str,
        port: u16,
        user: &str,
        key: KeyPair,
        connect_timeout: Duration,
    ) -> Result<Self, DeployError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        });
        let handler = EphemeralHostHandler {
            address: address.to_string(),
        };

        let connect = client::connect(config, (address, port), handler);
        let mut handle = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| {
                DeployError::Connection(format!(
                    "timed out connecting to {}:{} after {}s",
                    address,
                    port,
                    connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                DeployError::Connection(format!("failed to connect to {}:{}: {}", address, port, e))
            })?;

        let authenticated = handle
            .authenticate_publickey(user, Arc::new(key))
            .await
            .map_err(|e| {
                DeployError::Connection(format!("authentication with {} failed: {}", address, e))
            })?;
        if !authenticated {
            return Err(DeployError::Connection(format!(
                "public key rejected by {} for user {}",
                address, user
            )));
        }

        info!(address = %address, user = %user, "SSH session established");
        Ok(Self {
            handle,
            address: address.to_string(),
        })
    }

    /// 执行一条命令直到通道关闭
    ///
    /// 返回远程退出码；服务端未报告时为 None
    pub async fn exec(
        &self,
        command: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Option<u32>, DeployError> {
        let mut channel = self.handle.channel_open_session().await.map_err(|e| {
            DeployError::Connection(format!("failed to open channel on {}: {}", self.address, e))
        })?;
        channel.exec(true, command).await.map_err(|e| {
            DeployError::Connection(format!("failed to start command on {}: {}", self.address, e))
        })?;

        let mut stdout = LineBuffer::default();
        let mut stderr = LineBuffer::default();
        let mut exit_status = None;

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(address = %self.address, "Remote command cancelled");
                    let _ = channel.close().await;
                    return Err(DeployError::Cancelled);
                }
                msg = channel.wait() => msg,
            };

            match msg {
                Some(ChannelMsg::Data { data }) => {
                    for line in stdout.push(&data) {
                        events.info(line);
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    for line in stderr.push(&data) {
                        events.warning(line);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status: code }) => {
                    exit_status = Some(code);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    warn!(address = %self.address, signal = ?signal_name, "Remote command killed by signal");
                }
                Some(_) => {}
                None => break,
            }
        }

        if let Some(line) = stdout.finish() {
            events.info(line);
        }
        if let Some(line) = stderr.finish() {
            events.warning(line);
        }

        Ok(exit_status)
    }

    /// 关闭会话
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!(address = %self.address, error = %e, "Disconnect failed");
        }
    }
}

/// 把任意切分的字节块还原成完整的行
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// 追加数据，返回其中已完整的行（不含换行符）
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// 取出末尾没有换行符的剩余内容
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
