//! Configuration through a direct SSH session
//!
//! Loads the private key on every call, opens one session and runs the
//! bootstrap script from `bootstrap.rs`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::SshClientConfig;
use crate::domain::DeployStrategy;
use crate::error::DeployError;
use crate::infra::ssh::{load_private_key, RemoteSession};
use crate::state::EventSink;

use super::{bootstrap, RemoteExecutor, VmTarget};

/// Command name reported when the remote script exits non-zero
const SCRIPT_COMMAND: &str = "bootstrap script";

pub struct SshExecutor {
    key_path: Option<PathBuf>,
    port: u16,
    connect_timeout: Duration,
    remote_dir: String,
}

impl SshExecutor {
    pub fn new(config: &SshClientConfig) -> Self {
        Self {
            key_path: config.key_path.clone(),
            port: config.port,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            remote_dir: config.remote_dir.clone(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn strategy(&self) -> DeployStrategy {
        DeployStrategy::Ssh
    }

    async fn execute(
        &self,
        target: &VmTarget,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let key_path = self
            .key_path
            .as_ref()
            .ok_or_else(|| DeployError::Config("SSH_KEY_PATH is not set".to_string()))?;
        let key = load_private_key(key_path).await?;

        events.info(format!(
            "Connecting to {}@{}:{}",
            target.user, target.address, self.port
        ));
        let session = RemoteSession::connect(
            &target.address,
            self.port,
            &target.user,
            key,
            self.connect_timeout,
        )
        .await?;

        let script = bootstrap::render(
            &target.user,
            &self.remote_dir,
            &target.artifacts.manifest,
            &target.artifacts.proxy_config,
        );
        events.info(format!("Running bootstrap script in {}", self.remote_dir));

        let result = session.exec(&script, events, cancel).await;
        session.close().await;

        match result? {
            // Some servers close the channel without reporting a status
            None | Some(0) => Ok(()),
            Some(code) => Err(DeployError::ToolFailure {
                command: SCRIPT_COMMAND.to_string(),
                code: Some(code as i32),
            }),
        }
    }
}
