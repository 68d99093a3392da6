//! Configuration through ansible-playbook
//!
//! The orchestrator has already written the manifest, proxy config and
//! playbook into the VM directory; this executor only runs the playbook
//! against the single discovered address.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::artifacts::PLAYBOOK_FILE;
use crate::domain::DeployStrategy;
use crate::error::DeployError;
use crate::infra::{ProcessRunner, ToolInvocation};
use crate::state::EventSink;

use super::{RemoteExecutor, VmTarget};

/// Runs `ansible-playbook` through the process runner
pub struct AnsibleExecutor {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    private_key: Option<PathBuf>,
}

impl AnsibleExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>, binary: impl Into<String>, private_key: Option<PathBuf>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            private_key,
        }
    }

    /// Build the playbook invocation for one VM
    pub fn invocation(&self, target: &VmTarget) -> ToolInvocation {
        // Trailing comma makes ansible treat the value as an inline host list
        let mut invocation = ToolInvocation::new(&self.binary, &target.work_dir)
            .arg("-i")
            .arg(format!("{},", target.address))
            .arg("-u")
            .arg(&target.user);

        if let Some(key) = &self.private_key {
            invocation = invocation.arg("--private-key").arg(key.display().to_string());
        }

        invocation.arg(PLAYBOOK_FILE).automation_env()
    }
}

#[async_trait]
impl RemoteExecutor for AnsibleExecutor {
    fn strategy(&self) -> DeployStrategy {
        DeployStrategy::Ansible
    }

    async fn execute(
        &self,
        target: &VmTarget,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let invocation = self.invocation(target);
        events.info(format!(">>> {}", invocation.command_line()));
        self.runner.run(&invocation, events, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::deploy::VmArtifacts;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<ToolInvocation>>,
        exit_code: Option<i32>,
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(
            &self,
            invocation: &ToolInvocation,
            _events: &EventSink,
            _cancel: &CancellationToken,
        ) -> Result<(), DeployError> {
            self.calls.lock().unwrap().push(invocation.clone());
            match self.exit_code {
                Some(code) => Err(DeployError::ToolFailure {
                    command: invocation.label(),
                    code: Some(code),
                }),
                None => Ok(()),
            }
        }
    }

    fn target() -> VmTarget {
        VmTarget {
            vm_id: "a".to_string(),
            label: "Web Box".to_string(),
            address: "10.0.0.2".to_string(),
            user: "ubuntu".to_string(),
            work_dir: PathBuf::from("/tmp/infra/a"),
            artifacts: VmArtifacts::default(),
        }
    }

    #[tokio::test]
    async fn test_runs_playbook_against_single_host() {
        let runner = Arc::new(RecordingRunner::default());
        let executor = AnsibleExecutor::new(
            runner.clone(),
            "ansible-playbook",
            Some(PathBuf::from("/keys/id_ed25519")),
        );
        let (events, _rx) = EventSink::channel("dep-1");

        executor
            .execute(&target(), &events, &CancellationToken::new())
            .await
            .unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.work_dir, PathBuf::from("/tmp/infra/a"));
        assert_eq!(
            call.args,
            vec![
                "-i",
                "10.0.0.2,",
                "-u",
                "ubuntu",
                "--private-key",
                "/keys/id_ed25519",
                "playbook.yml"
            ]
        );
        assert!(call
            .env
            .contains(&("ANSIBLE_HOST_KEY_CHECKING".to_string(), "False".to_string())));
    }

    #[tokio::test]
    async fn test_propagates_tool_failure() {
        let runner = Arc::new(RecordingRunner {
            exit_code: Some(4),
            ..Default::default()
        });
        let executor = AnsibleExecutor::new(runner, "ansible-playbook", None);
        let (events, _rx) = EventSink::channel("dep-1");

        let err = executor
            .execute(&target(), &events, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ToolFailure { code: Some(4), .. }));
    }
}
