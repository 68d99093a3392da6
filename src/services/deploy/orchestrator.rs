//! Deployment pipeline
//!
//! Preparing -> Provisioning -> per-VM loop -> Completed.
//!
//! Provisioning is all-or-nothing: any failure there ends the run with an
//! error. Every failure inside the per-VM loop is reported as one `error`
//! event for that VM and the loop moves on.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::artifacts::{
    ArtifactGenerator, INFRA_FILE, MANIFEST_FILE, PLAYBOOK_FILE, PROXY_FILE, USER_DATA_FILE,
};
use crate::config::EnvConfig;
use crate::domain::{
    DeployStage, DeployStrategy, DeploymentReport, DeploymentRequest, InfraNames, PipelinePhase,
    Vm, VmOutcome, VmReport,
};
use crate::error::DeployError;
use crate::infra::{HostProber, InfraDiscovery, ProcessRunner, ToolInvocation};
use crate::state::EventSink;

use super::context::DeployContext;
use super::{RemoteExecutor, VmArtifacts, VmTarget};

/// Settings that shape one pipeline run
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub work_dir: PathBuf,
    pub terraform_bin: String,
    /// Public key installed for every login user through cloud-init
    pub public_key_path: Option<PathBuf>,
    pub remote_dir: String,
    /// 1 keeps the VM loop strictly sequential
    pub vm_concurrency: usize,
    pub proceed_on_probe_timeout: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &EnvConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            terraform_bin: config.tools.terraform_bin.clone(),
            public_key_path: config.ssh.public_key_path.clone(),
            remote_dir: config.ssh.remote_dir.clone(),
            vm_concurrency: config.vm_concurrency.max(1),
            proceed_on_probe_timeout: config.probe.proceed_on_timeout,
        }
    }
}

/// Drives one deployment request through the pipeline
pub struct Orchestrator {
    settings: OrchestratorSettings,
    artifacts: Arc<dyn ArtifactGenerator>,
    runner: Arc<dyn ProcessRunner>,
    discovery: Arc<dyn InfraDiscovery>,
    prober: Arc<dyn HostProber>,
    executor: Arc<dyn RemoteExecutor>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        artifacts: Arc<dyn ArtifactGenerator>,
        runner: Arc<dyn ProcessRunner>,
        discovery: Arc<dyn InfraDiscovery>,
        prober: Arc<dyn HostProber>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            settings,
            artifacts,
            runner,
            discovery,
            prober,
            executor,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run the whole pipeline and emit the terminal event
    pub async fn run(
        &self,
        ctx: &DeployContext,
        request: &DeploymentRequest,
    ) -> Result<DeploymentReport, DeployError> {
        let result = self.run_pipeline(ctx, request).await;

        match &result {
            Ok(report) => {
                ctx.set_phase(PipelinePhase::Completed).await;
                ctx.events.success(format!(
                    "Deployment completed: {} deployed, {} skipped, {} failed",
                    report.deployed(),
                    report.skipped(),
                    report.failed()
                ));
            }
            Err(e) => {
                ctx.set_phase(PipelinePhase::Failed).await;
                ctx.events.error(format!("Deployment failed: {}", e));
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        ctx: &DeployContext,
        request: &DeploymentRequest,
    ) -> Result<DeploymentReport, DeployError> {
        ctx.ensure_active()?;
        self.prepare(ctx).await?;

        ctx.ensure_active()?;
        let names = self.provision(ctx, request).await?;

        ctx.ensure_active()?;
        let vms = self.deploy_vms(ctx, request, &names).await?;

        Ok(DeploymentReport {
            deployment_id: ctx.deployment_id.clone(),
            vms,
        })
    }

    /// Preparing: create the working directory
    async fn prepare(&self, ctx: &DeployContext) -> Result<(), DeployError> {
        ctx.set_phase(PipelinePhase::Preparing).await;
        let mut stage = DeployStage::new("prepare", "Prepare");
        stage.start();
        ctx.track(&stage).await;

        ctx.events.info(format!(
            "Preparing working directory {}",
            self.settings.work_dir.display()
        ));

        let result = tokio::fs::create_dir_all(&self.settings.work_dir)
            .await
            .map_err(DeployError::from);
        stage.finish(result.is_ok(), result.as_ref().err().map(ToString::to_string));
        ctx.track(&stage).await;
        result
    }

    /// Provisioning: write the shared artifacts, then terraform init and apply
    async fn provision(
        &self,
        ctx: &DeployContext,
        request: &DeploymentRequest,
    ) -> Result<InfraNames, DeployError> {
        ctx.set_phase(PipelinePhase::Provisioning).await;

        let names = request.validate()?;
        for service in request.unplaced_services() {
            ctx.events.warning(format!(
                "Service '{}' is not placed on any VM in this request, skipping",
                service.id
            ));
        }

        let authorized_keys = self.authorized_keys(ctx).await?;
        let users = request.ssh_users();

        let work_dir = &self.settings.work_dir;
        write_artifact(
            work_dir,
            INFRA_FILE,
            &self.artifacts.infra_description(&request.vms, &names),
        )
        .await?;
        write_artifact(
            work_dir,
            USER_DATA_FILE,
            &self.artifacts.bootstrap_user_data(&users, &authorized_keys),
        )
        .await?;
        ctx.events.info(format!(
            "Wrote {} and {} for {} VM(s)",
            INFRA_FILE,
            USER_DATA_FILE,
            request.vms.len()
        ));

        let steps: [(&str, &str, &[&str]); 2] = [
            ("terraform_init", "Terraform Init", &["init", "-input=false", "-no-color"]),
            (
                "terraform_apply",
                "Terraform Apply",
                &["apply", "-auto-approve", "-input=false", "-no-color"],
            ),
        ];

        for (name, display_name, args) in steps {
            ctx.ensure_active()?;

            let invocation = ToolInvocation::new(&self.settings.terraform_bin, work_dir)
                .args(args.iter().copied())
                .automation_env();

            let mut stage = DeployStage::new(name, display_name);
            stage.start();
            ctx.track(&stage).await;
            ctx.events.info(format!(">>> {}", invocation.command_line()));

            let result = self.runner.run(&invocation, &ctx.events, &ctx.cancel_token).await;
            stage.finish(result.is_ok(), result.as_ref().err().map(ToString::to_string));
            ctx.track(&stage).await;
            result?;
        }

        ctx.events.info("Infrastructure provisioned");
        Ok(names)
    }

    /// Public keys for cloud-init; a configured but unreadable key is fatal
    async fn authorized_keys(&self, ctx: &DeployContext) -> Result<Vec<String>, DeployError> {
        let Some(path) = &self.settings.public_key_path else {
            ctx.events.warning(
                "SSH_PUBLIC_KEY_PATH is not set, VMs will not get an authorized key",
            );
            return Ok(Vec::new());
        };

        let key = tokio::fs::read_to_string(path).await.map_err(|e| {
            DeployError::Config(format!("cannot read public key {}: {}", path.display(), e))
        })?;
        Ok(vec![key.trim().to_string()])
    }

    /// Per-VM loop, reports in declaration order
    async fn deploy_vms(
        &self,
        ctx: &DeployContext,
        request: &DeploymentRequest,
        names: &InfraNames,
    ) -> Result<Vec<VmReport>, DeployError> {
        ctx.set_phase(PipelinePhase::Configuring).await;

        for vm in &request.vms {
            ctx.track(&DeployStage::new(&vm_stage_name(&vm.id), &vm.label))
                .await;
        }

        let concurrency = self.settings.vm_concurrency;
        let mut reports = Vec::with_capacity(request.vms.len());

        if concurrency <= 1 {
            for vm in &request.vms {
                ctx.ensure_active()?;
                reports.push(self.deploy_vm(ctx, request, names, vm).await);
            }
        } else {
            let semaphore = Semaphore::new(concurrency);
            let semaphore = &semaphore;
            let runs = request.vms.iter().map(|vm| async move {
                let _permit = semaphore.acquire().await.ok();
                self.deploy_vm(ctx, request, names, vm).await
            });
            reports = join_all(runs).await;
        }

        ctx.ensure_active()?;
        Ok(reports)
    }

    /// One VM; never fails the run
    async fn deploy_vm(
        &self,
        ctx: &DeployContext,
        request: &DeploymentRequest,
        names: &InfraNames,
        vm: &Vm,
    ) -> VmReport {
        let events = ctx.for_vm(&vm.id);
        let mut stage = DeployStage::new(&vm_stage_name(&vm.id), &vm.label);
        stage.start();
        ctx.track(&stage).await;

        // 本次运行的副本，发现阶段之后写入地址
        let mut vm = vm.clone();
        let result = self
            .configure_vm(ctx, &events, request, names, &mut vm)
            .await;

        let outcome = match result {
            Ok(()) => {
                events.success(format!(
                    "VM '{}' deployed at {}",
                    vm.label,
                    vm.address.as_deref().unwrap_or("-")
                ));
                stage.finish(true, None);
                VmOutcome::Deployed
            }
            Err(DeployError::DiscoveryMiss { infra_name }) => {
                let reason = format!("no address found for '{}'", infra_name);
                events.error(format!("VM '{}' skipped: {}", vm.label, reason));
                stage.skip(Some(reason.clone()));
                VmOutcome::Skipped { reason }
            }
            Err(e) => {
                let error = e.to_string();
                events.error(format!("VM '{}' failed: {}", vm.label, error));
                stage.finish(false, Some(error.clone()));
                VmOutcome::Failed { error }
            }
        };
        ctx.track(&stage).await;

        VmReport {
            vm_id: vm.id.clone(),
            label: vm.label.clone(),
            address: vm.address.clone(),
            outcome,
        }
    }

    /// Discovery, artifacts, reachability, remote execution
    async fn configure_vm(
        &self,
        ctx: &DeployContext,
        events: &EventSink,
        request: &DeploymentRequest,
        names: &InfraNames,
        vm: &mut Vm,
    ) -> Result<(), DeployError> {
        ctx.ensure_active()?;

        let infra_name = names
            .get(&vm.id)
            .ok_or_else(|| DeployError::Config(format!("no infra name for VM '{}'", vm.id)))?;
        events.info(format!("Resolving address of '{}'", infra_name));

        let resolved = self
            .discovery
            .resolve_address(infra_name)
            .await
            .ok_or_else(|| DeployError::DiscoveryMiss {
                infra_name: infra_name.to_string(),
            })?;
        vm.address = Some(resolved.clone());
        events.info(format!("'{}' is at {}", infra_name, resolved));

        let services = request.services_for(&vm.id);
        let strategy = self.executor.strategy();
        let artifacts = VmArtifacts {
            manifest: self.artifacts.service_manifest(&services),
            proxy_config: self.artifacts.proxy_config(&services, &request.edges),
            playbook: (strategy == DeployStrategy::Ansible)
                .then(|| self.artifacts.playbook(&vm.ssh_user, &self.settings.remote_dir)),
        };
        let vm_dir = self.write_vm_artifacts(&vm.id, &artifacts).await?;
        events.info(format!(
            "Wrote configuration for {} service(s) to {}",
            services.len(),
            vm_dir.display()
        ));

        ctx.ensure_active()?;
        let probe = tokio::select! {
            _ = ctx.cancel_token.cancelled() => Err(DeployError::Cancelled),
            result = self.prober.await_reachable(&resolved, events) => result,
        };
        match probe {
            Ok(()) => {}
            Err(e @ DeployError::ProbeTimeout { .. }) if self.settings.proceed_on_probe_timeout => {
                events.warning(format!("{}, continuing anyway", e));
            }
            Err(e) => return Err(e),
        }

        ctx.ensure_active()?;
        let target = VmTarget {
            vm_id: vm.id.clone(),
            label: vm.label.clone(),
            address: resolved,
            user: vm.ssh_user.clone(),
            work_dir: vm_dir,
            artifacts,
        };
        events.info(format!(
            "Configuring '{}' via {}",
            vm.label,
            strategy.as_str()
        ));
        self.executor.execute(&target, events, &ctx.cancel_token).await
    }

    /// Write the per-VM files verbatim into `<work_dir>/<vm id>/`
    async fn write_vm_artifacts(
        &self,
        vm_id: &str,
        artifacts: &VmArtifacts,
    ) -> Result<PathBuf, DeployError> {
        if vm_id.is_empty() || vm_id == "." || vm_id == ".." || vm_id.contains(['/', '\\']) {
            return Err(DeployError::Config(format!(
                "VM id '{}' cannot be used as a directory name",
                vm_id
            )));
        }

        let vm_dir = self.settings.work_dir.join(vm_id);
        tokio::fs::create_dir_all(&vm_dir).await?;

        write_artifact(&vm_dir, MANIFEST_FILE, &artifacts.manifest).await?;
        write_artifact(&vm_dir, PROXY_FILE, &artifacts.proxy_config).await?;
        if let Some(playbook) = &artifacts.playbook {
            write_artifact(&vm_dir, PLAYBOOK_FILE, playbook).await?;
        }

        Ok(vm_dir)
    }
}

fn vm_stage_name(vm_id: &str) -> String {
    format!("vm:{}", vm_id)
}

async fn write_artifact(dir: &Path, file: &str, contents: &str) -> Result<(), DeployError> {
    tokio::fs::write(dir.join(file), contents.as_bytes()).await?;
    Ok(())
}
