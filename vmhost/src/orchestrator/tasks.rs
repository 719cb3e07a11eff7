//! Provisioning tasks, run in order by the creation pipeline.
//!
//! ```text
//! directory → firmware → os_disk → bootstrap → persist
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use super::guard::CleanupGuard;
use super::{CreateInstanceRequest, OrchestratorInner};
use crate::bootstrap::{Bootstrap, BootstrapContext};
use crate::disk::{Disk, DiskFormat, DiskSpec};
use crate::errors::{VmhostError, VmhostResult};
use crate::images::Image;
use crate::instance::{Instance, InstanceState};
use crate::net::Network;
use crate::pipeline::{BoxedTask, ExecutionPlan, PipelineTask};
use crate::runtime::layout::InstanceLayout;

pub(crate) type ProvisionCtx = Arc<Mutex<ProvisionContext>>;

/// State shared by the provisioning tasks.
pub(crate) struct ProvisionContext {
    pub inner: Arc<OrchestratorInner>,
    pub request: CreateInstanceRequest,
    pub instance_id: String,
    pub mac: String,
    pub layout: InstanceLayout,
    pub image: Image,
    pub network: Network,
    pub bootstrap: Bootstrap,
    pub guard: CleanupGuard,
    pub os_disk: Option<Disk>,
    pub bootstrap_file: Option<PathBuf>,
    pub instance: Option<Instance>,
}

pub(crate) fn creation_plan() -> ExecutionPlan<ProvisionCtx> {
    let tasks: Vec<BoxedTask<ProvisionCtx>> = vec![
        Box::new(DirectoryTask),
        Box::new(FirmwareTask),
        Box::new(OsDiskTask),
        Box::new(BootstrapTask),
        Box::new(PersistTask),
    ];
    ExecutionPlan::new(tasks)
}

async fn task_start(ctx: &ProvisionCtx, task_name: &str) -> String {
    let ctx = ctx.lock().await;
    tracing::debug!(
        instance_id = %ctx.instance_id,
        name = %ctx.request.name,
        task = task_name,
        "Provisioning task starting"
    );
    ctx.instance_id.clone()
}

fn log_task_error(instance_id: &str, task_name: &str, error: &VmhostError) {
    tracing::warn!(
        instance_id,
        task = task_name,
        "Provisioning task failed: {}",
        error
    );
}

pub(crate) fn missing(task: &str) -> VmhostError {
    VmhostError::Internal(format!("{} task must run first", task))
}

/// Claim the instance directory. Fails `Conflict` if it exists.
pub(crate) struct DirectoryTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for DirectoryTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> VmhostResult<()> {
        let task_name = self.name();
        let instance_id = task_start(&ctx, task_name).await;

        let root = ctx.lock().await.layout.root().to_path_buf();

        // Non-recursive create: the existence check and the claim are one step.
        match tokio::fs::create_dir(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let err = VmhostError::Conflict(format!(
                    "instance directory {} already exists",
                    root.display()
                ));
                log_task_error(&instance_id, task_name, &err);
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        }

        ctx.lock().await.guard.arm(root);
        Ok(())
    }

    fn name(&self) -> &str {
        "directory"
    }
}

/// Copy the UEFI code and variable store into the instance directory.
pub(crate) struct FirmwareTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for FirmwareTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> VmhostResult<()> {
        let task_name = self.name();
        let instance_id = task_start(&ctx, task_name).await;

        let (code_src, vars_src, layout) = {
            let ctx = ctx.lock().await;
            (
                ctx.inner.options.firmware_code.clone(),
                ctx.inner.options.firmware_vars.clone(),
                ctx.layout.clone(),
            )
        };

        for (src, dst) in [
            (code_src, layout.uefi_code_path()),
            (vars_src, layout.uefi_vars_path()),
        ] {
            copy_firmware(&src, &dst)
                .await
                .inspect_err(|e| log_task_error(&instance_id, task_name, e))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "firmware"
    }
}

async fn copy_firmware(src: &std::path::Path, dst: &std::path::Path) -> VmhostResult<()> {
    tokio::fs::copy(src, dst).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            VmhostError::NotFound(format!("firmware image {}", src.display()))
        } else {
            VmhostError::Io(e)
        }
    })?;
    Ok(())
}

/// Create the copy-on-write OS disk over the selected image.
pub(crate) struct OsDiskTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for OsDiskTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> VmhostResult<()> {
        let task_name = self.name();
        let instance_id = task_start(&ctx, task_name).await;

        let (inner, spec) = {
            let ctx = ctx.lock().await;
            let spec = DiskSpec {
                name: format!("{}-os", ctx.request.name),
                path: ctx.layout.os_disk_path(DiskFormat::Qcow2),
                size: ctx.request.disk_size,
                format: DiskFormat::Qcow2,
                backing: Some(ctx.image.as_backing()),
            };
            (Arc::clone(&ctx.inner), spec)
        };

        let disk = inner
            .disk_tool
            .create(spec)
            .await
            .inspect_err(|e| log_task_error(&instance_id, task_name, e))?;
        ctx.lock().await.guard.set_disk(disk.clone());

        let disk = inner
            .repos
            .disks
            .create(disk)
            .await
            .inspect_err(|e| log_task_error(&instance_id, task_name, e))?;
        ctx.lock().await.os_disk = Some(disk);
        Ok(())
    }

    fn name(&self) -> &str {
        "os_disk"
    }
}

/// Render the bootstrap file into the instance directory.
pub(crate) struct BootstrapTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for BootstrapTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> VmhostResult<()> {
        let task_name = self.name();
        let instance_id = task_start(&ctx, task_name).await;

        let (bootstrap, context, output, converter) = {
            let ctx = ctx.lock().await;
            (
                ctx.bootstrap.clone(),
                bootstrap_context(&ctx),
                ctx.layout.bootstrap_output_path(ctx.bootstrap.kind),
                ctx.inner.options.ignition_converter.clone(),
            )
        };

        bootstrap
            .render(&context, &output, &converter)
            .await
            .inspect_err(|e| log_task_error(&instance_id, task_name, e))?;

        ctx.lock().await.bootstrap_file = Some(output);
        Ok(())
    }

    fn name(&self) -> &str {
        "bootstrap"
    }
}

/// Caller extras first; the built-in keys always win.
fn bootstrap_context(ctx: &ProvisionContext) -> BootstrapContext {
    let mut context = ctx.request.context.clone();
    context.insert("name".into(), Value::from(ctx.request.name.clone()));
    context.insert("hostname".into(), Value::from(ctx.request.name.clone()));
    context.insert("instance_id".into(), Value::from(ctx.instance_id.clone()));
    context.insert("mac".into(), Value::from(ctx.mac.clone()));
    if let Some(url) = ctx.inner.options.phone_home_url(&ctx.instance_id) {
        context.insert("phone_home_url".into(), Value::from(url));
    }
    context
}

/// Persist the instance record.
pub(crate) struct PersistTask;

#[async_trait]
impl PipelineTask<ProvisionCtx> for PersistTask {
    async fn run(self: Box<Self>, ctx: ProvisionCtx) -> VmhostResult<()> {
        let task_name = self.name();
        let instance_id = task_start(&ctx, task_name).await;

        let (inner, instance) = {
            let ctx = ctx.lock().await;
            let os_disk = ctx.os_disk.as_ref().ok_or_else(|| missing("os_disk"))?;
            let bootstrap_file = ctx
                .bootstrap_file
                .clone()
                .ok_or_else(|| missing("bootstrap"))?;
            let instance = Instance {
                id: ctx.instance_id.clone(),
                name: ctx.request.name.clone(),
                path: ctx.layout.root().to_path_buf(),
                firmware_code: ctx.layout.uefi_code_path(),
                firmware_vars: ctx.layout.uefi_vars_path(),
                vcpus: ctx.request.vcpus,
                ram: ctx.request.ram,
                mac: ctx.mac.clone(),
                os_disk_id: os_disk.id.clone(),
                network_id: ctx.network.id.clone(),
                bootstrap_id: ctx.bootstrap.id.clone(),
                bootstrap_file,
                display: ctx.request.display,
                state: InstanceState::Stopped,
                pid: None,
                created_at: Utc::now(),
            };
            (Arc::clone(&ctx.inner), instance)
        };

        let instance = inner
            .repos
            .instances
            .create(instance)
            .await
            .inspect_err(|e| log_task_error(&instance_id, task_name, e))?;
        ctx.lock().await.instance = Some(instance);
        Ok(())
    }

    fn name(&self) -> &str {
        "persist"
    }
}
