//! Instance lifecycle: create, start/stop, remove.
//!
//! ## Creation
//!
//! ```text
//! resolve image/network/bootstrap
//!   → directory → firmware → os_disk → bootstrap → persist   (Task +18% each)
//!   → Task DONE (outcome = instance id)
//! ```
//!
//! Any failure after the directory exists rolls back the OS disk and the
//! directory, marks the Task FAILED with the error text and returns the
//! same error. Start, stop and remove on one instance id are serialized;
//! different ids run concurrently. Creation needs no lock: the id is fresh
//! and the directory is created atomically.

mod guard;
mod tasks;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::bootstrap::{Bootstrap, BootstrapContext};
use crate::disk::{DataSize, Disk, DiskTool};
use crate::errors::{VmhostError, VmhostResult};
use crate::images::Image;
use crate::instance::{DisplayKind, Instance, InstanceState, generate_instance_id, mac_from_uid};
use crate::net::Network;
use crate::phone_home::PhoneHome;
use crate::pipeline::PipelineExecutor;
use crate::repo::{MemoryRepository, SharedRepository};
use crate::runtime::layout::HostLayout;
use crate::runtime::lock::InstanceLocks;
use crate::runtime::options::HostOptions;
use crate::task::{TaskId, TaskTracker};
use crate::vmm::{HypervisorConfig, ProcessSupervisor};

use guard::CleanupGuard;
use tasks::{ProvisionContext, creation_plan, missing};

/// Share of the Task advanced by each provisioning step; DONE sets 100.
const PROGRESS_PER_STEP: u8 = 18;

/// Repositories for every entity the orchestrator touches.
#[derive(Clone)]
pub struct Repositories {
    pub instances: SharedRepository<Instance>,
    pub disks: SharedRepository<Disk>,
    pub networks: SharedRepository<Network>,
    pub bootstraps: SharedRepository<Bootstrap>,
    pub images: SharedRepository<Image>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            instances: MemoryRepository::shared(),
            disks: MemoryRepository::shared(),
            networks: MemoryRepository::shared(),
            bootstraps: MemoryRepository::shared(),
            images: MemoryRepository::shared(),
        }
    }
}

/// Input for instance creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Also the directory name under `instances/`.
    pub name: String,
    pub image_id: String,
    pub network_id: String,
    pub bootstrap_id: String,
    pub vcpus: u32,
    pub ram: DataSize,
    pub disk_size: DataSize,
    #[serde(default)]
    pub display: DisplayKind,
    /// Extra template values; `name`, `hostname`, `instance_id`, `mac` and
    /// `phone_home_url` are filled in by the orchestrator.
    #[serde(default)]
    pub context: BootstrapContext,
}

impl CreateInstanceRequest {
    fn validate(&self) -> VmhostResult<()> {
        let name = self.name.as_str();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\0')
        {
            return Err(VmhostError::InvalidArgument(format!(
                "invalid instance name '{}'",
                self.name
            )));
        }
        if self.vcpus == 0 {
            return Err(VmhostError::InvalidArgument(
                "vcpus must be at least 1".into(),
            ));
        }
        self.ram.bytes()?;
        self.disk_size.bytes()?;
        Ok(())
    }
}

pub(crate) struct OrchestratorInner {
    pub layout: HostLayout,
    pub options: HostOptions,
    pub tracker: TaskTracker,
    pub repos: Repositories,
    pub disk_tool: DiskTool,
    pub supervisor: ProcessSupervisor,
    pub phone_home: PhoneHome,
    pub locks: InstanceLocks,
}

/// Top-level instance workflow. Cheap to clone.
#[derive(Clone)]
pub struct InstanceOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl InstanceOrchestrator {
    pub fn new(
        layout: HostLayout,
        options: HostOptions,
        tracker: TaskTracker,
        repos: Repositories,
    ) -> Self {
        let supervisor = ProcessSupervisor::new(HypervisorConfig {
            binary: options.hypervisor.clone(),
            machine: options.machine.clone(),
            accelerator: options.accelerator.clone(),
        });
        Self::with_supervisor(layout, options, tracker, repos, supervisor)
    }

    pub fn with_supervisor(
        layout: HostLayout,
        options: HostOptions,
        tracker: TaskTracker,
        repos: Repositories,
        supervisor: ProcessSupervisor,
    ) -> Self {
        let disk_tool = DiskTool::new(options.disk_tool.clone());
        Self {
            inner: Arc::new(OrchestratorInner {
                layout,
                options,
                tracker,
                repos,
                disk_tool,
                supervisor,
                phone_home: PhoneHome::new(),
                locks: InstanceLocks::new(),
            }),
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub fn repos(&self) -> &Repositories {
        &self.inner.repos
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.inner.supervisor
    }

    pub fn phone_home(&self) -> &PhoneHome {
        &self.inner.phone_home
    }

    pub fn disk_tool(&self) -> &DiskTool {
        &self.inner.disk_tool
    }

    pub async fn get(&self, instance_id: &str) -> VmhostResult<Instance> {
        self.inner.repos.instances.get_by_uid(instance_id).await
    }

    pub async fn list(&self) -> VmhostResult<Vec<Instance>> {
        self.inner.repos.instances.list().await
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    /// Create an instance, tracking progress on a new Task.
    pub async fn create_instance(&self, request: CreateInstanceRequest) -> VmhostResult<Instance> {
        let description = format!("create instance {}", request.name);
        let task = self.inner.tracker.create(description);
        self.create_instance_with_task(&task.id, request).await
    }

    /// Start creation in the background and return the Task id immediately.
    pub fn spawn_create(&self, request: CreateInstanceRequest) -> TaskId {
        let description = format!("create instance {}", request.name);
        let task = self.inner.tracker.create(description);
        let this = self.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            // Outcome and error are recorded on the task.
            let _ = this.create_instance_with_task(&task_id, request).await;
        });
        task.id
    }

    /// Create an instance, reporting on an existing Task.
    ///
    /// On failure the Task is FAILED with the error's message and the same
    /// error is returned.
    pub async fn create_instance_with_task(
        &self,
        task_id: &TaskId,
        request: CreateInstanceRequest,
    ) -> VmhostResult<Instance> {
        match self.provision(task_id, request).await {
            Ok(instance) => {
                let message = format!("instance {} created", instance.name);
                self.inner
                    .tracker
                    .done(task_id, message, Some(instance.id.clone()))?;
                Ok(instance)
            }
            Err(e) => {
                let _ = self.inner.tracker.fail(task_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        task_id: &TaskId,
        request: CreateInstanceRequest,
    ) -> VmhostResult<Instance> {
        request.validate()?;

        let repos = &self.inner.repos;
        let image = repos.images.get_by_uid(&request.image_id).await?;
        let network = repos.networks.get_by_uid(&request.network_id).await?;
        let bootstrap = repos.bootstraps.get_by_uid(&request.bootstrap_id).await?;

        let instance_id = generate_instance_id();
        let mac = mac_from_uid(&instance_id)?;

        tracing::info!(
            instance_id = %instance_id,
            name = %request.name,
            image = %image.name,
            network = %network.name,
            bootstrap = %bootstrap.name,
            "Creating instance"
        );

        let ctx = Arc::new(Mutex::new(ProvisionContext {
            inner: Arc::clone(&self.inner),
            layout: self.inner.layout.instance(&request.name),
            request,
            instance_id: instance_id.clone(),
            mac,
            image,
            network,
            bootstrap,
            guard: CleanupGuard::new(),
            os_disk: None,
            bootstrap_file: None,
            instance: None,
        }));

        let tracker = &self.inner.tracker;
        let result = PipelineExecutor::execute(creation_plan(), Arc::clone(&ctx), |step| {
            let percent = PROGRESS_PER_STEP.saturating_mul(step.completed as u8);
            let _ = tracker.progress(task_id, percent, format!("{} done", step.task.name));
        })
        .await;

        let mut ctx = ctx.lock().await;
        match result {
            Ok(metrics) => {
                ctx.guard.disarm();
                metrics.log("create_instance");
                let instance = ctx.instance.take().ok_or_else(|| missing("persist"))?;
                tracing::info!(
                    instance_id = %instance.id,
                    name = %instance.name,
                    "Instance created"
                );
                Ok(instance)
            }
            Err(e) => {
                ctx.guard.rollback(&self.inner.repos.disks).await;
                Err(e)
            }
        }
    }

    // ========================================================================
    // START / STOP
    // ========================================================================

    /// Apply a requested state: STARTED starts, STOPPED stops, anything
    /// else leaves the instance as is.
    pub async fn modify(
        &self,
        instance_id: &str,
        requested: InstanceState,
    ) -> VmhostResult<Instance> {
        let (_lock, instance) = self.lock_instance(instance_id).await?;

        match requested {
            InstanceState::Started => self.start_locked(instance).await,
            InstanceState::Stopped => self.stop_locked(instance).await,
            InstanceState::Starting | InstanceState::Stopping => Ok(instance),
        }
    }

    /// Take the per-instance lock and read the record under it.
    ///
    /// Unknown ids never get a lock entry; an instance removed while we
    /// waited drops the entry again.
    async fn lock_instance(
        &self,
        instance_id: &str,
    ) -> VmhostResult<(OwnedMutexGuard<()>, Instance)> {
        self.get(instance_id).await?;

        let lock = self.inner.locks.acquire(instance_id).await;
        match self.get(instance_id).await {
            Ok(instance) => Ok((lock, instance)),
            Err(e) => {
                drop(lock);
                self.inner.locks.forget(instance_id);
                Err(e)
            }
        }
    }

    pub async fn start(&self, instance_id: &str) -> VmhostResult<Instance> {
        self.modify(instance_id, InstanceState::Started).await
    }

    pub async fn stop(&self, instance_id: &str) -> VmhostResult<Instance> {
        self.modify(instance_id, InstanceState::Stopped).await
    }

    async fn start_locked(&self, mut instance: Instance) -> VmhostResult<Instance> {
        let repos = &self.inner.repos;
        let network = repos.networks.get_by_uid(&instance.network_id).await?;
        let bootstrap = repos.bootstraps.get_by_uid(&instance.bootstrap_id).await?;
        let os_disk = repos.disks.get_by_uid(&instance.os_disk_id).await?;

        if !self.inner.supervisor.is_running(&instance.id) {
            instance.state = InstanceState::Starting;
            instance = repos.instances.modify(instance).await?;
        }

        let started = self
            .inner
            .supervisor
            .start(&mut instance, &network, bootstrap.kind, &os_disk)
            .await;
        let instance = repos.instances.modify(instance).await?;
        started.map(|_| instance)
    }

    async fn stop_locked(&self, mut instance: Instance) -> VmhostResult<Instance> {
        if self.inner.supervisor.has_handle(&instance.id) {
            instance.state = InstanceState::Stopping;
            instance = self.inner.repos.instances.modify(instance).await?;
        }

        let stopped = self.inner.supervisor.stop(&mut instance);
        let instance = self.inner.repos.instances.modify(instance).await?;
        stopped.map(|_| instance)
    }

    /// Wait until the instance phones home, bounded by the configured timeout.
    pub async fn wait_for_first_boot(&self, instance_id: &str) -> VmhostResult<()> {
        self.inner
            .phone_home
            .wait(instance_id, self.inner.options.phone_home_timeout())
            .await
    }

    // ========================================================================
    // REMOVE
    // ========================================================================

    /// Stop (if running), delete the working directory, the OS disk record
    /// and the instance record.
    pub async fn remove(&self, instance_id: &str) -> VmhostResult<()> {
        let description = format!("remove instance {}", instance_id);
        let task = self.inner.tracker.create(description);
        self.remove_with_task(&task.id, instance_id).await
    }

    /// Start removal in the background and return the Task id immediately.
    pub fn spawn_remove(&self, instance_id: &str) -> TaskId {
        let description = format!("remove instance {}", instance_id);
        let task = self.inner.tracker.create(description);
        let this = self.clone();
        let task_id = task.id.clone();
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            let _ = this.remove_with_task(&task_id, &instance_id).await;
        });
        task.id
    }

    pub async fn remove_with_task(&self, task_id: &TaskId, instance_id: &str) -> VmhostResult<()> {
        match self.remove_instance(task_id, instance_id).await {
            Ok(()) => {
                let message = format!("instance {} removed", instance_id);
                self.inner
                    .tracker
                    .done(task_id, message, Some(instance_id.to_string()))?;
                Ok(())
            }
            Err(e) => {
                let _ = self.inner.tracker.fail(task_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn remove_instance(&self, task_id: &TaskId, instance_id: &str) -> VmhostResult<()> {
        let tracker = &self.inner.tracker;
        let (lock, instance) = self.lock_instance(instance_id).await?;

        let instance = self.stop_locked(instance).await?;
        tracker.progress(task_id, 33, "stopped")?;

        match tokio::fs::remove_dir_all(&instance.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracker.progress(task_id, 66, "directory removed")?;

        self.inner.repos.disks.remove(&instance.os_disk_id).await?;
        self.inner.repos.instances.remove(&instance.id).await?;
        self.inner.phone_home.forget(&instance.id);

        drop(lock);
        self.inner.locks.forget(&instance.id);

        tracing::info!(instance_id = %instance.id, name = %instance.name, "Instance removed");
        Ok(())
    }

    // ========================================================================
    // HOST LIFECYCLE
    // ========================================================================

    /// Re-attach to a hypervisor left running by a previous host process,
    /// or reset the record to STOPPED when it is gone.
    pub(crate) async fn recover(&self, mut instance: Instance) -> VmhostResult<Instance> {
        if instance.state == InstanceState::Stopped && instance.pid.is_none() {
            return Ok(instance);
        }

        if self.inner.supervisor.attach(&instance) {
            instance.state = InstanceState::Started;
        } else {
            tracing::warn!(
                instance_id = %instance.id,
                pid = ?instance.pid,
                state = %instance.state,
                "Hypervisor gone, resetting instance to STOPPED"
            );
            instance.state = InstanceState::Stopped;
            instance.pid = None;
        }
        self.inner.repos.instances.modify(instance).await
    }

    /// Stop every instance with a live handle, concurrently.
    pub async fn stop_all(&self) -> Vec<VmhostResult<Instance>> {
        let ids = self.inner.supervisor.running_ids();
        futures::future::join_all(ids.iter().map(|id| self.stop(id))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapKind;
    use crate::disk::DiskFormat;
    use crate::net::{NetworkKind, NetworkSpec};
    use crate::task::TaskState;
    use crate::test_support::{FAKE_DISK_TOOL, FAKE_HYPERVISOR, write_script};
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    const BUTANE: &str = "variant: fcos\nversion: 1.5.0\n# {{ name }} {{ mac }}\n";

    struct Fixture {
        _tmp: TempDir,
        orchestrator: InstanceOrchestrator,
        layout: HostLayout,
        request: CreateInstanceRequest,
        image_path: std::path::PathBuf,
    }

    impl Fixture {
        async fn create(&self) -> VmhostResult<Instance> {
            self.orchestrator
                .create_instance(self.request.clone())
                .await
        }
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let fw = tmp.path().join("fw");
        std::fs::create_dir(&fw).unwrap();
        std::fs::write(fw.join("code.fd"), b"code").unwrap();
        std::fs::write(fw.join("vars.fd"), b"vars").unwrap();

        let options = HostOptions {
            home_dir: tmp.path().join("home"),
            disk_tool: write_script(&bin, "qemu-img", FAKE_DISK_TOOL),
            ignition_converter: write_script(&bin, "butane", "#!/bin/sh\ncp \"$4\" \"$3\"\n"),
            hypervisor: write_script(&bin, "qemu-system", FAKE_HYPERVISOR),
            firmware_code: fw.join("code.fd"),
            firmware_vars: fw.join("vars.fd"),
            ..Default::default()
        };
        let layout = HostLayout::new(options.home_dir.clone());
        layout.prepare().unwrap();

        let repos = Repositories::in_memory();
        let image_path = layout.images_dir().join("fcos.qcow2");
        std::fs::write(&image_path, b"base").unwrap();
        let image = Image::register("fcos", &image_path, DiskFormat::Qcow2).unwrap();
        let image = repos.images.create(image).await.unwrap();
        let spec = NetworkSpec::new(
            "lan",
            NetworkKind::Shared,
            "10.0.0.0/24",
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let network = Network::create(spec).unwrap();
        let network = repos.networks.create(network).await.unwrap();
        let bootstrap = Bootstrap::new("fcos", BootstrapKind::Ignition, BUTANE).unwrap();
        let bootstrap = repos.bootstraps.create(bootstrap).await.unwrap();

        let request = CreateInstanceRequest {
            name: "web-1".into(),
            image_id: image.id,
            network_id: network.id,
            bootstrap_id: bootstrap.id,
            vcpus: 2,
            ram: DataSize::gib(2),
            disk_size: DataSize::gib(10),
            display: DisplayKind::Headless,
            context: BootstrapContext::new(),
        };

        let orchestrator =
            InstanceOrchestrator::new(layout.clone(), options, TaskTracker::new(), repos);
        Fixture {
            orchestrator,
            layout,
            request,
            image_path,
            _tmp: tmp,
        }
    }

    #[tokio::test]
    async fn test_create_produces_artifacts_and_done_task() {
        let fx = fixture().await;
        let task = fx.orchestrator.tracker().create("create");

        let instance = fx
            .orchestrator
            .create_instance_with_task(&task.id, fx.request.clone())
            .await
            .unwrap();

        let dir = fx.layout.instance("web-1");
        assert_eq!(instance.path, dir.root());
        assert!(dir.os_disk_path(DiskFormat::Qcow2).exists());
        assert!(dir.uefi_code_path().exists());
        assert!(dir.uefi_vars_path().exists());
        assert!(instance.bootstrap_file.exists());
        assert!(instance.bootstrap_file.with_extension("yaml").exists());
        assert_eq!(instance.mac, mac_from_uid(&instance.id).unwrap());
        assert_eq!(instance.state, InstanceState::Stopped);

        let rendered = std::fs::read_to_string(&instance.bootstrap_file).unwrap();
        assert!(rendered.contains(&format!("web-1 {}", instance.mac)));

        let task = fx.orchestrator.tracker().get(&task.id).unwrap();
        assert_eq!(task.state, TaskState::Done);
        assert_eq!(task.percent_complete, 100);
        assert_eq!(task.outcome.as_deref(), Some(instance.id.as_str()));

        let repos = fx.orchestrator.repos();
        let disk = repos.disks.get_by_uid(&instance.os_disk_id).await.unwrap();
        assert_eq!(disk.backing.unwrap().path, fx.image_path);
    }

    #[tokio::test]
    async fn test_existing_directory_conflicts_and_is_kept() {
        let fx = fixture().await;
        let dir = fx.layout.instance("web-1");
        std::fs::create_dir(dir.root()).unwrap();
        std::fs::write(dir.root().join("keep"), b"").unwrap();

        let task = fx.orchestrator.tracker().create("create");
        let err = fx
            .orchestrator
            .create_instance_with_task(&task.id, fx.request.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, VmhostError::Conflict(_)));
        assert!(dir.root().join("keep").exists());
        let task = fx.orchestrator.tracker().get(&task.id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.message, err.to_string());
    }

    #[tokio::test]
    async fn test_missing_firmware_rolls_back() {
        let mut fx = fixture().await;
        let options = HostOptions {
            firmware_code: fx._tmp.path().join("missing.fd"),
            ..fx.orchestrator.inner.options.clone()
        };
        fx.orchestrator = InstanceOrchestrator::new(
            fx.layout.clone(),
            options,
            TaskTracker::new(),
            fx.orchestrator.repos().clone(),
        );

        let err = fx.create().await.unwrap_err();
        assert!(matches!(err, VmhostError::NotFound(_)));
        assert!(!fx.layout.instance("web-1").root().exists());
    }

    #[tokio::test]
    async fn test_missing_references_fail_without_side_effects() {
        let fx = fixture().await;
        let mut request = fx.request.clone();
        request.network_id = "nope".into();

        let task = fx.orchestrator.tracker().create("create");
        let err = fx
            .orchestrator
            .create_instance_with_task(&task.id, request)
            .await
            .unwrap_err();
        assert!(matches!(err, VmhostError::NotFound(_)));
        assert!(!fx.layout.instance("web-1").root().exists());
        let task = fx.orchestrator.tracker().get(&task.id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let fx = fixture().await;
        for name in ["", "..", "a/b"] {
            let mut request = fx.request.clone();
            request.name = name.into();
            assert!(matches!(
                fx.orchestrator.create_instance(request).await,
                Err(VmhostError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_modify_start_stop_and_noop_states() {
        let fx = fixture().await;
        let instance = fx.create().await.unwrap();

        let started = fx
            .orchestrator
            .modify(&instance.id, InstanceState::Started)
            .await
            .unwrap();
        assert_eq!(started.state, InstanceState::Started);
        assert!(started.pid.is_some());
        let stored = fx.orchestrator.get(&instance.id).await.unwrap();
        assert_eq!(stored.state, InstanceState::Started);

        let same = fx
            .orchestrator
            .modify(&instance.id, InstanceState::Stopping)
            .await
            .unwrap();
        assert_eq!(same.state, InstanceState::Started);

        let stopped = fx
            .orchestrator
            .modify(&instance.id, InstanceState::Stopped)
            .await
            .unwrap();
        assert_eq!(stopped.state, InstanceState::Stopped);
        assert!(stopped.pid.is_none());
        assert!(!fx.orchestrator.supervisor().has_handle(&instance.id));

        let again = fx.orchestrator.stop(&instance.id).await.unwrap();
        assert_eq!(again.state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_remove_running_instance() {
        let fx = fixture().await;
        let instance = fx.create().await.unwrap();
        fx.orchestrator.start(&instance.id).await.unwrap();

        fx.orchestrator.remove(&instance.id).await.unwrap();

        assert!(!instance.path.exists());
        assert!(!fx.orchestrator.supervisor().has_handle(&instance.id));
        assert!(matches!(
            fx.orchestrator.get(&instance.id).await,
            Err(VmhostError::NotFound(_))
        ));
        let disks = fx.orchestrator.repos().disks.list().await.unwrap();
        assert!(disks.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_create_returns_task_immediately() {
        let fx = fixture().await;
        let task_id = fx.orchestrator.spawn_create(fx.request.clone());

        let task = loop {
            let task = fx.orchestrator.tracker().get(&task_id).unwrap();
            if task.state.is_terminal() {
                break task;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        assert_eq!(task.state, TaskState::Done);

        let instance_id = task.outcome.unwrap();
        let remove_task = fx.orchestrator.spawn_remove(&instance_id);
        loop {
            let task = fx.orchestrator.tracker().get(&remove_task).unwrap();
            if task.state.is_terminal() {
                assert_eq!(task.state, TaskState::Done);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!fx.layout.instance("web-1").root().exists());
    }

    #[tokio::test]
    async fn test_unknown_or_failed_ids_leave_no_lock_entry() {
        let fx = fixture().await;

        assert!(matches!(
            fx.orchestrator.start("missing").await,
            Err(VmhostError::NotFound(_))
        ));
        assert!(matches!(
            fx.orchestrator.remove("missing").await,
            Err(VmhostError::NotFound(_))
        ));
        assert!(!fx.orchestrator.inner.locks.is_tracked("missing"));

        std::fs::remove_file(&fx.image_path).unwrap();
        fx.create().await.unwrap_err();
        assert!(fx.orchestrator.inner.locks.is_empty());
    }

    #[tokio::test]
    async fn test_remove_drops_lock_entry() {
        let fx = fixture().await;
        let instance = fx.create().await.unwrap();
        fx.orchestrator.start(&instance.id).await.unwrap();
        assert!(fx.orchestrator.inner.locks.is_tracked(&instance.id));

        fx.orchestrator.remove(&instance.id).await.unwrap();
        assert!(!fx.orchestrator.inner.locks.is_tracked(&instance.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_racing_remove_leaves_nothing_running() {
        let fx = fixture().await;

        for _ in 0..5 {
            let instance = fx.create().await.unwrap();

            let remove_task = fx.orchestrator.spawn_remove(&instance.id);
            let started = fx.orchestrator.start(&instance.id).await;
            assert!(matches!(started, Ok(_) | Err(VmhostError::NotFound(_))));

            let removal = loop {
                let task = fx.orchestrator.tracker().get(&remove_task).unwrap();
                if task.state.is_terminal() {
                    break task;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            };
            assert_eq!(removal.state, TaskState::Done, "{}", removal.message);

            assert!(!fx.orchestrator.supervisor().has_handle(&instance.id));
            assert!(!instance.path.exists());
            assert!(matches!(
                fx.orchestrator.get(&instance.id).await,
                Err(VmhostError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_recover_resets_dead_instance() {
        let fx = fixture().await;
        let mut instance = fx.create().await.unwrap();
        instance.state = InstanceState::Started;
        instance.pid = Some(999999999);
        let repos = fx.orchestrator.repos();
        let instance = repos.instances.modify(instance).await.unwrap();

        let recovered = fx.orchestrator.recover(instance).await.unwrap();
        assert_eq!(recovered.state, InstanceState::Stopped);
        assert!(recovered.pid.is_none());
    }
}
