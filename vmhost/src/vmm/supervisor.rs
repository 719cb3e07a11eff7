//! ProcessSupervisor: owns hypervisor handles across start/stop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::command::{LaunchSpec, build_command};
use super::controller::{HypervisorController, HypervisorHandler, VmmController, VmmHandler};
use crate::bootstrap::BootstrapKind;
use crate::disk::Disk;
use crate::errors::VmhostResult;
use crate::instance::{Instance, InstanceState};
use crate::net::Network;
use crate::runtime::layout::InstanceLayout;

/// Hypervisor settings shared by every instance on the host.
#[derive(Debug, Clone)]
pub struct HypervisorConfig {
    pub binary: PathBuf,
    pub machine: String,
    pub accelerator: String,
}

/// Starts and stops hypervisor processes.
///
/// Handles are keyed by instance id and live only in this process; the
/// instance record carries the PID so a later process can re-attach.
pub struct ProcessSupervisor {
    config: HypervisorConfig,
    controller: Arc<dyn VmmController>,
    handlers: Mutex<HashMap<String, Box<dyn VmmHandler>>>,
}

impl ProcessSupervisor {
    pub fn new(config: HypervisorConfig) -> Self {
        Self::with_controller(config, Arc::new(HypervisorController))
    }

    pub fn with_controller(config: HypervisorConfig, controller: Arc<dyn VmmController>) -> Self {
        Self {
            config,
            controller,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Launch the hypervisor for `instance`.
    ///
    /// The command line is built first, so unsupported kinds fail before
    /// any process exists. On success the instance is STARTED with its pid
    /// recorded; on failure it is back to STOPPED. Starting an instance that
    /// already has a live process is a no-op.
    pub async fn start(
        &self,
        instance: &mut Instance,
        network: &Network,
        bootstrap_kind: BootstrapKind,
        os_disk: &Disk,
    ) -> VmhostResult<()> {
        if self.is_running(&instance.id) {
            tracing::debug!(instance_id = %instance.id, "Instance already running");
            instance.state = InstanceState::Started;
            return Ok(());
        }

        let command = build_command(
            &self.config.binary,
            &LaunchSpec {
                instance,
                network,
                bootstrap_kind,
                os_disk,
                machine: &self.config.machine,
                accelerator: &self.config.accelerator,
            },
        );
        let command = match command {
            Ok(command) => command,
            Err(e) => {
                instance.state = InstanceState::Stopped;
                instance.pid = None;
                return Err(e);
            }
        };

        instance.state = InstanceState::Starting;
        tracing::debug!(instance_id = %instance.id, command = %command, "Launching hypervisor");

        let log_path = InstanceLayout::new(instance.path.clone()).hypervisor_log_path();
        let handler = match self.controller.start(&command, &log_path).await {
            Ok(handler) => handler,
            Err(e) => {
                instance.state = InstanceState::Stopped;
                instance.pid = None;
                return Err(e);
            }
        };

        let pid = handler.pid();
        self.handlers.lock().insert(instance.id.clone(), handler);
        instance.pid = Some(pid);
        instance.state = InstanceState::Started;

        tracing::info!(instance_id = %instance.id, name = %instance.name, pid, "Instance started");
        Ok(())
    }

    /// Signal the hypervisor to terminate and forget its handle.
    ///
    /// No-op when no handle is held. Never waits for the process to exit.
    pub fn stop(&self, instance: &mut Instance) -> VmhostResult<()> {
        let handler = self.handlers.lock().remove(&instance.id);
        let Some(mut handler) = handler else {
            instance.state = InstanceState::Stopped;
            instance.pid = None;
            return Ok(());
        };

        instance.state = InstanceState::Stopping;
        if let Err(e) = handler.stop() {
            // Keep the handle so a retry can signal again.
            self.handlers.lock().insert(instance.id.clone(), handler);
            instance.state = InstanceState::Started;
            return Err(e);
        }

        instance.state = InstanceState::Stopped;
        instance.pid = None;
        tracing::info!(instance_id = %instance.id, name = %instance.name, "Instance stopped");
        Ok(())
    }

    /// Whether a live hypervisor is held for `instance_id`.
    pub fn is_running(&self, instance_id: &str) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.get_mut(instance_id) {
            Some(handler) => handler.is_running(),
            None => false,
        }
    }

    pub fn has_handle(&self, instance_id: &str) -> bool {
        self.handlers.lock().contains_key(instance_id)
    }

    /// Re-attach to the hypervisor recorded on `instance`.
    ///
    /// Returns `false` when the recorded pid is gone or was reused.
    pub fn attach(&self, instance: &Instance) -> bool {
        let Some(pid) = instance.pid else {
            return false;
        };
        match HypervisorHandler::attach(pid, &instance.id) {
            Some(handler) => {
                self.handlers
                    .lock()
                    .insert(instance.id.clone(), Box::new(handler));
                tracing::info!(instance_id = %instance.id, pid, "Re-attached to running instance");
                true
            }
            None => false,
        }
    }

    /// Ids of instances with a held handle.
    pub fn running_ids(&self) -> Vec<String> {
        self.handlers.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VmhostError;
    use crate::net::NetworkKind;
    use crate::test_support::{FAKE_HYPERVISOR, write_script};
    use crate::vmm::command::tests::{disk, instance, network};
    use std::time::Duration;

    fn supervisor(binary: PathBuf) -> ProcessSupervisor {
        ProcessSupervisor::new(HypervisorConfig {
            binary,
            machine: "q35".into(),
            accelerator: "tcg".into(),
        })
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(write_script(dir.path(), "qemu", FAKE_HYPERVISOR));
        let mut inst = instance(dir.path());
        let net = network(NetworkKind::Shared);

        supervisor
            .start(&mut inst, &net, BootstrapKind::Ignition, &disk(dir.path()))
            .await
            .unwrap();
        assert_eq!(inst.state, InstanceState::Started);
        let pid = inst.pid.unwrap();
        assert!(supervisor.is_running(&inst.id));
        assert!(crate::util::is_same_process(pid, &inst.id));

        supervisor.stop(&mut inst).unwrap();
        assert_eq!(inst.state, InstanceState::Stopped);
        assert!(inst.pid.is_none());
        assert!(!supervisor.has_handle(&inst.id));

        // Second stop is a no-op.
        supervisor.stop(&mut inst).unwrap();
        assert_eq!(inst.state, InstanceState::Stopped);

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(write_script(dir.path(), "qemu", FAKE_HYPERVISOR));
        let mut inst = instance(dir.path());
        let net = network(NetworkKind::Host);
        let os_disk = disk(dir.path());

        supervisor
            .start(&mut inst, &net, BootstrapKind::Ignition, &os_disk)
            .await
            .unwrap();
        let pid = inst.pid;
        supervisor
            .start(&mut inst, &net, BootstrapKind::Ignition, &os_disk)
            .await
            .unwrap();
        assert_eq!(inst.pid, pid);

        supervisor.stop(&mut inst).unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(dir.path().join("no-qemu"));
        let mut inst = instance(dir.path());

        let net = network(NetworkKind::Shared);
        let os_disk = disk(dir.path());
        let err = supervisor
            .start(&mut inst, &net, BootstrapKind::Ignition, &os_disk)
            .await
            .unwrap_err();
        assert!(matches!(err, VmhostError::ProcessLaunch(_)));
        assert_eq!(inst.state, InstanceState::Stopped);
        assert!(!supervisor.has_handle(&inst.id));
    }

    #[tokio::test]
    async fn test_cloud_init_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let binary = write_script(
            dir.path(),
            "qemu",
            &format!("#!/bin/sh\ntouch {}\n", marker.display()),
        );
        let supervisor = supervisor(binary);
        let mut inst = instance(dir.path());

        let net = network(NetworkKind::Shared);
        let os_disk = disk(dir.path());
        let err = supervisor
            .start(&mut inst, &net, BootstrapKind::CloudInit, &os_disk)
            .await
            .unwrap_err();
        assert!(matches!(err, VmhostError::UnsupportedConfiguration(_)));
        assert_eq!(inst.state, InstanceState::Stopped);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_attach_rejects_unrelated_pid() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor(dir.path().join("qemu"));
        let mut inst = instance(dir.path());
        inst.pid = Some(std::process::id());
        assert!(!supervisor.attach(&inst));
        inst.pid = None;
        assert!(!supervisor.attach(&inst));
    }
}
