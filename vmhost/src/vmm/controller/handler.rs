//! VmmHandler - runtime operations on a running hypervisor.

use tokio::process::Child;

use crate::errors::{VmhostError, VmhostResult};
use crate::util::{is_process_alive, is_same_process, terminate_process};

/// Trait for runtime operations on a running hypervisor process.
pub trait VmmHandler: Send {
    /// Signal termination. Does not wait for the process to exit.
    fn stop(&mut self) -> VmhostResult<()>;

    /// Check if the process is still running (reaps it if it exited).
    fn is_running(&mut self) -> bool;

    /// Process ID of the hypervisor.
    fn pid(&self) -> u32;
}

/// Handler for a hypervisor we spawned or re-attached to by PID.
#[derive(Debug)]
pub struct HypervisorHandler {
    pid: u32,
    /// `None` when re-attached after a restart; such processes are not our children.
    child: Option<Child>,
}

impl HypervisorHandler {
    pub(crate) fn from_child(child: Child) -> VmhostResult<Self> {
        let Some(pid) = child.id() else {
            return Err(VmhostError::ProcessLaunch(
                "hypervisor exited before reporting a pid".into(),
            ));
        };
        Ok(Self {
            pid,
            child: Some(child),
        })
    }

    /// Attach to an existing hypervisor of `instance_id`.
    ///
    /// Returns `None` when the PID is gone or belongs to another process.
    pub fn attach(pid: u32, instance_id: &str) -> Option<Self> {
        if is_process_alive(pid) && is_same_process(pid, instance_id) {
            Some(Self { pid, child: None })
        } else {
            None
        }
    }
}

impl VmmHandler for HypervisorHandler {
    fn stop(&mut self) -> VmhostResult<()> {
        if let Some(child) = self.child.as_mut() {
            // Already exited: nothing to signal.
            if matches!(child.try_wait(), Ok(Some(_))) {
                return Ok(());
            }
        }

        if !terminate_process(self.pid) {
            return Err(VmhostError::Internal(format!(
                "failed to signal hypervisor pid {}",
                self.pid
            )));
        }
        tracing::debug!(pid = self.pid, "Sent SIGTERM to hypervisor");
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => is_process_alive(self.pid),
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}
