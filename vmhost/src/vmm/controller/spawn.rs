//! Subprocess spawning for the hypervisor binary.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::errors::{VmhostError, VmhostResult};
use crate::vmm::VmmCommand;

/// Spawn the hypervisor detached from our stdio.
///
/// stdin is null; stdout and stderr are appended to `log_path` so boot
/// failures can be diagnosed after the fact.
pub(crate) fn spawn_hypervisor(command: &VmmCommand, log_path: &Path) -> VmhostResult<Child> {
    let log = OpenOptions::new().create(true).append(true).open(log_path)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(false);

    cmd.spawn().map_err(|e| {
        let err_msg = format!(
            "Failed to spawn hypervisor at {}: {}",
            command.program.display(),
            e
        );
        tracing::error!("{}", err_msg);
        VmhostError::ProcessLaunch(err_msg)
    })
}
