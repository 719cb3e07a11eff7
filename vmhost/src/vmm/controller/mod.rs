//! Hypervisor process management.
//!
//! ## Architecture
//!
//! - **VmmController**: spawning (creates a VmmHandler)
//! - **VmmHandler**: operations on a running hypervisor (stop, liveness, pid)
//!
//! A handler can also be built straight from a PID, which is how instances
//! that survived a host restart are re-attached.

mod handler;
mod spawn;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::VmhostResult;
use crate::vmm::VmmCommand;

pub use handler::{HypervisorHandler, VmmHandler};

/// Trait for launching hypervisor processes.
#[async_trait]
pub trait VmmController: Send + Sync {
    /// Spawn `command`, with stdout/stderr appended to `log_path`.
    async fn start(
        &self,
        command: &VmmCommand,
        log_path: &Path,
    ) -> VmhostResult<Box<dyn VmmHandler>>;
}

/// Runs the hypervisor as a direct child of this process.
#[derive(Debug, Default)]
pub struct HypervisorController;

#[async_trait]
impl VmmController for HypervisorController {
    async fn start(
        &self,
        command: &VmmCommand,
        log_path: &Path,
    ) -> VmhostResult<Box<dyn VmmHandler>> {
        let child = spawn::spawn_hypervisor(command, log_path)?;
        Ok(Box::new(HypervisorHandler::from_child(child)?))
    }
}
