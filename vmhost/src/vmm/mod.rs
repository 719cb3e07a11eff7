//! Hypervisor command construction and process supervision.

mod command;
pub mod controller;
mod supervisor;

pub use command::{LaunchSpec, VmmCommand, build_command};
pub use controller::{HypervisorController, HypervisorHandler, VmmController, VmmHandler};
pub use supervisor::{HypervisorConfig, ProcessSupervisor};
