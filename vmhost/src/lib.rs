//! vmhost: local virtual machine provisioning and supervision.
//!
//! Provisions instances (working directory, firmware, copy-on-write OS
//! disk, rendered bootstrap), launches them under a hypervisor process and
//! reports long-running operations through polled [`Task`]s.
//!
//! ```ignore
//! let host = VmHost::open(HostOptions::from_env()).await?;
//! let network = host.create_network(NetworkSpec::new("lan", NetworkKind::Shared, "10.0.0.0/24", gw)).await?;
//! let task_id = host.orchestrator().spawn_create(request);
//! // poll host.tracker().get(&task_id) until DONE or FAILED
//! ```

pub mod bootstrap;
pub mod db;
pub mod disk;
pub mod errors;
pub mod images;
pub mod instance;
pub mod logging;
pub mod net;
pub mod orchestrator;
pub mod phone_home;
pub mod pipeline;
pub mod repo;
pub mod runtime;
pub mod task;
pub mod util;
pub mod vmm;

#[cfg(test)]
pub(crate) mod test_support;

pub use bootstrap::{Bootstrap, BootstrapContext, BootstrapKind};
pub use disk::{BackingFile, DataSize, Disk, DiskFormat, DiskSpec, DiskTool, SizeScale};
pub use errors::{VmhostError, VmhostResult};
pub use images::Image;
pub use instance::{DisplayKind, Instance, InstanceState, mac_from_uid};
pub use logging::init_logging_for;
pub use net::{Network, NetworkKind, NetworkSpec};
pub use orchestrator::{CreateInstanceRequest, InstanceOrchestrator, Repositories};
pub use phone_home::PhoneHome;
pub use repo::{Entity, MemoryRepository, Repository, SharedRepository};
pub use runtime::VmHost;
pub use runtime::layout::{HostLayout, InstanceLayout};
pub use runtime::options::HostOptions;
pub use task::{Task, TaskId, TaskState, TaskTracker};
pub use vmm::{ProcessSupervisor, VmmCommand, build_command};
