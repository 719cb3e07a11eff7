//! Hypervisor command-line construction.
//!
//! Pure: no I/O, no process spawning. Every unsupported combination of
//! network, bootstrap and display kind is rejected here, before anything
//! is launched.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::bootstrap::BootstrapKind;
use crate::disk::Disk;
use crate::errors::{VmhostError, VmhostResult};
use crate::instance::{DisplayKind, Instance};
use crate::net::{Network, NetworkKind};
use crate::runtime::constants::devices;
use crate::runtime::layout::InstanceLayout;

/// Everything the command line is derived from.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    pub instance: &'a Instance,
    pub network: &'a Network,
    pub bootstrap_kind: BootstrapKind,
    pub os_disk: &'a Disk,
    pub machine: &'a str,
    pub accelerator: &'a str,
}

/// A program and its arguments, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmmCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl VmmCommand {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for VmmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

pub fn build_command(hypervisor: &Path, spec: &LaunchSpec<'_>) -> VmhostResult<VmmCommand> {
    let instance = spec.instance;
    let layout = InstanceLayout::new(instance.path.clone());
    let mut args = Vec::new();

    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };

    // process=vmhost-<id> lets recovery recognize the process by its cmdline.
    push(
        "-name",
        format!("guest={},process=vmhost-{}", instance.name, instance.id),
    );
    if let Ok(uuid) = uuid::Uuid::parse_str(&instance.id) {
        push("-uuid", uuid.hyphenated().to_string());
    }
    push(
        "-machine",
        format!("{},accel={}", spec.machine, spec.accelerator),
    );
    push("-cpu", "host".to_string());
    push("-smp", instance.vcpus.to_string());
    push("-m", instance.ram.to_string());

    for (flag, value) in display_args(instance.display) {
        push(flag, value);
    }
    push(
        "-serial",
        format!("file:{}", layout.console_log_path().display()),
    );

    push(
        "-drive",
        format!(
            "if=virtio,format={},file={}",
            spec.os_disk.format,
            spec.os_disk.path.display()
        ),
    );

    for (flag, value) in network_args(spec.network, &instance.mac)? {
        push(flag, value);
    }
    for (flag, value) in bootstrap_args(spec.bootstrap_kind, instance)? {
        push(flag, value);
    }

    Ok(VmmCommand {
        program: hypervisor.to_path_buf(),
        args,
    })
}

fn display_args(display: DisplayKind) -> Vec<(&'static str, String)> {
    match display {
        DisplayKind::Headless => vec![("-display", "none".into())],
        DisplayKind::Vnc { display } => vec![
            ("-display", "none".into()),
            ("-vnc", format!("127.0.0.1:{}", display)),
        ],
        DisplayKind::Native => vec![("-display", "default".into())],
    }
}

fn network_args(network: &Network, mac: &str) -> VmhostResult<Vec<(&'static str, String)>> {
    let netdev = match network.kind {
        NetworkKind::Host | NetworkKind::Shared => format!(
            "vmnet-{},id={},start-address={},end-address={},subnet-mask={}",
            network.kind,
            devices::NETDEV_ID,
            network.dhcp_start,
            network.dhcp_end,
            network.netmask()
        ),
        NetworkKind::Bridged => {
            let ifname = network.bridge_interface.as_deref().ok_or_else(|| {
                VmhostError::UnsupportedConfiguration(format!(
                    "bridged network '{}' has no host interface",
                    network.name
                ))
            })?;
            format!("vmnet-bridged,id={},ifname={}", devices::NETDEV_ID, ifname)
        }
    };

    Ok(vec![
        ("-netdev", netdev),
        (
            "-device",
            format!(
                "{},netdev={},mac={}",
                devices::NIC_MODEL,
                devices::NETDEV_ID,
                mac
            ),
        ),
    ])
}

fn bootstrap_args(
    kind: BootstrapKind,
    instance: &Instance,
) -> VmhostResult<Vec<(&'static str, String)>> {
    match kind {
        BootstrapKind::Ignition => Ok(vec![
            (
                "-fw_cfg",
                format!(
                    "name={},file={}",
                    devices::IGNITION_FW_CFG,
                    instance.bootstrap_file.display()
                ),
            ),
            (
                "-drive",
                format!(
                    "if=pflash,format=raw,readonly=on,file={}",
                    instance.firmware_code.display()
                ),
            ),
            (
                "-drive",
                format!(
                    "if=pflash,format=raw,file={}",
                    instance.firmware_vars.display()
                ),
            ),
        ]),
        // Needs a seed data disk, which this host does not build.
        BootstrapKind::CloudInit => Err(VmhostError::UnsupportedConfiguration(
            "cloud-init bootstrap is not supported for process launch".into(),
        )),
    }
}
