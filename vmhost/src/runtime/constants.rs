//! Runtime constants.
//!
//! Centralized location for file names, binaries and defaults.

/// External binaries (defaults, overridable in `HostOptions`).
pub mod binaries {
    pub const DISK_TOOL: &str = "qemu-img";
    pub const IGNITION_CONVERTER: &str = "butane";
    pub const HYPERVISOR: &str = "qemu-system-x86_64";
}

/// Environment variables read by `HostOptions`.
pub mod envs {
    pub const HOME: &str = "VMHOST_HOME";
    pub const DISK_TOOL: &str = "VMHOST_QEMU_IMG";
    pub const IGNITION_CONVERTER: &str = "VMHOST_BUTANE";
    pub const HYPERVISOR: &str = "VMHOST_HYPERVISOR";
}

pub mod defaults {
    pub const HOME_DIR_NAME: &str = ".vmhost";
    pub const MACHINE: &str = "q35";

    #[cfg(target_os = "macos")]
    pub const ACCELERATOR: &str = "hvf";
    #[cfg(not(target_os = "macos"))]
    pub const ACCELERATOR: &str = "kvm";

    pub const FIRMWARE_CODE: &str = "/usr/share/OVMF/OVMF_CODE.fd";
    pub const FIRMWARE_VARS: &str = "/usr/share/OVMF/OVMF_VARS.fd";

    pub const PHONE_HOME_TIMEOUT_SECS: u64 = 300;
}

/// Directory and file names under the host home.
pub mod dirs {
    pub const INSTANCES: &str = "instances";
    pub const IMAGES: &str = "images";
    pub const LOGS: &str = "logs";
    pub const DB: &str = "db";
    pub const DB_FILE: &str = "vmhost.db";
    pub const LOCK_FILE: &str = ".lock";
    pub const LOG_FILE_PREFIX: &str = "vmhost.log";
}

/// Artifacts inside one instance directory.
pub mod filenames {
    pub const OS_DISK_STEM: &str = "os";
    pub const UEFI_CODE: &str = "uefi_code.fd";
    pub const UEFI_VARS: &str = "uefi_vars.fd";
    pub const BOOTSTRAP_JSON: &str = "bootstrap.json";
    pub const BOOTSTRAP_YAML: &str = "bootstrap.yaml";
    pub const CONSOLE_LOG: &str = "console.log";
    pub const HYPERVISOR_LOG: &str = "hypervisor.log";
}

/// Hypervisor device wiring.
pub mod devices {
    /// VMware OUI used as the MAC vendor prefix.
    pub const MAC_VENDOR_PREFIX: &str = "00:50:56";
    pub const NETDEV_ID: &str = "net0";
    pub const NIC_MODEL: &str = "virtio-net-pci";
    /// fw_cfg key Ignition reads its config from.
    pub const IGNITION_FW_CFG: &str = "opt/com.coreos/config";
}
