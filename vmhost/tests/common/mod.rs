//! Shared fixtures: a temp home with shell-script stand-ins for
//! `qemu-img`, `butane` and the hypervisor.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use vmhost::{
    BootstrapContext, BootstrapKind, CreateInstanceRequest, DataSize, DiskFormat, DisplayKind,
    HostOptions, NetworkKind, NetworkSpec, Task, TaskId, TaskTracker, VmHost,
};

pub const FAKE_DISK_TOOL: &str =
    "#!/bin/sh\nfor a in \"$@\"; do prev=$cur; cur=$a; done\ntouch \"$prev\"\n";
pub const FAKE_CONVERTER: &str = "#!/bin/sh\ncp \"$4\" \"$3\"\n";
pub const FAKE_HYPERVISOR: &str = "#!/bin/sh\nwhile :; do sleep 1; done\n";

pub const BUTANE: &str =
    "variant: fcos\nversion: 1.5.0\npasswd:\n  users:\n    - name: core\n# host {{ hostname }}\n";
pub const CLOUD_CONFIG: &str = "#cloud-config\nhostname: {{ hostname }}\n";

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub struct TestHome {
    pub tmp: TempDir,
    pub options: HostOptions,
}

impl TestHome {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let bin = tmp.path().join("bin");
        let fw = tmp.path().join("fw");
        std::fs::create_dir(&bin).unwrap();
        std::fs::create_dir(&fw).unwrap();
        std::fs::write(fw.join("OVMF_CODE.fd"), b"code").unwrap();
        std::fs::write(fw.join("OVMF_VARS.fd"), b"vars").unwrap();

        let options = HostOptions {
            home_dir: tmp.path().join("home"),
            disk_tool: write_script(&bin, "qemu-img", FAKE_DISK_TOOL),
            ignition_converter: write_script(&bin, "butane", FAKE_CONVERTER),
            hypervisor: write_script(&bin, "qemu-system-x86_64", FAKE_HYPERVISOR),
            firmware_code: fw.join("OVMF_CODE.fd"),
            firmware_vars: fw.join("OVMF_VARS.fd"),
            phone_home_timeout_secs: 1,
            ..Default::default()
        };
        Self { tmp, options }
    }

    pub async fn open(&self) -> VmHost {
        VmHost::open(self.options.clone()).await.unwrap()
    }
}

/// Register a base image, a shared network and a bootstrap; return a request using them.
pub async fn seed(host: &VmHost, name: &str, kind: BootstrapKind) -> CreateInstanceRequest {
    let image_path = host.layout().images_dir().join("fcos.qcow2");
    std::fs::write(&image_path, b"base image").unwrap();
    let image = host
        .register_image("fcos", "fcos.qcow2", DiskFormat::Qcow2)
        .await
        .unwrap();

    let network = host
        .create_network(NetworkSpec::new(
            "lan",
            NetworkKind::Shared,
            "10.0.0.0/24",
            Ipv4Addr::new(10, 0, 0, 1),
        ))
        .await
        .unwrap();

    let content = match kind {
        BootstrapKind::Ignition => BUTANE,
        BootstrapKind::CloudInit => CLOUD_CONFIG,
    };
    let bootstrap = host.create_bootstrap("base", kind, content).await.unwrap();

    CreateInstanceRequest {
        name: name.into(),
        image_id: image.id,
        network_id: network.id,
        bootstrap_id: bootstrap.id,
        vcpus: 2,
        ram: DataSize::gib(2),
        disk_size: DataSize::gib(10),
        display: DisplayKind::Headless,
        context: BootstrapContext::new(),
    }
}

/// Poll until the task is terminal.
pub async fn wait_terminal(tracker: &TaskTracker, id: &TaskId) -> Task {
    for _ in 0..500 {
        let task = tracker.get(id).unwrap();
        if task.state.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not finish", id);
}
