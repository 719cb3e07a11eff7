//! Filesystem layout of a vmhost home directory.
//!
//! ```text
//! <home>/
//!   .lock
//!   db/vmhost.db
//!   images/
//!   logs/vmhost.log.<date>
//!   instances/<name>/
//!     os.qcow2  uefi_code.fd  uefi_vars.fd
//!     bootstrap.yaml  bootstrap.json
//!     console.log  hypervisor.log
//! ```

use std::path::{Path, PathBuf};

use crate::bootstrap::BootstrapKind;
use crate::disk::DiskFormat;
use crate::errors::VmhostResult;
use crate::runtime::constants::{dirs, filenames};

#[derive(Debug, Clone)]
pub struct HostLayout {
    home_dir: PathBuf,
}

impl HostLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::INSTANCES)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::IMAGES)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS)
    }

    pub fn db_path(&self) -> PathBuf {
        self.home_dir.join(dirs::DB).join(dirs::DB_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home_dir.join(dirs::LOCK_FILE)
    }

    /// Layout for one instance. The directory is keyed by instance name.
    pub fn instance(&self, name: &str) -> InstanceLayout {
        InstanceLayout::new(self.instances_dir().join(name))
    }

    /// Create the top-level directories.
    pub fn prepare(&self) -> VmhostResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.instances_dir(),
            self.images_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// Paths of the artifacts inside one instance directory.
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    root: PathBuf,
}

impl InstanceLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn os_disk_path(&self, format: DiskFormat) -> PathBuf {
        let name = format!("{}.{}", filenames::OS_DISK_STEM, format.extension());
        self.root.join(name)
    }

    pub fn uefi_code_path(&self) -> PathBuf {
        self.root.join(filenames::UEFI_CODE)
    }

    pub fn uefi_vars_path(&self) -> PathBuf {
        self.root.join(filenames::UEFI_VARS)
    }

    /// Final rendered bootstrap file handed to the guest.
    pub fn bootstrap_output_path(&self, kind: BootstrapKind) -> PathBuf {
        match kind {
            BootstrapKind::CloudInit => self.root.join(filenames::BOOTSTRAP_YAML),
            BootstrapKind::Ignition => self.root.join(filenames::BOOTSTRAP_JSON),
        }
    }

    pub fn console_log_path(&self) -> PathBuf {
        self.root.join(filenames::CONSOLE_LOG)
    }

    pub fn hypervisor_log_path(&self) -> PathBuf {
        self.root.join(filenames::HYPERVISOR_LOG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_artifact_names() {
        let layout = HostLayout::new(PathBuf::from("/srv/vmhost"));
        let instance = layout.instance("web");

        assert_eq!(instance.root(), Path::new("/srv/vmhost/instances/web"));
        assert_eq!(
            instance.os_disk_path(DiskFormat::Qcow2),
            PathBuf::from("/srv/vmhost/instances/web/os.qcow2")
        );
        assert_eq!(
            instance.bootstrap_output_path(BootstrapKind::Ignition),
            PathBuf::from("/srv/vmhost/instances/web/bootstrap.json")
        );
        assert_eq!(
            instance.bootstrap_output_path(BootstrapKind::CloudInit),
            PathBuf::from("/srv/vmhost/instances/web/bootstrap.yaml")
        );
    }

    #[test]
    fn test_prepare_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = HostLayout::new(dir.path().join("home"));
        layout.prepare().unwrap();

        assert!(layout.instances_dir().is_dir());
        assert!(layout.images_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }
}
