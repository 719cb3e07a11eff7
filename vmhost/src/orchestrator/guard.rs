//! Rollback of a partially provisioned instance.

use std::path::PathBuf;

use crate::disk::Disk;
use crate::repo::SharedRepository;

/// RAII guard for cleanup on provisioning failure.
///
/// Armed once the instance directory exists. [`CleanupGuard::rollback`]
/// removes the OS disk record and the directory; if the guard is dropped
/// while still armed (e.g. the creating future was cancelled), `Drop`
/// removes the directory synchronously.
pub(crate) struct CleanupGuard {
    dir: Option<PathBuf>,
    disk: Option<Disk>,
    armed: bool,
}

impl CleanupGuard {
    pub(crate) fn new() -> Self {
        Self {
            dir: None,
            disk: None,
            armed: false,
        }
    }

    /// Register the freshly created instance directory and arm the guard.
    pub(crate) fn arm(&mut self, dir: PathBuf) {
        self.dir = Some(dir);
        self.armed = true;
    }

    /// Register the OS disk (file lives inside the directory; the record does not).
    pub(crate) fn set_disk(&mut self, disk: Disk) {
        self.disk = Some(disk);
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    /// Disarm the guard (call on success).
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }

    /// Undo everything registered so far, then disarm.
    pub(crate) async fn rollback(&mut self, disks: &SharedRepository<Disk>) {
        if !self.armed {
            return;
        }

        if let Some(disk) = self.disk.take() {
            if let Err(e) = tokio::fs::remove_file(&disk.path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(disk = %disk.path.display(), "Failed to remove OS disk: {}", e);
            }
            if let Err(e) = disks.remove(&disk.id).await {
                tracing::warn!(disk_id = %disk.id, "Failed to remove OS disk record: {}", e);
            }
        }

        if let Some(dir) = self.dir.as_ref()
            && let Err(e) = tokio::fs::remove_dir_all(dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(dir = %dir.display(), "Failed to remove instance directory: {}", e);
        }

        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        tracing::warn!("Instance provisioning interrupted, cleaning up");
        if let Some(ref dir) = self.dir
            && let Err(e) = std::fs::remove_dir_all(dir)
        {
            tracing::warn!("Failed to cleanup instance directory: {}", e);
        }
        if let Some(ref disk) = self.disk {
            tracing::warn!(
                disk_id = %disk.id,
                "OS disk record left behind after interrupted provisioning"
            );
        }
    }
}
