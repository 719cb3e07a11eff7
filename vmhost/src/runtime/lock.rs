//! Locks: one process per home directory, one operation per instance.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::{VmhostError, VmhostResult};

/// Exclusive `flock` on the home directory's lock file.
///
/// Released when dropped (the kernel drops the lock with the descriptor).
#[derive(Debug)]
pub struct RuntimeLock {
    _file: File,
    path: PathBuf,
}

impl RuntimeLock {
    pub fn acquire(lock_path: &Path) -> VmhostResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?;

        // SAFETY: the descriptor is owned by `file` and valid for this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(VmhostError::Conflict(format!(
                "another vmhost process holds {}",
                lock_path.display()
            )));
        }

        tracing::debug!(path = %lock_path.display(), "Acquired runtime lock");
        Ok(Self {
            _file: file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-instance async mutexes.
///
/// Start/stop/remove on the same instance id run one at a time;
/// operations on different ids never contend.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance_id`.
    pub async fn acquire(&self, instance_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(instance_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the mutex of a removed instance.
    pub fn forget(&self, instance_id: &str) {
        self.locks.lock().remove(instance_id);
    }

    #[cfg(test)]
    pub(crate) fn is_tracked(&self, instance_id: &str) -> bool {
        self.locks.lock().contains_key(instance_id)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_runtime_lock_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");

        let first = RuntimeLock::acquire(&path).unwrap();
        assert!(matches!(
            RuntimeLock::acquire(&path),
            Err(VmhostError::Conflict(_))
        ));

        drop(first);
        RuntimeLock::acquire(&path).unwrap();
    }

    #[tokio::test]
    async fn test_same_id_serializes() {
        let locks = Arc::new(InstanceLocks::new());
        let guard = locks.acquire("vm-1").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("vm-1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_ids_do_not_contend() {
        let locks = InstanceLocks::new();
        let _a = locks.acquire("vm-1").await;
        let acquired =
            tokio::time::timeout(Duration::from_millis(100), locks.acquire("vm-2")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_forget_drops_entry() {
        let locks = InstanceLocks::new();
        drop(locks.acquire("vm-1").await);
        assert!(locks.is_tracked("vm-1"));

        locks.forget("vm-1");
        assert!(!locks.is_tracked("vm-1"));
    }
}
