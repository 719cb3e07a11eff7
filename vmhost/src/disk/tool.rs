//! Disk creation and resizing through the external disk-image tool.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::process::Command;

use super::{BackingFile, DataSize, Disk, DiskFormat};
use crate::errors::{VmhostError, VmhostResult};

/// What to create.
#[derive(Debug, Clone)]
pub struct DiskSpec {
    pub name: String,
    pub path: PathBuf,
    pub size: DataSize,
    pub format: DiskFormat,
    /// Backing image for copy-on-write disks.
    pub backing: Option<BackingFile>,
}

/// Wrapper around `qemu-img`.
#[derive(Debug, Clone)]
pub struct DiskTool {
    binary: PathBuf,
}

impl DiskTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Create a disk image.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the target path exists
    /// - `NotFound` if the backing image is missing
    /// - `InvalidArgument` for a backing file on a raw disk
    /// - `ProcessLaunch` / `Disk` if the tool cannot run or fails
    pub async fn create(&self, spec: DiskSpec) -> VmhostResult<Disk> {
        if tokio::fs::try_exists(&spec.path).await? {
            return Err(VmhostError::Conflict(format!(
                "disk path {} already exists",
                spec.path.display()
            )));
        }

        if let Some(backing) = &spec.backing {
            if spec.format != DiskFormat::Qcow2 {
                return Err(VmhostError::InvalidArgument(format!(
                    "{} disks cannot have a backing file",
                    spec.format
                )));
            }
            if !tokio::fs::try_exists(&backing.path).await? {
                return Err(VmhostError::NotFound(format!(
                    "backing image {}",
                    backing.path.display()
                )));
            }
        }

        let args = create_args(&spec);
        tracing::debug!(
            disk = %spec.path.display(),
            size = %spec.size,
            format = %spec.format,
            "Creating disk"
        );
        self.run(&args).await?;

        Ok(Disk {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: spec.name,
            path: spec.path,
            size: spec.size,
            format: spec.format,
            backing: spec.backing,
            created_at: Utc::now(),
        })
    }

    /// Grow a disk to `size`.
    ///
    /// Shrinking is refused: guest filesystems are not resized here.
    pub async fn resize(&self, disk: &mut Disk, size: DataSize) -> VmhostResult<()> {
        if size.bytes()? < disk.size.bytes()? {
            return Err(VmhostError::InvalidArgument(format!(
                "refusing to shrink {} from {} to {}",
                disk.path.display(),
                disk.size,
                size
            )));
        }
        if !tokio::fs::try_exists(&disk.path).await? {
            return Err(VmhostError::NotFound(format!(
                "disk {}",
                disk.path.display()
            )));
        }

        let args = vec![
            "resize".to_string(),
            "-f".to_string(),
            disk.format.as_str().to_string(),
            disk.path.display().to_string(),
            size.to_string(),
        ];
        tracing::debug!(
            disk = %disk.path.display(),
            from = %disk.size,
            to = %size,
            "Resizing disk"
        );
        self.run(&args).await?;

        disk.size = size;
        Ok(())
    }

    async fn run(&self, args: &[String]) -> VmhostResult<()> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                VmhostError::ProcessLaunch(format!(
                    "failed to run disk tool {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VmhostError::Disk(format!(
                "{} {} exited with {}: {}",
                self.binary.display(),
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn create_args(spec: &DiskSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "-f".to_string(),
        spec.format.as_str().to_string(),
    ];
    if let Some(backing) = &spec.backing {
        args.push("-F".to_string());
        args.push(backing.format.as_str().to_string());
        args.push("-b".to_string());
        args.push(backing.path.display().to_string());
    }
    args.push(spec.path.display().to_string());
    args.push(spec.size.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FAKE_DISK_TOOL, write_script};

    fn spec(dir: &Path, backing: Option<BackingFile>) -> DiskSpec {
        DiskSpec {
            name: "os".into(),
            path: dir.join("os.qcow2"),
            size: DataSize::gib(5),
            format: DiskFormat::Qcow2,
            backing,
        }
    }

    #[test]
    fn test_create_args_with_backing() {
        let args = create_args(&spec(
            Path::new("/vm"),
            Some(BackingFile {
                path: PathBuf::from("/images/base.qcow2"),
                format: DiskFormat::Qcow2,
            }),
        ));
        assert_eq!(
            args,
            [
                "create",
                "-f",
                "qcow2",
                "-F",
                "qcow2",
                "-b",
                "/images/base.qcow2",
                "/vm/os.qcow2",
                "5G"
            ]
        );
    }

    #[tokio::test]
    async fn test_create_invokes_tool() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DiskTool::new(write_script(dir.path(), "qemu-img", FAKE_DISK_TOOL));

        let disk = tool.create(spec(dir.path(), None)).await.unwrap();
        assert!(disk.path.exists());
        assert_eq!(disk.size, DataSize::gib(5));
    }

    #[tokio::test]
    async fn test_existing_path_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("os.qcow2"), b"").unwrap();
        let tool = DiskTool::new("/nonexistent/qemu-img");

        assert!(matches!(
            tool.create(spec(dir.path(), None)).await,
            Err(VmhostError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_backing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DiskTool::new("/nonexistent/qemu-img");
        let backing = BackingFile {
            path: dir.path().join("missing.qcow2"),
            format: DiskFormat::Qcow2,
        };

        assert!(matches!(
            tool.create(spec(dir.path(), Some(backing))).await,
            Err(VmhostError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_tool_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DiskTool::new(dir.path().join("no-such-tool"));
        assert!(matches!(
            tool.create(spec(dir.path(), None)).await,
            Err(VmhostError::ProcessLaunch(_))
        ));
    }

    #[tokio::test]
    async fn test_tool_failure_is_disk_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DiskTool::new(write_script(
            dir.path(),
            "qemu-img",
            "#!/bin/sh\necho 'Could not create' >&2\nexit 1\n",
        ));
        let err = tool.create(spec(dir.path(), None)).await.unwrap_err();
        assert!(matches!(err, VmhostError::Disk(_)));
        assert!(err.to_string().contains("Could not create"));
    }

    #[tokio::test]
    async fn test_resize_refuses_shrink() {
        let dir = tempfile::tempdir().unwrap();
        let tool = DiskTool::new(write_script(dir.path(), "qemu-img", FAKE_DISK_TOOL));
        let mut disk = tool.create(spec(dir.path(), None)).await.unwrap();

        assert!(matches!(
            tool.resize(&mut disk, DataSize::gib(2)).await,
            Err(VmhostError::InvalidArgument(_))
        ));

        tool.resize(&mut disk, DataSize::gib(20)).await.unwrap();
        assert_eq!(disk.size, DataSize::gib(20));
    }
}
