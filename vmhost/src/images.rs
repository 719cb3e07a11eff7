//! Base images used as backing stores for instance OS disks.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::disk::{BackingFile, DiskFormat};
use crate::errors::{VmhostError, VmhostResult};
use crate::repo::Entity;

/// A read-only disk image registered with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub format: DiskFormat,
    pub created_at: DateTime<Utc>,
}

impl Entity for Image {
    const KIND: &'static str = "image";

    fn uid(&self) -> &str {
        &self.id
    }
}

impl Image {
    /// Describe an image file already on disk.
    ///
    /// Fails `NotFound` when `path` does not exist.
    pub fn register(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: DiskFormat,
    ) -> VmhostResult<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(VmhostError::NotFound(format!(
                "image file {}",
                path.display()
            )));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            path,
            format,
            created_at: Utc::now(),
        })
    }

    pub fn as_backing(&self) -> BackingFile {
        BackingFile {
            path: self.path.clone(),
            format: self.format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Image::register("fcos", dir.path().join("missing.qcow2"), DiskFormat::Qcow2),
            Err(VmhostError::NotFound(_))
        ));

        let path = dir.path().join("fcos.qcow2");
        std::fs::write(&path, b"qcow").unwrap();
        let image = Image::register("fcos", &path, DiskFormat::Qcow2).unwrap();
        assert_eq!(image.as_backing().path, path);
        assert_eq!(image.as_backing().format, DiskFormat::Qcow2);
    }
}
