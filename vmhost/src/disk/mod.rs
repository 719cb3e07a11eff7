//! Disk images.
//!
//! Disks are created and resized exclusively through the disk-image tool
//! (`qemu-img`); the files are never truncated directly.

mod size;
mod tool;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VmhostError;
use crate::repo::Entity;

pub use size::{DataSize, SizeScale};
pub use tool::{DiskSpec, DiskTool};

/// On-disk image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskFormat {
    Raw,
    /// Copy-on-write; may reference a backing image.
    Qcow2,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskFormat::Raw => "raw",
            DiskFormat::Qcow2 => "qcow2",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DiskFormat::Raw => "img",
            DiskFormat::Qcow2 => "qcow2",
        }
    }
}

impl fmt::Display for DiskFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskFormat {
    type Err = VmhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(DiskFormat::Raw),
            "qcow2" => Ok(DiskFormat::Qcow2),
            other => Err(VmhostError::UnsupportedConfiguration(format!(
                "unknown disk format '{}'",
                other
            ))),
        }
    }
}

/// Backing store of a copy-on-write disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingFile {
    pub path: PathBuf,
    pub format: DiskFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: DataSize,
    pub format: DiskFormat,
    pub backing: Option<BackingFile>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Disk {
    const KIND: &'static str = "disk";

    fn uid(&self) -> &str {
        &self.id
    }
}
