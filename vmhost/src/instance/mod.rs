//! Instance entity, display kinds and MAC derivation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::disk::DataSize;
use crate::errors::{VmhostError, VmhostResult};
use crate::repo::Entity;
use crate::runtime::constants::devices;

/// Runtime state of an instance.
///
/// ```text
/// STOPPED → STARTING → STARTED → STOPPING → STOPPED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Stopped => "STOPPED",
            InstanceState::Starting => "STARTING",
            InstanceState::Started => "STARTED",
            InstanceState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the guest console is presented.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DisplayKind {
    #[default]
    Headless,
    /// VNC server on `127.0.0.1:<5900 + display>`.
    Vnc { display: u16 },
    /// Host windowing system.
    Native,
}

impl fmt::Display for DisplayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayKind::Headless => f.write_str("headless"),
            DisplayKind::Vnc { display } => write!(f, "vnc:{}", display),
            DisplayKind::Native => f.write_str("native"),
        }
    }
}

/// Accepts `headless`, `native`, `vnc` (display 0) and `vnc:<n>`.
impl FromStr for DisplayKind {
    type Err = VmhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let (kind, arg) = match lower.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (lower.as_str(), None),
        };

        match (kind, arg) {
            ("headless", None) => Ok(DisplayKind::Headless),
            ("native", None) => Ok(DisplayKind::Native),
            ("vnc", None) => Ok(DisplayKind::Vnc { display: 0 }),
            ("vnc", Some(n)) => n
                .parse()
                .map(|display| DisplayKind::Vnc { display })
                .map_err(|_| VmhostError::InvalidArgument(format!("invalid VNC display '{}'", n))),
            _ => Err(VmhostError::UnsupportedConfiguration(format!(
                "unknown display kind '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Working directory; owned exclusively by this instance.
    pub path: PathBuf,
    pub firmware_code: PathBuf,
    pub firmware_vars: PathBuf,
    pub vcpus: u32,
    pub ram: DataSize,
    /// Derived from `id` once, never regenerated.
    pub mac: String,
    pub os_disk_id: String,
    pub network_id: String,
    pub bootstrap_id: String,
    pub bootstrap_file: PathBuf,
    pub display: DisplayKind,
    pub state: InstanceState,
    /// Hypervisor pid while running; used to re-attach after a host restart.
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Instance {
    const KIND: &'static str = "instance";

    fn uid(&self) -> &str {
        &self.id
    }
}

impl Instance {
    pub fn is_running(&self) -> bool {
        matches!(self.state, InstanceState::Started | InstanceState::Starting)
    }
}

/// Fresh instance id: 32 lowercase hex characters.
pub fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `00:50:56:` followed by the first six hex characters of `id`.
///
/// Unique exactly when id prefixes are unique.
pub fn mac_from_uid(id: &str) -> VmhostResult<String> {
    let prefix = id
        .get(..6)
        .filter(|p| p.chars().all(|c| c.is_ascii_hexdigit()));
    let Some(prefix) = prefix else {
        return Err(VmhostError::InvalidArgument(format!(
            "instance id '{}' does not start with 6 hex characters",
            id
        )));
    };

    let prefix = prefix.to_ascii_lowercase();
    Ok(format!(
        "{}:{}:{}:{}",
        devices::MAC_VENDOR_PREFIX,
        &prefix[0..2],
        &prefix[2..4],
        &prefix[4..6]
    ))
}
