//! Host configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::constants::{binaries, defaults, envs};

/// Configuration for a [`crate::VmHost`].
///
/// All external binaries are invoked at exactly the configured path (or
/// looked up on `PATH` when the value is a bare name). A missing binary
/// surfaces as a typed error at the point of use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    /// Root for instances, images, logs and the database. Must be absolute.
    pub home_dir: PathBuf,
    /// Disk-image tool (`qemu-img`).
    pub disk_tool: PathBuf,
    /// Ignition converter (`butane`).
    pub ignition_converter: PathBuf,
    /// Hypervisor binary (`qemu-system-*`).
    pub hypervisor: PathBuf,
    /// `-machine` type.
    pub machine: String,
    /// `accel=` value for `-machine`.
    pub accelerator: String,
    /// Read-only UEFI code image, copied into each instance directory.
    pub firmware_code: PathBuf,
    /// UEFI variable store template, copied per instance.
    pub firmware_vars: PathBuf,
    /// Upper bound for the first-boot phone-home wait.
    pub phone_home_timeout_secs: u64,
    /// Base URL guests call back on first boot, e.g. `http://10.0.0.1:8080/phone-home`.
    pub phone_home_base_url: Option<String>,
}

impl Default for HostOptions {
    fn default() -> Self {
        let home_dir = std::env::var_os(envs::HOME)
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(defaults::HOME_DIR_NAME)))
            .unwrap_or_else(|| std::env::temp_dir().join(defaults::HOME_DIR_NAME));

        Self {
            home_dir,
            disk_tool: PathBuf::from(binaries::DISK_TOOL),
            ignition_converter: PathBuf::from(binaries::IGNITION_CONVERTER),
            hypervisor: PathBuf::from(binaries::HYPERVISOR),
            machine: defaults::MACHINE.to_string(),
            accelerator: defaults::ACCELERATOR.to_string(),
            firmware_code: PathBuf::from(defaults::FIRMWARE_CODE),
            firmware_vars: PathBuf::from(defaults::FIRMWARE_VARS),
            phone_home_timeout_secs: defaults::PHONE_HOME_TIMEOUT_SECS,
            phone_home_base_url: None,
        }
    }
}

impl HostOptions {
    /// Defaults overlaid with `VMHOST_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(path) = std::env::var_os(envs::DISK_TOOL) {
            options.disk_tool = PathBuf::from(path);
        }
        if let Some(path) = std::env::var_os(envs::IGNITION_CONVERTER) {
            options.ignition_converter = PathBuf::from(path);
        }
        if let Some(path) = std::env::var_os(envs::HYPERVISOR) {
            options.hypervisor = PathBuf::from(path);
        }
        options
    }

    /// Same options rooted at another home directory.
    pub fn with_home(mut self, home_dir: impl Into<PathBuf>) -> Self {
        self.home_dir = home_dir.into();
        self
    }

    pub fn phone_home_timeout(&self) -> Duration {
        Duration::from_secs(self.phone_home_timeout_secs)
    }

    /// Phone-home URL for one instance, if a base URL is configured.
    pub fn phone_home_url(&self, instance_id: &str) -> Option<String> {
        self.phone_home_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = HostOptions::default();
        assert_eq!(options.disk_tool, PathBuf::from("qemu-img"));
        assert_eq!(options.machine, "q35");
        assert_eq!(options.phone_home_timeout(), Duration::from_secs(300));
        assert!(options.phone_home_url("abc").is_none());
    }

    #[test]
    fn test_phone_home_url_joins_without_double_slash() {
        let options = HostOptions {
            phone_home_base_url: Some("http://10.0.0.1:8080/phone-home/".into()),
            ..Default::default()
        };
        assert_eq!(
            options.phone_home_url("abc").as_deref(),
            Some("http://10.0.0.1:8080/phone-home/abc")
        );
    }

    #[test]
    fn test_deserialize_partial_json_uses_defaults() {
        let options: HostOptions =
            serde_json::from_str(r#"{"home_dir": "/srv/vmhost", "accelerator": "tcg"}"#).unwrap();
        assert_eq!(options.home_dir, PathBuf::from("/srv/vmhost"));
        assert_eq!(options.accelerator, "tcg");
        assert_eq!(options.hypervisor, PathBuf::from(binaries::HYPERVISOR));
    }
}
