//! Fake external binaries for unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Touches its second-to-last argument (the image path for both
/// `create ... <path> <size>` and `resize ... <path> <size>`).
pub(crate) const FAKE_DISK_TOOL: &str =
    "#!/bin/sh\nfor a in \"$@\"; do prev=$cur; cur=$a; done\ntouch \"$prev\"\n";

/// Stays alive until signalled; its command line keeps the arguments.
pub(crate) const FAKE_HYPERVISOR: &str = "#!/bin/sh\nwhile :; do sleep 1; done\n";

/// Write an executable shell script into `dir`.
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
