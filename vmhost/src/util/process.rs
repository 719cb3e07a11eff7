//! Process helpers for supervising hypervisor processes by PID.

/// Send SIGTERM. Returns immediately; the caller never waits for exit.
///
/// # Returns
/// * `true` - Signal delivered or the process is already gone
/// * `false` - Delivery failed (e.g. permission denied)
pub fn terminate_process(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, libc::SIGTERM) == 0 || !is_process_alive(pid) }
}

/// Check if a process with the given PID exists (`kill(pid, 0)`).
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// Verify that `pid` is the hypervisor of `instance_id`, guarding against
/// PID reuse after a host restart.
///
/// * **Linux**: `/proc/<pid>/cmdline` must mention the instance id
/// * **macOS**: the process command line from `sysinfo` must mention it
pub fn is_same_process(pid: u32, instance_id: &str) -> bool {
    if pid == 0 || instance_id.is_empty() {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        match std::fs::read(format!("/proc/{}/cmdline", pid)) {
            Ok(raw) => raw
                .split(|b| *b == 0)
                .any(|arg| String::from_utf8_lossy(arg).contains(instance_id)),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "macos")]
    {
        use sysinfo::{Pid, System};

        let mut sys = System::new();
        let pid = Pid::from_u32(pid);
        sys.refresh_process(pid);
        sys.process(pid)
            .map(|process| process.cmd().iter().any(|arg| arg.contains(instance_id)))
            .unwrap_or(false)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        is_process_alive(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_current() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_invalid() {
        // Well above any pid_max; u32::MAX would become -1 in kill().
        assert!(!is_process_alive(999999999));
    }

    #[test]
    fn test_is_same_process_checks_cmdline() {
        let pid = std::process::id();
        assert!(!is_same_process(pid, "a1b2c3d4e5f60718293a4b5c6d7e8f90"));
        assert!(!is_same_process(0, "a1b2c3"));
        assert!(!is_same_process(999999999, "a1b2c3"));
    }

    #[test]
    fn test_terminate_missing_process() {
        assert!(terminate_process(999999999));
    }
}
