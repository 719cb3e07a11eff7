//! Tracing setup for a vmhost home directory.
//!
//! Logs go to stderr and to `<home>/logs/vmhost.log.<date>` (daily
//! rotation). `RUST_LOG` controls the filter; the default is `info`.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::errors::VmhostResult;
use crate::runtime::constants::dirs;
use crate::runtime::layout::HostLayout;

/// Flushes the file writer on process exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber once per process.
///
/// Later calls (another home, or an embedder that already installed a
/// subscriber) leave the existing subscriber in place.
pub fn init_logging_for(layout: &HostLayout) -> VmhostResult<()> {
    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir)?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, dirs::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .is_ok();

    if installed {
        let _ = FILE_GUARD.set(guard);
        tracing::debug!(logs_dir = %logs_dir.display(), "Logging initialized");
    }
    Ok(())
}
