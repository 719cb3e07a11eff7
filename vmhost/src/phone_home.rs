//! First-boot phone-home signals.
//!
//! The guest calls back (through an HTTP layer outside this crate) once its
//! first boot finishes; that layer calls [`PhoneHome::signal`]. Waiters are
//! always bounded by a timeout.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::errors::{VmhostError, VmhostResult};

#[derive(Debug, Default)]
pub struct PhoneHome {
    channels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl PhoneHome {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, instance_id: &str) -> watch::Receiver<bool> {
        self.channels
            .lock()
            .entry(instance_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Record that `instance_id` has booted. Signals before any waiter are kept.
    pub fn signal(&self, instance_id: &str) {
        let mut channels = self.channels.lock();
        let sender = channels
            .entry(instance_id.to_string())
            .or_insert_with(|| watch::channel(false).0);
        sender.send_replace(true);
        tracing::info!(instance_id, "Instance phoned home");
    }

    pub fn has_signalled(&self, instance_id: &str) -> bool {
        self.channels
            .lock()
            .get(instance_id)
            .map(|sender| *sender.borrow())
            .unwrap_or(false)
    }

    /// Wait until `instance_id` phones home, failing `Timeout` after `timeout`.
    pub async fn wait(&self, instance_id: &str, timeout: Duration) -> VmhostResult<()> {
        let mut rx = self.subscribe(instance_id);
        match tokio::time::timeout(timeout, rx.wait_for(|booted| *booted)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(VmhostError::Internal(format!(
                "phone-home channel for {} closed",
                instance_id
            ))),
            Err(_) => Err(VmhostError::Timeout(format!(
                "instance {} did not phone home within {:?}",
                instance_id, timeout
            ))),
        }
    }

    /// Drop state for a removed instance.
    pub fn forget(&self, instance_id: &str) {
        self.channels.lock().remove(instance_id);
    }
}
