//! [`ActivationWindow`] – a self-clearing flag for the secondary sensor.
//!
//! `activate(d)` raises the flag and schedules it to drop after `d`.  While
//! the flag is up, further activations are ignored rather than extending
//! the window.  The timer runs on the ambient tokio runtime when there is
//! one and on a short-lived OS thread otherwise.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

/// Shared "secondary sensor contributes" flag.
///
/// Clones observe and control the same window.
#[derive(Debug, Clone, Default)]
pub struct ActivationWindow {
    active: Arc<AtomicBool>,
}

impl ActivationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag for `duration`.
    ///
    /// Returns `false` without touching the running window when the flag is
    /// already up.
    pub fn activate(&self, duration: Duration) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("secondary sensor already active; activation ignored");
            return false;
        }
        debug!(duration_ms = duration.as_millis() as u64, "secondary sensor activated");

        let flag = Arc::clone(&self.active);
        let expire = move || {
            flag.store(false, Ordering::Release);
            debug!("secondary sensor window closed");
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(duration).await;
                    expire();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(duration);
                    expire();
                });
            }
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
