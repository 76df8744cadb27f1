//! Single-slot hand-off between transport callbacks and the reconnect loop

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Wakes the reconnect loop when a connection outcome arrives.
///
/// Backed by [`Notify::notify_one`]: a signal raised with nobody waiting is
/// kept as a single permit, and further signals while it is pending coalesce.
/// Waiters always re-check the state they wait on, so a leftover permit only
/// costs one extra check and a real outcome is never missed.
#[derive(Debug, Default)]
pub struct Rendezvous {
    notify: Notify,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.notify.notify_one();
    }

    /// Wait until `done()` holds. Returns false if cancelled first.
    pub async fn wait_until<F>(&self, mut done: F, cancel: &CancellationToken) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            if done() {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = self.notify.notified() => {}
            }
        }
    }
}
