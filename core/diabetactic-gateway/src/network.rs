//! Network reachability signal.
//!
//! The platform layer feeds connectivity changes in through
//! [`NetworkMonitor::set_online`]; the gateway reads the current value and
//! the sync processor subscribes to transitions.

use tokio::sync::watch;
use tracing::info;

/// Online/offline flag with change notifications.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Returns the last reported state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Reports a connectivity change. Subscribers are only woken when the
    /// value actually flips.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!("Network is now {}", if online { "online" } else { "offline" });
        }
    }

    /// Subscribes to connectivity transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
