//! Connectivity monitor
//!
//! Single source of truth for online/offline state, fed by the platform
//! reachability signal. Only observes and reports: retries and backoff
//! live with the queue drainer.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared online/offline state with edge-triggered subscription
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Report a reachability change from the platform
    pub fn set_online(&self, online: bool) {
        let previous = *self.sender.borrow();
        if previous != online {
            tracing::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        self.sender.send_replace(online);
    }

    /// Current state
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Wait until the state is (or becomes) online
    pub async fn wait_until_online(&self) {
        let mut rx = self.subscribe();
        // wait_for returns immediately when already online
        let _ = rx.wait_for(|online| *online).await;
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        monitor.set_online(true);
        assert!(monitor.is_online());

        monitor.set_online(false);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_wait_until_online_returns_on_edge() {
        let monitor = ConnectivityMonitor::new(false);
        let waiter = monitor.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_until_online().await;
            true
        });

        monitor.set_online(true);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_until_online_immediate_when_online() {
        let monitor = ConnectivityMonitor::new(true);
        // Must not hang
        monitor.wait_until_online().await;
    }

    #[tokio::test]
    async fn test_subscriber_sees_edge() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
