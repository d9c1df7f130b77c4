//! Connectivity flag plumbing
//!
//! The platform shell owns the actual listener (NetInfo, NetworkMonitor,
//! etc.) and pushes state through a [`ConnectivityHandle`]. The controller
//! only ever reads the flag; a recovered connection never triggers an
//! automatic retry.

use tokio::sync::watch;

/// Writer half handed to the platform's connectivity listener
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Update the shared online flag
    pub fn set_online(&self, online: bool) {
        let previous = self.tx.send_replace(online);
        if previous != online {
            tracing::debug!(online, "connectivity changed");
        }
    }

    /// Current value of the flag
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create the connectivity channel with an initial state
#[must_use]
pub fn connectivity_channel(initially_online: bool) -> (ConnectivityHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(initially_online);
    (ConnectivityHandle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_updates_receiver() {
        let (handle, rx) = connectivity_channel(true);
        assert!(*rx.borrow());
        assert!(handle.is_online());

        handle.set_online(false);
        assert!(!*rx.borrow());
        assert!(!handle.is_online());
    }
}
