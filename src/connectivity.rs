use tokio::sync::watch;
use tracing::info;

/// Process-wide network reachability state, fed by the external
/// online/offline signal source.
///
/// Only the network half of "connected" lives here; whether the remote
/// store is usable additionally requires a complete remote config,
/// which the admission policy and reconciliation driver check at the
/// moment they act. Not persisted; recomputed from signals.
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    /// Record a signal from the connectivity source. Subscribers are
    /// only woken on actual transitions, not repeated same-state
    /// signals.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if *state != online {
                *state = online;
                true
            } else {
                false
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to transitions; used by the reconciliation driver.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(Connectivity::new(true).is_online());
        assert!(!Connectivity::new(false).is_online());
    }

    #[tokio::test]
    async fn test_transition_wakes_subscribers() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_repeated_signal_does_not_wake() {
        let connectivity = Connectivity::new(true);
        let mut rx = connectivity.subscribe();
        rx.borrow_and_update();

        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
