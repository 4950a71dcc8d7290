use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::watch;

/// The sending half of a coalescing change notification
///
/// Notifications are level-triggered: every subscriber holds at most one pending
/// notification, and any number of `notify` calls between two receives collapse into one.
#[derive(Clone, Debug)]
pub struct Signal(Arc<watch::Sender<()>>);

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(());
        Self(Arc::new(tx))
    }

    /// Mark every subscriber as having a pending change
    ///
    /// Never blocks, and does not require any subscriber to exist.
    pub fn notify(&self) {
        self.0.send_modify(|()| {});
    }

    /// Subscribe to notifications published after this call
    #[must_use]
    pub fn subscribe(&self) -> Changes {
        Changes {
            receivers: vec![self.0.subscribe()],
        }
    }
}

/// Returned by [`Changes::changed`] once every publisher behind it has been dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// The receiving half of one or more [`Signal`]s
///
/// Readers must not assume one notification per mutation; on every notification they
/// re-read the full state they are interested in.
#[derive(Debug)]
pub struct Changes {
    receivers: Vec<watch::Receiver<()>>,
}

impl Changes {
    /// Combine two subscriptions into one that fires when either does
    #[must_use]
    pub fn merge(mut self, other: Changes) -> Self {
        self.receivers.extend(other.receivers);
        self
    }

    /// Wait until a change is pending, and consume it
    ///
    /// # Errors
    ///
    /// Fails when a publisher is gone, which happens when the owning cache is discarded.
    pub async fn changed(&mut self) -> Result<(), Closed> {
        match self.receivers.as_mut_slice() {
            [] => std::future::pending().await,
            [rx] => rx.changed().await.map_err(|_| Closed),
            receivers => {
                let pending = receivers.iter_mut().map(|rx| Box::pin(rx.changed()));
                let (res, _, _) = select_all(pending).await;
                res.map_err(|_| Closed)
            }
        }
    }

    /// Whether a change is pending, without consuming it
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.receivers.iter().any(|rx| rx.has_changed().unwrap_or(false))
    }
}
