use std::time::Duration;

/// Tunables for a mirrored cluster session
///
/// `Default` gives the production values; the server binary overrides individual
/// fields from its command line and environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// How often a connected session probes the api server
    pub heartbeat_interval: Duration,
    /// Pause between reconnection attempts after a failed heartbeat
    pub reconnect_interval: Duration,
    /// How often every store is re-listed from scratch
    pub relist_interval: Duration,
    /// Upper bound on the initial pod list during cache construction
    pub sync_timeout: Duration,
    /// Metrics polling period
    pub metrics_interval: Duration,
    /// Number of usage samples retained for trend display
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            reconnect_interval: Duration::from_millis(5000),
            relist_interval: Duration::from_secs(10 * 60),
            sync_timeout: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(30),
            history_limit: 200,
        }
    }
}

impl Config {
    /// Set the pause between reconnection attempts
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the bound on the initial pod sync
    #[must_use]
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }
}
