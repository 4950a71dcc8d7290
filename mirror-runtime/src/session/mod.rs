//! Connection supervision and cache replacement across cluster outages
mod connector;
mod identity;

pub use self::{
    connector::{Connector, KubeConnector},
    identity::ClusterIdentity,
};
use crate::{cache::Cache, config::Config, Error, Result};
use parking_lot::RwLock;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{interval, sleep, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the supervisor is in its connect/disconnect cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Connectivity as reported to clients
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    InCluster,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Error => "error",
            Status::InCluster => "in-cluster",
        }
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: Config,
    identity: ClusterIdentity,
    in_cluster: bool,
    cache: RwLock<Arc<Cache>>,
    ready: AtomicBool,
    state: RwLock<ConnectionState>,
    status: watch::Sender<Status>,
    generation: watch::Sender<u64>,
}

/// The current cache plus the supervisor that replaces it after outages
///
/// Consumers must re-read [`Session::cache`] per request rather than retain it, since a
/// reconnect installs a new one. Cloning produces a new handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.inner.identity)
            .field("in_cluster", &self.inner.in_cluster)
            .field("state", &self.state())
            .field("generation", &*self.inner.generation.borrow())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect for the first time
    ///
    /// # Errors
    ///
    /// Any failure here is fatal; only failures after startup are retried.
    pub async fn start<C: Connector>(
        connector: C,
        config: Config,
        token: &CancellationToken,
    ) -> Result<Self> {
        let in_cluster = connector.in_cluster();
        let identity = if in_cluster {
            ClusterIdentity::in_cluster()
        } else {
            connector.identity()?
        };
        info!(%identity, in_cluster, "connecting");
        let cache = connector.connect(&config, token.child_token()).await?;
        Ok(Self::with_cache(Arc::new(connector), config, identity, in_cluster, cache))
    }

    pub(crate) fn with_cache(
        connector: Arc<dyn Connector>,
        config: Config,
        identity: ClusterIdentity,
        in_cluster: bool,
        cache: Cache,
    ) -> Self {
        let status = if in_cluster { Status::InCluster } else { Status::Success };
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                identity,
                in_cluster,
                cache: RwLock::new(Arc::new(cache)),
                ready: AtomicBool::new(true),
                state: RwLock::new(ConnectionState::Connected),
                status: watch::Sender::new(status),
                generation: watch::Sender::new(0),
            }),
        }
    }

    /// The cache of the current generation
    #[must_use]
    pub fn cache(&self) -> Arc<Cache> {
        self.inner.cache.read().clone()
    }

    /// Subscribe to cache replacements; the value is the generation number
    #[must_use]
    pub fn generations(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    /// Subscribe to connectivity status; the current status is immediately visible
    #[must_use]
    pub fn status(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn in_cluster(&self) -> bool {
        self.inner.in_cluster
    }

    #[must_use]
    pub fn identity(&self) -> &ClusterIdentity {
        &self.inner.identity
    }

    /// Monitor the connection and reconnect after failures, until `token` is cancelled
    ///
    /// In-cluster sessions are never probed.
    pub async fn supervise(self, token: CancellationToken) {
        if self.inner.in_cluster {
            debug!("in-cluster session, connectivity probing disabled");
            token.cancelled().await;
            self.cache().cancel();
            return;
        }
        let mut heartbeat = interval(self.inner.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = heartbeat.tick() => {
                    if !self.is_ready() {
                        continue;
                    }
                    let cache = self.cache();
                    match self.inner.connector.probe(&cache).await {
                        Ok(()) => {
                            self.inner.status.send_replace(Status::Success);
                        }
                        Err(err) => {
                            warn!(error = %err, "heartbeat failed");
                            self.disconnect(&cache);
                            if !self.reconnect(&token).await {
                                break;
                            }
                            heartbeat.reset();
                        }
                    }
                }
            }
        }
        debug!("supervisor stopped");
        self.cache().cancel();
    }

    pub(crate) fn disconnect(&self, cache: &Cache) {
        self.inner.ready.store(false, Ordering::Release);
        *self.inner.state.write() = ConnectionState::Disconnected;
        self.inner.status.send_replace(Status::Error);
        cache.cancel();
    }

    /// Retry until a new cache is installed; false if cancelled first
    async fn reconnect(&self, token: &CancellationToken) -> bool {
        *self.inner.state.write() = ConnectionState::Reconnecting;
        let mut attempt = 0_u64;
        loop {
            attempt += 1;
            tokio::select! {
                () = token.cancelled() => return false,
                () = sleep(self.inner.config.reconnect_interval) => {}
            }
            match self.inner.connector.identity() {
                Ok(found) if found != self.inner.identity => {
                    let err = Error::ContextChanged {
                        expected: self.inner.identity.clone(),
                        found,
                    };
                    warn!(attempt, error = %err, "not reconnecting");
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(attempt, error = %err, "failed to resolve kube-context");
                    continue;
                }
            }
            let connect = self.inner.connector.connect(&self.inner.config, token.child_token());
            let cache = tokio::select! {
                () = token.cancelled() => return false,
                res = connect => match res {
                    Ok(cache) => cache,
                    Err(err) => {
                        warn!(attempt, error = %err, "reconnect failed");
                        continue;
                    }
                },
            };
            self.install(cache);
            info!(attempt, "reconnected");
            return true;
        }
    }

    pub(crate) fn install(&self, cache: Cache) {
        *self.inner.cache.write() = Arc::new(cache);
        self.inner.generation.send_modify(|generation| *generation += 1);
        self.inner.ready.store(true, Ordering::Release);
        *self.inner.state.write() = ConnectionState::Connected;
        self.inner.status.send_replace(Status::Success);
    }

    /// Pause between reconnection attempts
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.inner.config.reconnect_interval
    }
}
