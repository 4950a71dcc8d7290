//! Offline sessions for tests of code built on top of this crate
use crate::{
    cache::Cache,
    config::Config,
    session::{ClusterIdentity, Connector, Session},
    Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A connector that never leaves the process
///
/// Reconnects hand out empty detached caches and probes always succeed.
#[derive(Clone, Debug)]
pub struct Detached {
    in_cluster: bool,
}

#[async_trait]
impl Connector for Detached {
    fn in_cluster(&self) -> bool {
        self.in_cluster
    }

    fn identity(&self) -> Result<ClusterIdentity> {
        Ok(identity())
    }

    async fn connect(&self, config: &Config, token: CancellationToken) -> Result<Cache> {
        Ok(Cache::empty(config, token))
    }

    async fn probe(&self, _cache: &Cache) -> Result<()> {
        Ok(())
    }
}

fn identity() -> ClusterIdentity {
    ClusterIdentity {
        context: "detached".to_string(),
        cluster: "detached".to_string(),
    }
}

/// A connected session serving `cache`
#[must_use]
pub fn session(cache: Cache) -> Session {
    Session::with_cache(
        Arc::new(Detached { in_cluster: false }),
        Config::default(),
        identity(),
        false,
        cache,
    )
}

/// An in-cluster session serving `cache`
#[must_use]
pub fn in_cluster_session(cache: Cache) -> Session {
    Session::with_cache(
        Arc::new(Detached { in_cluster: true }),
        Config::default(),
        ClusterIdentity::in_cluster(),
        true,
        cache,
    )
}

/// A session whose heartbeat has just failed
#[must_use]
pub fn disconnected(cache: Cache) -> Session {
    let session = session(cache);
    session.disconnect(&session.cache());
    session
}

/// Install `cache` as the next generation, as a successful reconnect would
pub fn reconnect(session: &Session, cache: Cache) {
    session.disconnect(&session.cache());
    session.install(cache);
}
