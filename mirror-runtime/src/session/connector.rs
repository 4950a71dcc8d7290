use super::ClusterIdentity;
use crate::{cache::Cache, config::Config, Result};
use async_trait::async_trait;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Everything the supervisor needs from the outside world
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Whether the process runs inside the cluster it mirrors
    fn in_cluster(&self) -> bool;

    /// The kube-context currently selected
    fn identity(&self) -> Result<ClusterIdentity>;

    /// Build a client and a fully synced cache owned by `token`
    async fn connect(&self, config: &Config, token: CancellationToken) -> Result<Cache>;

    /// Lightweight reachability check against the cache's cluster
    async fn probe(&self, cache: &Cache) -> Result<()>;
}

/// Connects with the inferred kubeconfig or in-cluster environment
#[derive(Clone, Debug, Default)]
pub struct KubeConnector;

impl KubeConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for KubeConnector {
    fn in_cluster(&self) -> bool {
        std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
    }

    fn identity(&self) -> Result<ClusterIdentity> {
        ClusterIdentity::current()
    }

    async fn connect(&self, config: &Config, token: CancellationToken) -> Result<Cache> {
        let client_config = kube::Config::infer().await?;
        debug!(url = %client_config.cluster_url, "building client");
        let client = Client::try_from(client_config)?;
        let cache = Cache::new(client, config, token).await?;
        info!("cache ready");
        Ok(cache)
    }

    async fn probe(&self, cache: &Cache) -> Result<()> {
        if let Some(client) = cache.client() {
            client.apiserver_version().await?;
        }
        Ok(())
    }
}
