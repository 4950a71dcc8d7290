use mirror_runtime::{Config, KubeConnector, Session};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Connects to the current kube-context, waits for the reported stores to sync, and logs their sizes.
// Pods are already synced once the session has started.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let token = CancellationToken::new();
    let session = Session::start(KubeConnector::new(), Config::default(), &token).await?;
    let cache = session.cache();
    cache.nodes.synced().await;
    cache.namespaces.synced().await;
    cache.crds.store().synced().await;
    info!(
        identity = %session.identity(),
        pods = cache.pods.len(),
        nodes = cache.nodes.len(),
        namespaces = cache.namespaces.len(),
        crds = cache.crds.store().len(),
        "cluster mirrored"
    );
    token.cancel();
    Ok(())
}
