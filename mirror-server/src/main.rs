use clap::Parser;
use mirror_runtime::{KubeConnector, Session};
use mirror_server::{router, AppState, Args};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let shutdown = CancellationToken::new();
    let session = Session::start(KubeConnector::new(), args.config(), &shutdown).await?;
    info!(identity = %session.identity(), in_cluster = session.in_cluster(), "session started");
    let supervisor = tokio::spawn(session.clone().supervise(shutdown.clone()));

    let app = router(AppState {
        session,
        shutdown: shutdown.clone(),
    });
    let listener = TcpListener::bind(args.listen).await?;
    info!(addr = %args.listen, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    supervisor.await?;
    info!("stopped");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutting down");
    token.cancel();
}
