//! HTTP surface over a [`mirror_runtime::Session`]
//!
//! Every tracked kind is served three ways from the same path: a single object by UID,
//! a one-shot JSON list with `once=true`, or by default a server-sent-event stream
//! that re-emits the filtered list on change, at most about once per second.
pub mod binder;
mod error;
pub mod routes;
mod status;
pub mod stream;

pub use error::ApiError;
pub use routes::{router, AppState};

use clap::Parser;
use mirror_runtime::Config;
use std::{net::SocketAddr, time::Duration};

/// Command line and environment configuration of the server
#[derive(Parser, Clone, Debug)]
#[command(name = "cluster-mirror", version, about)]
pub struct Args {
    /// Address to serve on
    #[arg(long, env = "MIRROR_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Milliseconds between reconnection attempts after losing the cluster
    #[arg(long = "retry-ms", env = "CONNECTION_RETRY_MS", default_value_t = 5000)]
    pub retry_ms: u64,

    /// Seconds to wait for the initial pod list when connecting
    #[arg(long, env = "MIRROR_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    pub sync_timeout_secs: u64,
}

impl Args {
    #[must_use]
    pub fn config(&self) -> Config {
        Config::default()
            .reconnect_interval(Duration::from_millis(self.retry_ms))
            .sync_timeout(Duration::from_secs(self.sync_timeout_secs))
    }
}
