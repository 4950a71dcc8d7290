//! Error handling in [`mirror_runtime`][crate]
use std::time::Duration;

use thiserror::Error;

use crate::session::ClusterIdentity;

/// Possible errors when mirroring a cluster
#[derive(Error, Debug)]
pub enum Error {
    /// A request to the api server failed
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    /// No usable kubeconfig or in-cluster environment was found
    #[error("failed to infer client configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    /// The local kubeconfig could not be read
    #[error("failed to read kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// A watch stream reported an error
    #[error("watch failed: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    /// A store did not complete its initial list in time
    #[error("{kind} store did not sync within {timeout:?}")]
    SyncTimeout { kind: String, timeout: Duration },

    /// The current kube-context no longer points at the cluster the session started with
    #[error("kube-context changed from {expected} to {found}")]
    ContextChanged {
        expected: ClusterIdentity,
        found: ClusterIdentity,
    },

    /// The kubeconfig has no usable current context
    #[error("kubeconfig has no current context")]
    MissingContext,

    /// The metrics api did not answer the availability probe
    #[error("metrics api unavailable")]
    MetricsUnavailable,
}

/// Convenient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
