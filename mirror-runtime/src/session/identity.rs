use crate::{Error, Result};
use kube::config::Kubeconfig;
use std::fmt;

/// The kube-context a session was started against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub context: String,
    pub cluster: String,
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.context, self.cluster)
    }
}

impl ClusterIdentity {
    /// Read the current context from the local kubeconfig
    ///
    /// # Errors
    ///
    /// Fails when the kubeconfig cannot be read or has no current context.
    pub fn current() -> Result<Self> {
        Self::from_kubeconfig(&Kubeconfig::read()?)
    }

    /// # Errors
    ///
    /// [`Error::MissingContext`] when `current-context` is unset or names no context.
    pub fn from_kubeconfig(config: &Kubeconfig) -> Result<Self> {
        let context = config.current_context.as_deref().ok_or(Error::MissingContext)?;
        let cluster = config
            .contexts
            .iter()
            .find(|named| named.name == context)
            .and_then(|named| named.context.as_ref())
            .map(|ctx| ctx.cluster.clone())
            .ok_or(Error::MissingContext)?;
        Ok(Self {
            context: context.to_string(),
            cluster,
        })
    }

    #[must_use]
    pub fn in_cluster() -> Self {
        Self {
            context: "in-cluster".to_string(),
            cluster: "in-cluster".to_string(),
        }
    }
}
