//! Type-erased read access to anything that can be streamed to clients
use crate::store::{Changes, Filter, ResourceStore};
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Which view of the stored objects to read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    /// The full objects
    Dense,
    /// The curated list-view projections
    Sparse,
}

/// Object-safe read interface shared by every store
///
/// The streaming layer only ever sees `Arc<dyn Feed>`, so it can serve typed, dynamic
/// and computed collections through the same code path.
pub trait Feed: Send + Sync {
    /// Name of the kind served, for logging
    fn kind(&self) -> &str;

    /// Snapshot of the matching objects as JSON
    fn list(&self, filter: &Filter, view: View) -> Vec<Value>;

    /// The dense object with the given UID as JSON
    fn get(&self, uid: &str) -> Option<Value>;

    /// Subscribe to change notifications
    fn changes(&self) -> Changes;

    /// Whether the kind is currently served by the cluster
    ///
    /// Always true except for kinds backed by a CustomResourceDefinition.
    fn available(&self) -> bool {
        true
    }
}

pub(crate) fn to_json<K: Serialize>(kind: &str, obj: &K) -> Option<Value> {
    serde_json::to_value(obj)
        .inspect_err(|err| warn!(%kind, error = %err, "failed to serialize object"))
        .ok()
}

impl<K> Feed for ResourceStore<K>
where
    K: Resource + Serialize + Send + Sync + 'static,
{
    fn kind(&self) -> &str {
        ResourceStore::kind(self)
    }

    fn list(&self, filter: &Filter, view: View) -> Vec<Value> {
        match view {
            View::Dense => self
                .resources(filter)
                .iter()
                .filter_map(|obj| to_json(self.kind(), obj.as_ref()))
                .collect(),
            View::Sparse => self
                .sparse_resources(filter)
                .into_iter()
                .map(Arc::unwrap_or_clone)
                .collect(),
        }
    }

    fn get(&self, uid: &str) -> Option<Value> {
        self.resource(uid).and_then(|obj| to_json(self.kind(), obj.as_ref()))
    }

    fn changes(&self) -> Changes {
        ResourceStore::changes(self)
    }
}

impl<K> ResourceStore<K>
where
    K: Resource + Serialize + Send + Sync + 'static,
{
    /// This store as a type-erased [`Feed`]
    #[must_use]
    pub fn feed(&self) -> Arc<dyn Feed> {
        Arc::new(self.clone())
    }
}
