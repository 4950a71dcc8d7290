//! Per-kind in-memory stores fed by watch events

mod changes;

pub use self::changes::{Changes, Closed, Signal};
use crate::project::Projection;
use ahash::AHashMap;
use kube::{api::ObjectMeta, Resource};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A change to one kind of object, as delivered by an [`EventSource`](crate::reflect::EventSource)
#[derive(Debug, Clone, PartialEq)]
pub enum Event<K> {
    /// An object was added or modified
    Apply(K),
    /// An object was deleted
    Delete(K),
    /// A full relist is starting; following `InitApply` events replace the store contents
    Init,
    /// An object seen during a relist
    InitApply(K),
    /// The relist has completed
    InitDone,
}

impl<K> From<kube::runtime::watcher::Event<K>> for Event<K> {
    fn from(event: kube::runtime::watcher::Event<K>) -> Self {
        use kube::runtime::watcher::Event as Watch;
        match event {
            Watch::Apply(obj) => Event::Apply(obj),
            Watch::Delete(obj) => Event::Delete(obj),
            Watch::Init => Event::Init,
            Watch::InitApply(obj) => Event::InitApply(obj),
            Watch::InitDone => Event::InitDone,
        }
    }
}

/// Namespace and name filter for store reads
///
/// Empty strings behave like `None`: they match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    namespace: Option<String>,
    name: Option<String>,
}

impl Filter {
    /// Filter on an exact namespace and a case-sensitive name substring
    #[must_use]
    pub fn new(namespace: Option<&str>, name: Option<&str>) -> Self {
        let keep = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);
        Self {
            namespace: keep(namespace),
            name: keep(name),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        self.matches_parts(meta.namespace.as_deref(), meta.name.as_deref())
    }

    pub(crate) fn matches_parts(&self, namespace: Option<&str>, name: Option<&str>) -> bool {
        let namespace_ok = match &self.namespace {
            Some(wanted) => namespace == Some(wanted.as_str()),
            None => true,
        };
        let name_ok = match &self.name {
            Some(part) => name.is_some_and(|name| name.contains(part.as_str())),
            None => true,
        };
        namespace_ok && name_ok
    }
}

struct Entry<K> {
    dense: Arc<K>,
    sparse: Arc<Value>,
}

impl<K> Clone for Entry<K> {
    fn clone(&self) -> Self {
        Self {
            dense: self.dense.clone(),
            sparse: self.sparse.clone(),
        }
    }
}

struct State<K> {
    entries: AHashMap<String, Entry<K>>,
    /// Objects collected between `Init` and `InitDone`
    relist: Option<AHashMap<String, Entry<K>>>,
}

struct Inner<K> {
    kind: String,
    sparse: Projection,
    state: RwLock<State<K>>,
    /// Cancelled once the first relist completes, never reset
    synced: CancellationToken,
    signal: Signal,
}

/// A thread-safe cache of one kind of object, keyed by UID
///
/// Every object is held in two views: the dense object as received, and a sparse JSON
/// projection of it for list views. Both are replaced together on every mutation.
///
/// Cloning produces a new handle to the same store.
pub struct ResourceStore<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for ResourceStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K> fmt::Debug for ResourceStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStore")
            .field("kind", &self.inner.kind)
            .field("len", &self.inner.state.read().entries.len())
            .field("synced", &self.inner.synced.is_cancelled())
            .finish()
    }
}

impl<K> ResourceStore<K> {
    pub(crate) fn signal(&self) -> &Signal {
        &self.inner.signal
    }
}

impl<K> ResourceStore<K>
where
    K: Resource + Serialize,
{
    /// Create an empty store whose sparse view is `sparse` applied to each object
    #[must_use]
    pub fn new(kind: impl Into<String>, sparse: Projection) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind: kind.into(),
                sparse,
                state: RwLock::new(State {
                    entries: AHashMap::new(),
                    relist: None,
                }),
                synced: CancellationToken::new(),
                signal: Signal::new(),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    /// Apply a single watch event
    ///
    /// Objects without a UID, or that cannot be serialized, are dropped with a warning.
    pub fn apply(&self, event: Event<K>) {
        match event {
            Event::Apply(obj) => {
                if let Some((uid, entry)) = self.entry(obj) {
                    self.inner.state.write().entries.insert(uid, entry);
                    self.inner.signal.notify();
                }
            }
            Event::Delete(obj) => {
                let Some(uid) = obj.meta().uid.clone() else {
                    warn!(kind = %self.inner.kind, "dropping delete for object without uid");
                    return;
                };
                let removed = self.inner.state.write().entries.remove(&uid).is_some();
                if removed {
                    self.inner.signal.notify();
                }
            }
            Event::Init => {
                self.inner.state.write().relist = Some(AHashMap::new());
            }
            Event::InitApply(obj) => {
                if let Some((uid, entry)) = self.entry(obj) {
                    let mut guard = self.inner.state.write();
                    let state = &mut *guard;
                    // outside a relist this behaves like a plain apply
                    state.relist.as_mut().unwrap_or(&mut state.entries).insert(uid, entry);
                }
            }
            Event::InitDone => {
                {
                    let mut state = self.inner.state.write();
                    if let Some(relist) = state.relist.take() {
                        state.entries = relist;
                    }
                }
                self.inner.synced.cancel();
                self.inner.signal.notify();
            }
        }
    }

    fn entry(&self, obj: K) -> Option<(String, Entry<K>)> {
        let Some(uid) = obj.meta().uid.clone() else {
            warn!(kind = %self.inner.kind, name = ?obj.meta().name, "dropping object without uid");
            return None;
        };
        let sparse = match serde_json::to_value(&obj) {
            Ok(doc) => self.inner.sparse.apply(&doc),
            Err(err) => {
                warn!(kind = %self.inner.kind, %uid, error = %err, "dropping unserializable object");
                return None;
            }
        };
        Some((uid, Entry {
            dense: Arc::new(obj),
            sparse: Arc::new(sparse),
        }))
    }

    /// Snapshot of the dense objects matching `filter`, in no particular order
    #[must_use]
    pub fn resources(&self, filter: &Filter) -> Vec<Arc<K>> {
        self.inner
            .state
            .read()
            .entries
            .values()
            .filter(|e| filter.matches(e.dense.meta()))
            .map(|e| e.dense.clone())
            .collect()
    }

    /// Snapshot of the sparse views matching `filter`, in no particular order
    #[must_use]
    pub fn sparse_resources(&self, filter: &Filter) -> Vec<Arc<Value>> {
        self.inner
            .state
            .read()
            .entries
            .values()
            .filter(|e| filter.matches(e.dense.meta()))
            .map(|e| e.sparse.clone())
            .collect()
    }

    /// The dense object with the given UID
    #[must_use]
    pub fn resource(&self, uid: &str) -> Option<Arc<K>> {
        self.inner.state.read().entries.get(uid).map(|e| e.dense.clone())
    }

    /// The sparse view of the object with the given UID
    #[must_use]
    pub fn sparse_resource(&self, uid: &str) -> Option<Arc<Value>> {
        self.inner.state.read().entries.get(uid).map(|e| e.sparse.clone())
    }

    /// Whether any stored object satisfies `pred`
    pub fn any(&self, pred: impl Fn(&K) -> bool) -> bool {
        self.inner.state.read().entries.values().any(|e| pred(&e.dense))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.read().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn changes(&self) -> Changes {
        self.inner.signal.subscribe()
    }

    /// Publish a change notification without mutating the store
    pub fn notify(&self) {
        self.inner.signal.notify();
    }

    /// Whether the initial list has been applied
    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.inner.synced.is_cancelled()
    }

    /// Wait until the initial list has been applied
    pub async fn synced(&self) {
        self.inner.synced.cancelled().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{Event, Filter, ResourceStore};
    use crate::project::Projection;
    use futures::FutureExt;
    use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodSpec, PodStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    pub(crate) fn pod(uid: &str, namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(uid.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..PodStatus::default()
            }),
        }
    }

    fn pods() -> ResourceStore<Pod> {
        ResourceStore::new("Pod", Projection::parse("metadata,status.phase"))
    }

    #[test]
    fn filters_by_namespace_and_name_substring() {
        let store = pods();
        store.apply(Event::Apply(pod("42", "podinfo", "podinfo-abc")));

        let found = store.resources(&Filter::new(Some("podinfo"), Some("podinfo")));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.uid.as_deref(), Some("42"));
        assert!(store.resources(&Filter::new(Some("other"), Some("podinfo"))).is_empty());
        assert!(store.resources(&Filter::new(None, Some("PODINFO"))).is_empty());
        assert_eq!(store.resources(&Filter::new(Some(""), Some(""))).len(), 1);
    }

    #[test]
    fn get_reflects_the_latest_state() {
        let store = pods();
        let first = pod("1", "ns", "a");
        let mut updated = first.clone();
        updated.status.as_mut().unwrap().phase = Some("Succeeded".to_string());

        store.apply(Event::Apply(first));
        store.apply(Event::Apply(updated.clone()));
        assert_eq!(store.resource("1").as_deref(), Some(&updated));
        assert_eq!(store.len(), 1);

        store.apply(Event::Delete(updated));
        assert!(store.resource("1").is_none());
        assert!(store.resources(&Filter::default()).is_empty());
    }

    #[test]
    fn sparse_view_tracks_dense_view() {
        let store = pods();
        let mut obj = pod("1", "ns", "a");
        store.apply(Event::Apply(obj.clone()));
        obj.status.as_mut().unwrap().phase = Some("Failed".to_string());
        store.apply(Event::Apply(obj));

        let sparse = store.sparse_resource("1").unwrap();
        let dense = serde_json::to_value(&*store.resource("1").unwrap()).unwrap();
        assert_eq!(sparse.pointer("/status/phase"), dense.pointer("/status/phase"));
        assert_eq!(sparse.pointer("/metadata/name"), dense.pointer("/metadata/name"));
        assert!(sparse.pointer("/spec").is_none());
    }

    #[test]
    fn objects_without_uid_are_dropped() {
        let store = ResourceStore::<ConfigMap>::new("ConfigMap", Projection::parse("metadata"));
        let mut changes = store.changes();
        store.apply(Event::Apply(ConfigMap {
            metadata: ObjectMeta {
                name: Some("anonymous".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::new()),
            ..ConfigMap::default()
        }));
        assert!(store.is_empty());
        assert!(changes.changed().now_or_never().is_none());
    }

    #[test]
    fn rapid_mutations_coalesce_into_at_least_one_signal() {
        let store = pods();
        let mut changes = store.changes();
        for i in 0..10 {
            store.apply(Event::Apply(pod(&i.to_string(), "ns", "a")));
        }
        assert!(changes.changed().now_or_never().is_some());
        assert!(changes.changed().now_or_never().is_none());
    }

    #[test]
    fn relist_replaces_contents_and_marks_synced() {
        let store = pods();
        store.apply(Event::Apply(pod("stale", "ns", "gone")));
        assert!(!store.has_synced());

        store.apply(Event::Init);
        store.apply(Event::InitApply(pod("fresh", "ns", "kept")));
        // the relist is not visible until it completes
        assert!(store.resource("stale").is_some());
        assert!(store.resource("fresh").is_none());

        store.apply(Event::InitDone);
        assert!(store.has_synced());
        assert!(store.resource("stale").is_none());
        assert!(store.resource("fresh").is_some());
        assert!(store.synced().now_or_never().is_some());
    }

    #[test]
    fn synced_is_observed_by_clones_and_survives_relists() {
        let store = pods();
        let observer = store.clone();
        let mut waiting = observer.synced().boxed();
        assert!((&mut waiting).now_or_never().is_none());

        store.apply(Event::Init);
        store.apply(Event::InitDone);
        assert!((&mut waiting).now_or_never().is_some());

        store.apply(Event::Init);
        assert!(observer.has_synced());
    }

    #[test]
    fn store_never_contains_deleted_uids() {
        let store = pods();
        let mut live = std::collections::HashSet::new();
        for step in 0_u32..500 {
            let uid = (step * 7 % 23).to_string();
            if step % 3 == 0 {
                store.apply(Event::Delete(pod(&uid, "ns", "p")));
                live.remove(&uid);
            } else {
                store.apply(Event::Apply(pod(&uid, "ns", "p")));
                live.insert(uid);
            }
        }
        let stored = store
            .resources(&Filter::default())
            .iter()
            .map(|p| p.metadata.uid.clone().unwrap())
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(stored, live);
    }
}
