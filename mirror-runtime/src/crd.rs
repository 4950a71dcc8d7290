//! Gating of dynamically-typed kinds on CustomResourceDefinition presence
use crate::{
    feed::{Feed, View},
    store::{Changes, Filter, ResourceStore, Signal},
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::info;

/// Static description of a kind served by a CustomResourceDefinition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CustomKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
}

impl CustomKind {
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(self.group, self.version, self.kind),
            self.plural,
        )
    }
}

/// Tracks whether one CRD-backed kind currently exists
#[derive(Clone, Debug)]
pub struct CrdGate {
    group: String,
    resource: String,
    present: Arc<AtomicBool>,
    signal: Signal,
}

impl CrdGate {
    /// The cached presence flag, as of the last CRD change
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// A store of CustomResourceDefinitions answering "is group/resource installed"
#[derive(Debug)]
pub struct CrdRegistry {
    store: ResourceStore<CustomResourceDefinition>,
    gates: RwLock<Vec<CrdGate>>,
}

impl CrdRegistry {
    #[must_use]
    pub fn new(store: ResourceStore<CustomResourceDefinition>) -> Self {
        Self {
            store,
            gates: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &ResourceStore<CustomResourceDefinition> {
        &self.store
    }

    /// Whether a CRD serving `resource` (plural) in `group` is installed
    #[must_use]
    pub fn exists(&self, group: &str, resource: &str) -> bool {
        self.store
            .any(|crd| crd.spec.group == group && crd.spec.names.plural == resource)
    }

    /// Register `store` as gated on the CRD for `group`/`resource`
    ///
    /// The store is notified on every subsequent [`CrdRegistry::refresh`].
    pub fn gate<K>(&self, store: &ResourceStore<K>, group: &str, resource: &str) -> CrdGate {
        let gate = CrdGate {
            group: group.to_string(),
            resource: resource.to_string(),
            present: Arc::new(AtomicBool::new(self.exists(group, resource))),
            signal: store.signal().clone(),
        };
        self.gates.write().push(gate.clone());
        gate
    }

    /// Re-evaluate every gate and ping every dependent store
    pub fn refresh(&self) {
        for gate in self.gates.read().iter() {
            let present = self.exists(&gate.group, &gate.resource);
            if gate.present.swap(present, Ordering::AcqRel) != present {
                info!(group = %gate.group, resource = %gate.resource, present, "crd availability changed");
            }
            gate.signal.notify();
        }
    }
}

/// A dynamic store that reports itself unavailable while its CRD is absent
pub struct GatedFeed {
    store: ResourceStore<DynamicObject>,
    registry: Arc<CrdRegistry>,
    gate: CrdGate,
}

impl GatedFeed {
    #[must_use]
    pub fn new(store: ResourceStore<DynamicObject>, registry: Arc<CrdRegistry>, gate: CrdGate) -> Self {
        Self { store, registry, gate }
    }
}

impl Feed for GatedFeed {
    fn kind(&self) -> &str {
        self.store.kind()
    }

    fn list(&self, filter: &Filter, view: View) -> Vec<Value> {
        Feed::list(&self.store, filter, view)
    }

    fn get(&self, uid: &str) -> Option<Value> {
        Feed::get(&self.store, uid)
    }

    fn changes(&self) -> Changes {
        self.store.changes()
    }

    // checked against the registry on every call rather than trusting the cached flag
    fn available(&self) -> bool {
        self.registry.exists(self.gate.group(), self.gate.resource())
    }
}
