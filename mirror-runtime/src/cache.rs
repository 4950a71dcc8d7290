//! One generation of mirrored cluster state
use crate::{
    config::Config,
    crd::{CrdGate, CrdRegistry, CustomKind, GatedFeed},
    feed::Feed,
    metrics::{ApiMetrics, MetricsPoller},
    overview::Overview,
    reflect::{reflect, WatcherSource},
    sparse::{self, sparse},
    store::ResourceStore,
    Error, Result,
};
use k8s_openapi::api::{
    admissionregistration::v1::{MutatingWebhookConfiguration, ValidatingWebhookConfiguration},
    apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet},
    autoscaling::v2::HorizontalPodAutoscaler,
    batch::v1::{CronJob, Job},
    core::v1::{
        ConfigMap, Endpoints, Event as CoreEvent, LimitRange, Namespace, Node, PersistentVolume,
        PersistentVolumeClaim, Pod, ResourceQuota, Secret, Service,
    },
    networking::v1::NetworkPolicy,
    node::v1::RuntimeClass,
    policy::v1::PodDisruptionBudget,
    scheduling::v1::PriorityClass,
    storage::v1::StorageClass,
};
use kube::{
    api::{Api, DynamicObject},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

pub const PACKAGE: CustomKind = CustomKind {
    group: "uds.dev",
    version: "v1alpha1",
    kind: "Package",
    plural: "packages",
};

pub const EXEMPTION: CustomKind = CustomKind {
    group: "uds.dev",
    version: "v1alpha1",
    kind: "Exemption",
    plural: "exemptions",
};

pub const VIRTUAL_SERVICE: CustomKind = CustomKind {
    group: "networking.istio.io",
    version: "v1",
    kind: "VirtualService",
    plural: "virtualservices",
};

/// A gated dynamic store and the CRD it depends on
#[derive(Clone, Debug)]
pub struct CustomStore {
    pub kind: CustomKind,
    pub store: ResourceStore<DynamicObject>,
    gate: CrdGate,
}

/// Every mirrored kind, plus metrics, for one connection to one cluster
///
/// All background tasks belong to the cache's cancellation token, which is cancelled
/// explicitly by the session or implicitly when the last handle is dropped.
pub struct Cache {
    pub nodes: ResourceStore<Node>,
    pub events: ResourceStore<CoreEvent>,
    pub namespaces: ResourceStore<Namespace>,

    pub pods: ResourceStore<Pod>,
    pub deployments: ResourceStore<Deployment>,
    pub daemon_sets: ResourceStore<DaemonSet>,
    pub stateful_sets: ResourceStore<StatefulSet>,
    pub replica_sets: ResourceStore<ReplicaSet>,
    pub jobs: ResourceStore<Job>,
    pub cron_jobs: ResourceStore<CronJob>,

    pub config_maps: ResourceStore<ConfigMap>,
    pub secrets: ResourceStore<Secret>,
    pub packages: CustomStore,
    pub exemptions: CustomStore,

    pub mutating_webhooks: ResourceStore<MutatingWebhookConfiguration>,
    pub validating_webhooks: ResourceStore<ValidatingWebhookConfiguration>,
    pub hpas: ResourceStore<HorizontalPodAutoscaler>,
    pub priority_classes: ResourceStore<PriorityClass>,
    pub runtime_classes: ResourceStore<RuntimeClass>,
    pub pod_disruption_budgets: ResourceStore<PodDisruptionBudget>,
    pub limit_ranges: ResourceStore<LimitRange>,
    pub resource_quotas: ResourceStore<ResourceQuota>,

    pub services: ResourceStore<Service>,
    pub network_policies: ResourceStore<NetworkPolicy>,
    pub endpoints: ResourceStore<Endpoints>,
    pub virtual_services: CustomStore,

    pub persistent_volumes: ResourceStore<PersistentVolume>,
    pub persistent_volume_claims: ResourceStore<PersistentVolumeClaim>,
    pub storage_classes: ResourceStore<StorageClass>,

    pub crds: Arc<CrdRegistry>,
    pub metrics: MetricsPoller,

    client: Option<Client>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("connected", &self.client.is_some())
            .field("pods", &self.pods.len())
            .field("nodes", &self.nodes.len())
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Cache {
    /// Start mirroring the cluster behind `client`
    ///
    /// Returns once the pod store has completed its initial list; metrics collection
    /// depends on it.
    ///
    /// # Errors
    ///
    /// [`Error::SyncTimeout`] when pods do not sync within `config.sync_timeout`. All tasks
    /// started so far are torn down before returning.
    pub async fn new(client: Client, config: &Config, token: CancellationToken) -> Result<Self> {
        let mut cache = Self::empty(config, token);
        cache.start_reflectors(&client, config.relist_interval);
        cache.client = Some(client.clone());

        debug!(timeout = ?config.sync_timeout, "waiting for pods to sync");
        timeout(config.sync_timeout, cache.pods.synced())
            .await
            .map_err(|_| Error::SyncTimeout {
                kind: cache.pods.kind().to_string(),
                timeout: config.sync_timeout,
            })?;
        info!(pods = cache.pods.len(), "pod store synced");

        tokio::spawn(cache.metrics.clone().run(
            cache.pods.clone(),
            ApiMetrics::new(client),
            config.metrics_interval,
            cache.token.child_token(),
        ));
        tokio::spawn(watch_crds(cache.crds.clone(), cache.token.child_token()));
        Ok(cache)
    }

    /// A cache with empty stores and no background tasks
    #[cfg(any(test, feature = "testing"))]
    #[must_use]
    pub fn detached() -> Self {
        Self::empty(&Config::default(), CancellationToken::new())
    }

    pub(crate) fn empty(config: &Config, token: CancellationToken) -> Self {
        let crds = Arc::new(CrdRegistry::new(ResourceStore::new(
            "CustomResourceDefinition",
            sparse(sparse::CUSTOM_RESOURCE_DEFINITION),
        )));
        let custom = |kind: CustomKind, fields: &str| {
            let store = ResourceStore::new(kind.kind, sparse(fields));
            let gate = crds.gate(&store, kind.group, kind.plural);
            CustomStore { kind, store, gate }
        };
        Self {
            nodes: ResourceStore::new("Node", sparse(sparse::NODE)),
            events: ResourceStore::new("Event", sparse(sparse::EVENT)),
            namespaces: ResourceStore::new("Namespace", sparse(sparse::NAMESPACE)),

            pods: ResourceStore::new("Pod", sparse(sparse::POD)),
            deployments: ResourceStore::new("Deployment", sparse(sparse::DEPLOYMENT)),
            daemon_sets: ResourceStore::new("DaemonSet", sparse(sparse::DAEMON_SET)),
            stateful_sets: ResourceStore::new("StatefulSet", sparse(sparse::STATEFUL_SET)),
            replica_sets: ResourceStore::new("ReplicaSet", sparse(sparse::REPLICA_SET)),
            jobs: ResourceStore::new("Job", sparse(sparse::JOB)),
            cron_jobs: ResourceStore::new("CronJob", sparse(sparse::CRON_JOB)),

            config_maps: ResourceStore::new("ConfigMap", sparse(sparse::CONFIG_MAP)),
            secrets: ResourceStore::new("Secret", sparse(sparse::SECRET)),
            packages: custom(PACKAGE, sparse::PACKAGE),
            exemptions: custom(EXEMPTION, sparse::EXEMPTION),

            mutating_webhooks: ResourceStore::new(
                "MutatingWebhookConfiguration",
                sparse(sparse::MUTATING_WEBHOOK),
            ),
            validating_webhooks: ResourceStore::new(
                "ValidatingWebhookConfiguration",
                sparse(sparse::VALIDATING_WEBHOOK),
            ),
            hpas: ResourceStore::new("HorizontalPodAutoscaler", sparse(sparse::HPA)),
            priority_classes: ResourceStore::new("PriorityClass", sparse(sparse::PRIORITY_CLASS)),
            runtime_classes: ResourceStore::new("RuntimeClass", sparse(sparse::RUNTIME_CLASS)),
            pod_disruption_budgets: ResourceStore::new(
                "PodDisruptionBudget",
                sparse(sparse::POD_DISRUPTION_BUDGET),
            ),
            limit_ranges: ResourceStore::new("LimitRange", sparse(sparse::LIMIT_RANGE)),
            resource_quotas: ResourceStore::new("ResourceQuota", sparse(sparse::RESOURCE_QUOTA)),

            services: ResourceStore::new("Service", sparse(sparse::SERVICE)),
            network_policies: ResourceStore::new("NetworkPolicy", sparse(sparse::NETWORK_POLICY)),
            endpoints: ResourceStore::new("Endpoints", sparse(sparse::ENDPOINTS)),
            virtual_services: custom(VIRTUAL_SERVICE, sparse::VIRTUAL_SERVICE),

            persistent_volumes: ResourceStore::new("PersistentVolume", sparse(sparse::PERSISTENT_VOLUME)),
            persistent_volume_claims: ResourceStore::new(
                "PersistentVolumeClaim",
                sparse(sparse::PERSISTENT_VOLUME_CLAIM),
            ),
            storage_classes: ResourceStore::new("StorageClass", sparse(sparse::STORAGE_CLASS)),

            metrics: MetricsPoller::new(config.history_limit),
            crds,
            client: None,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    fn start_reflectors(&self, client: &Client, relist: Duration) {
        let reflectors = Reflectors {
            client,
            relist,
            token: &self.token,
        };
        reflectors.spawn(self.crds.store());
        reflectors.spawn(&self.nodes);
        reflectors.spawn(&self.events);
        reflectors.spawn(&self.namespaces);
        reflectors.spawn(&self.pods);
        reflectors.spawn(&self.deployments);
        reflectors.spawn(&self.daemon_sets);
        reflectors.spawn(&self.stateful_sets);
        reflectors.spawn(&self.replica_sets);
        reflectors.spawn(&self.jobs);
        reflectors.spawn(&self.cron_jobs);
        reflectors.spawn(&self.config_maps);
        reflectors.spawn(&self.secrets);
        reflectors.spawn(&self.mutating_webhooks);
        reflectors.spawn(&self.validating_webhooks);
        reflectors.spawn(&self.hpas);
        reflectors.spawn(&self.priority_classes);
        reflectors.spawn(&self.runtime_classes);
        reflectors.spawn(&self.pod_disruption_budgets);
        reflectors.spawn(&self.limit_ranges);
        reflectors.spawn(&self.resource_quotas);
        reflectors.spawn(&self.services);
        reflectors.spawn(&self.network_policies);
        reflectors.spawn(&self.endpoints);
        reflectors.spawn(&self.persistent_volumes);
        reflectors.spawn(&self.persistent_volume_claims);
        reflectors.spawn(&self.storage_classes);
        for custom in [&self.packages, &self.exemptions, &self.virtual_services] {
            reflectors.spawn_custom(custom);
        }
    }

    /// The client this cache mirrors through; `None` for detached caches
    #[must_use]
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    /// The cancellation token owning this cache's tasks
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stop every background task
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A feed for a CRD-backed kind that reports the CRD's live presence
    #[must_use]
    pub fn gated(&self, custom: &CustomStore) -> Arc<dyn Feed> {
        Arc::new(GatedFeed::new(
            custom.store.clone(),
            self.crds.clone(),
            custom.gate.clone(),
        ))
    }

    #[must_use]
    pub fn overview(&self) -> Overview {
        Overview::new(self.pods.clone(), self.nodes.clone(), self.metrics.clone())
    }
}

struct Reflectors<'a> {
    client: &'a Client,
    relist: Duration,
    token: &'a CancellationToken,
}

impl Reflectors<'_> {
    fn spawn<K>(&self, store: &ResourceStore<K>)
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    {
        let source = WatcherSource::new(Api::<K>::all(self.client.clone()));
        tokio::spawn(reflect(
            source,
            store.clone(),
            self.relist,
            None,
            self.token.child_token(),
        ));
    }

    fn spawn_custom(&self, custom: &CustomStore) {
        let api = Api::<DynamicObject>::all_with(self.client.clone(), &custom.kind.api_resource());
        tokio::spawn(reflect(
            WatcherSource::new(api),
            custom.store.clone(),
            self.relist,
            Some(custom.gate.clone()),
            self.token.child_token(),
        ));
    }
}

/// Re-evaluate CRD gates whenever the set of CRDs changes
async fn watch_crds(crds: Arc<CrdRegistry>, token: CancellationToken) {
    let mut changes = crds.store().changes();
    crds.refresh();
    loop {
        tokio::select! {
            () = token.cancelled() => return,
            res = changes.changed() => {
                if res.is_err() {
                    return;
                }
                crds.refresh();
            }
        }
    }
}
