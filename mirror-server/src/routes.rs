//! URL layout
use crate::{binder, status};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use mirror_runtime::{Cache, Feed, Session};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Picks one feed out of the current cache
///
/// Handlers hold one of these rather than a feed so every request sees the current
/// cache generation.
pub type Resolve = fn(&Cache) -> Arc<dyn Feed>;

#[derive(Clone, Debug)]
pub struct AppState {
    pub session: Session,
    /// Cancelled on shutdown to end open streams
    pub shutdown: CancellationToken,
}

/// Every resource endpoint under `/api/v1/resources`
pub const FEEDS: &[(&str, Resolve)] = &[
    ("/nodes", |c| c.nodes.feed()),
    ("/events", |c| c.events.feed()),
    ("/namespaces", |c| c.namespaces.feed()),
    ("/custom-resource-definitions", |c| c.crds.store().feed()),
    ("/workloads/pods", |c| c.pods.feed()),
    ("/workloads/deployments", |c| c.deployments.feed()),
    ("/workloads/daemonsets", |c| c.daemon_sets.feed()),
    ("/workloads/statefulsets", |c| c.stateful_sets.feed()),
    ("/workloads/replicasets", |c| c.replica_sets.feed()),
    ("/workloads/jobs", |c| c.jobs.feed()),
    ("/workloads/cronjobs", |c| c.cron_jobs.feed()),
    ("/workloads/podmetrics", |c| c.metrics.feed()),
    ("/configs/configmaps", |c| c.config_maps.feed()),
    ("/configs/secrets", |c| c.secrets.feed()),
    ("/configs/packages", |c| c.gated(&c.packages)),
    ("/configs/exemptions", |c| c.gated(&c.exemptions)),
    ("/cluster-ops/mutatingwebhooks", |c| c.mutating_webhooks.feed()),
    ("/cluster-ops/validatingwebhooks", |c| c.validating_webhooks.feed()),
    ("/cluster-ops/hpas", |c| c.hpas.feed()),
    ("/cluster-ops/priority-classes", |c| c.priority_classes.feed()),
    ("/cluster-ops/runtime-classes", |c| c.runtime_classes.feed()),
    ("/cluster-ops/poddisruptionbudgets", |c| c.pod_disruption_budgets.feed()),
    ("/cluster-ops/limit-ranges", |c| c.limit_ranges.feed()),
    ("/cluster-ops/resource-quotas", |c| c.resource_quotas.feed()),
    ("/networks/services", |c| c.services.feed()),
    ("/networks/networkpolicies", |c| c.network_policies.feed()),
    ("/networks/endpoints", |c| c.endpoints.feed()),
    ("/networks/virtualservices", |c| c.gated(&c.virtual_services)),
    ("/storage/persistentvolumes", |c| c.persistent_volumes.feed()),
    ("/storage/persistentvolumeclaims", |c| c.persistent_volume_claims.feed()),
    ("/storage/storageclasses", |c| c.storage_classes.feed()),
];

fn overview(cache: &Cache) -> Arc<dyn Feed> {
    Arc::new(cache.overview())
}

fn resources() -> Router<AppState> {
    FEEDS.iter().fold(Router::new(), |router, &(path, resolve)| {
        router
            .route(
                path,
                get(move |state: State<AppState>, query: Query<binder::Params>| {
                    binder::list(state, query, resolve)
                }),
            )
            .route(
                &format!("{path}/{{uid}}"),
                get(
                    move |state: State<AppState>, uid: Path<String>, query: Query<binder::Params>| {
                        binder::single(state, uid, query, resolve)
                    },
                ),
            )
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/resources", resources())
        .route(
            "/api/v1/monitor/cluster-overview",
            get(|state: State<AppState>, query: Query<binder::Params>| {
                binder::object(state, query, overview)
            }),
        )
        .route("/health", get(status::stream))
        .route("/healthz", get(status::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
