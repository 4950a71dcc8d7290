//! Time-driven cache of pod usage with bounded history
mod quantity;
mod source;
mod types;

pub use self::{
    quantity::{parse_cpu, parse_memory, parse_quantity},
    source::{ApiMetrics, MetricsSource},
    types::{ContainerMetrics, NodeMetrics, PodMetrics},
};
use crate::{
    feed::{to_json, Feed, View},
    store::{Changes, Filter, ResourceStore, Signal},
};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reported as current usage while metrics-server is unreachable
pub const UNAVAILABLE: f64 = -1.0;

/// How many pod metrics are fetched concurrently during a pass
const FETCH_CONCURRENCY: usize = 16;

/// Cluster-wide usage at one point in time
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Millicores
    pub cpu: f64,
    /// Bytes
    pub memory: f64,
}

#[derive(Debug)]
struct State {
    pods: AHashMap<String, Arc<PodMetrics>>,
    cpu: f64,
    memory: f64,
    history: VecDeque<Sample>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    history_limit: usize,
    signal: Signal,
}

/// Periodically polled per-pod usage, cluster totals, and a ring of past totals
///
/// Cloning produces a new handle to the same poller.
#[derive(Clone, Debug)]
pub struct MetricsPoller {
    inner: Arc<Inner>,
}

/// The parts of a sparse pod the poller needs
struct PodKey {
    uid: String,
    namespace: String,
    name: String,
}

impl PodKey {
    fn running(sparse: &Value) -> Option<Self> {
        if sparse.pointer("/status/phase")?.as_str()? != "Running" {
            return None;
        }
        let field = |path: &str| sparse.pointer(path)?.as_str().map(str::to_string);
        Some(Self {
            uid: field("/metadata/uid")?,
            namespace: field("/metadata/namespace")?,
            name: field("/metadata/name")?,
        })
    }
}

impl MetricsPoller {
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    pods: AHashMap::new(),
                    cpu: 0.0,
                    memory: 0.0,
                    history: VecDeque::with_capacity(history_limit),
                }),
                history_limit,
                signal: Signal::new(),
            }),
        }
    }

    /// Poll immediately, then every `period`, until `token` is cancelled
    pub async fn run<S>(self, pods: ResourceStore<Pod>, source: S, period: Duration, token: CancellationToken)
    where
        S: MetricsSource,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("metrics poller stopped");
                    return;
                }
                _ = ticker.tick() => self.poll(&pods, &source).await,
            }
        }
    }

    /// Run a single polling pass
    ///
    /// A failing pod is logged and left out of the totals; it never aborts the pass.
    pub async fn poll<S>(&self, pods: &ResourceStore<Pod>, source: &S)
    where
        S: MetricsSource + ?Sized,
    {
        if let Err(err) = source.probe().await {
            debug!(error = %err, "skipping metrics pass");
            self.record_unavailable();
            return;
        }

        let running = pods
            .sparse_resources(&Filter::default())
            .iter()
            .filter_map(|pod| PodKey::running(pod))
            .collect::<Vec<_>>();
        let fetched = stream::iter(running)
            .map(|pod| async move {
                match source.pod_metrics(&pod.namespace, &pod.name).await {
                    Ok(metrics) => Some((pod.uid, metrics)),
                    Err(err) => {
                        warn!(
                            namespace = %pod.namespace,
                            name = %pod.name,
                            error = %err,
                            "failed to fetch pod metrics"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .filter_map(|res| async move { res })
            .collect::<Vec<_>>()
            .await;

        let (mut cpu, mut memory) = (0.0, 0.0);
        let mut docs = AHashMap::with_capacity(fetched.len());
        for (uid, metrics) in fetched {
            let (pod_cpu, pod_memory) = metrics.usage();
            cpu += pod_cpu;
            memory += pod_memory;
            docs.insert(uid, Arc::new(metrics));
        }
        self.record(Some(docs), cpu, memory, (cpu, memory));
    }

    fn record_unavailable(&self) {
        // the sentinel stays out of the history so charts keep a sane scale
        self.record(None, UNAVAILABLE, UNAVAILABLE, (0.0, 0.0));
    }

    fn record(
        &self,
        pods: Option<AHashMap<String, Arc<PodMetrics>>>,
        cpu: f64,
        memory: f64,
        sample: (f64, f64),
    ) {
        {
            let mut state = self.inner.state.write();
            if let Some(pods) = pods {
                state.pods = pods;
            }
            state.cpu = cpu;
            state.memory = memory;
            state.history.push_back(Sample {
                timestamp: Utc::now(),
                cpu: sample.0,
                memory: sample.1,
            });
            while state.history.len() > self.inner.history_limit {
                state.history.pop_front();
            }
        }
        self.inner.signal.notify();
    }

    /// Per-pod metric documents, optionally limited to one namespace
    #[must_use]
    pub fn all(&self, namespace: Option<&str>) -> Vec<Arc<PodMetrics>> {
        self.inner
            .state
            .read()
            .pods
            .values()
            .filter(|m| namespace.is_none_or(|ns| m.metadata.namespace.as_deref() == Some(ns)))
            .cloned()
            .collect()
    }

    /// Number of pods with a current metric document
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.state.read().pods.len()
    }

    /// Current cluster totals as (millicores, bytes), or `(-1, -1)` when unavailable
    #[must_use]
    pub fn usage(&self) -> (f64, f64) {
        let state = self.inner.state.read();
        (state.cpu, state.memory)
    }

    /// Past totals, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<Sample> {
        self.inner.state.read().history.iter().copied().collect()
    }

    #[must_use]
    pub fn changes(&self) -> Changes {
        self.inner.signal.subscribe()
    }

    #[must_use]
    pub fn feed(&self) -> Arc<dyn Feed> {
        Arc::new(self.clone())
    }
}

// The name filter is ignored: metric documents are looked up by namespace only
impl Feed for MetricsPoller {
    fn kind(&self) -> &str {
        "PodMetrics"
    }

    fn list(&self, filter: &Filter, _view: View) -> Vec<Value> {
        self.all(filter.namespace())
            .iter()
            .filter_map(|m| to_json("PodMetrics", m.as_ref()))
            .collect()
    }

    fn get(&self, uid: &str) -> Option<Value> {
        let doc = self.inner.state.read().pods.get(uid).cloned()?;
        to_json("PodMetrics", doc.as_ref())
    }

    fn changes(&self) -> Changes {
        MetricsPoller::changes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{MetricsPoller, MetricsSource, PodMetrics, UNAVAILABLE};
    use crate::{
        feed::{Feed, View},
        project::Projection,
        store::{tests::pod, Event, Filter, ResourceStore},
        Error, Result,
    };
    use async_trait::async_trait;
    use futures::FutureExt;
    use k8s_openapi::{api::core::v1::Pod, apimachinery::pkg::api::resource::Quantity};
    use kube::api::ObjectMeta;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeMetrics {
        down: AtomicBool,
    }

    #[async_trait]
    impl MetricsSource for FakeMetrics {
        async fn probe(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(Error::MetricsUnavailable)
            } else {
                Ok(())
            }
        }

        async fn pod_metrics(&self, namespace: &str, name: &str) -> Result<PodMetrics> {
            if name == "flaky" {
                return Err(Error::MetricsUnavailable);
            }
            Ok(PodMetrics {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                containers: vec![super::ContainerMetrics {
                    name: "app".to_string(),
                    usage: [
                        ("cpu".to_string(), Quantity("100m".to_string())),
                        ("memory".to_string(), Quantity("1Ki".to_string())),
                    ]
                    .into(),
                }],
                ..PodMetrics::default()
            })
        }
    }

    fn pods() -> ResourceStore<Pod> {
        let store = ResourceStore::new("Pod", Projection::parse("metadata,status.phase"));
        store.apply(Event::Apply(pod("1", "podinfo", "web")));
        store.apply(Event::Apply(pod("2", "podinfo", "worker")));
        store.apply(Event::Apply(pod("3", "kube-system", "flaky")));
        let mut done = pod("4", "podinfo", "migration");
        done.status.as_mut().unwrap().phase = Some("Succeeded".to_string());
        store.apply(Event::Apply(done));
        store
    }

    #[tokio::test]
    async fn totals_cover_running_pods_and_skip_failures() {
        let poller = MetricsPoller::new(200);
        let mut changes = poller.changes();
        poller.poll(&pods(), &FakeMetrics::default()).await;

        let (cpu, memory) = poller.usage();
        assert!((cpu - 200.0).abs() < 1e-9);
        assert!((memory - 2048.0).abs() < 1e-9);
        assert_eq!(poller.count(), 2);
        assert_eq!(poller.all(Some("podinfo")).len(), 2);
        assert!(poller.all(Some("kube-system")).is_empty());
        assert!(poller.get("1").is_some());
        assert!(poller.get("4").is_none());
        assert_eq!(poller.history().len(), 1);
        assert!(changes.changed().now_or_never().is_some());
    }

    #[tokio::test]
    async fn outage_uses_sentinel_without_polluting_history() {
        let poller = MetricsPoller::new(200);
        let source = FakeMetrics::default();
        poller.poll(&pods(), &source).await;

        source.down.store(true, Ordering::SeqCst);
        poller.poll(&pods(), &source).await;

        assert_eq!(poller.usage(), (UNAVAILABLE, UNAVAILABLE));
        let latest = *poller.history().last().unwrap();
        assert_eq!((latest.cpu, latest.memory), (0.0, 0.0));
        // documents from the last good pass are kept
        assert_eq!(poller.count(), 2);
    }

    #[tokio::test]
    async fn history_drops_exactly_the_oldest_sample() {
        let poller = MetricsPoller::new(3);
        let store = pods();
        let source = FakeMetrics::default();
        for _ in 0..3 {
            poller.poll(&store, &source).await;
        }
        let before = poller.history();
        assert_eq!(before.len(), 3);

        source.down.store(true, Ordering::SeqCst);
        poller.poll(&store, &source).await;
        let after = poller.history();
        assert_eq!(after.len(), 3);
        assert_eq!(after[..2], before[1..]);
        assert_eq!(after[2].cpu, 0.0);
    }

    #[tokio::test]
    async fn feed_filters_on_namespace_only() {
        let poller = MetricsPoller::new(200);
        poller.poll(&pods(), &FakeMetrics::default()).await;
        let feed = poller.feed();
        assert_eq!(feed.list(&Filter::new(Some("podinfo"), Some("nomatch")), View::Sparse).len(), 2);
        assert!(feed.list(&Filter::new(Some("default"), None), View::Dense).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_immediately_and_stops_on_cancel() {
        let poller = MetricsPoller::new(200);
        let token = tokio_util::sync::CancellationToken::new();
        let task = tokio::spawn(poller.clone().run(
            pods(),
            FakeMetrics::default(),
            std::time::Duration::from_secs(30),
            token.clone(),
        ));
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(poller.history().len(), 1);
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(poller.history().len(), 2);
        token.cancel();
        task.await.unwrap();
    }
}
