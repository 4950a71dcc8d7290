//! Cluster-wide capacity and usage summary
use crate::{
    feed::{to_json, Feed, View},
    metrics::{parse_cpu, parse_memory, MetricsPoller, Sample},
    store::{Changes, Filter, ResourceStore},
};
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Usage {
    pub cpu: f64,
    pub memory: f64,
}

/// The single document served by the cluster overview stream
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOverview {
    pub total_pods: usize,
    pub total_nodes: usize,
    /// Millicores, summed over node capacity
    pub cpu_capacity: f64,
    /// Bytes, summed over node capacity
    pub memory_capacity: f64,
    pub current_usage: Usage,
    pub historical_usage: Vec<Sample>,
}

/// Computes [`ClusterOverview`] from the pod and node stores and the metrics poller
#[derive(Clone, Debug)]
pub struct Overview {
    pods: ResourceStore<Pod>,
    nodes: ResourceStore<Node>,
    metrics: MetricsPoller,
}

impl Overview {
    #[must_use]
    pub fn new(pods: ResourceStore<Pod>, nodes: ResourceStore<Node>, metrics: MetricsPoller) -> Self {
        Self { pods, nodes, metrics }
    }

    #[must_use]
    pub fn compute(&self) -> ClusterOverview {
        let (cpu_capacity, memory_capacity) = self
            .nodes
            .resources(&Filter::default())
            .iter()
            .filter_map(|node| node.status.as_ref()?.capacity.as_ref())
            .fold((0.0, 0.0), |(cpu, memory), capacity| {
                let get = |key: &str, parse: fn(&str) -> Option<f64>| {
                    capacity.get(key).and_then(|q| parse(&q.0)).unwrap_or(0.0)
                };
                (cpu + get("cpu", parse_cpu), memory + get("memory", parse_memory))
            });
        let (cpu, memory) = self.metrics.usage();
        ClusterOverview {
            total_pods: self.pods.len(),
            total_nodes: self.nodes.len(),
            cpu_capacity,
            memory_capacity,
            current_usage: Usage { cpu, memory },
            historical_usage: self.metrics.history(),
        }
    }
}

// Served as a one-element list so the overview streams like any other collection
impl Feed for Overview {
    fn kind(&self) -> &str {
        "ClusterOverview"
    }

    fn list(&self, _filter: &Filter, _view: View) -> Vec<Value> {
        to_json("ClusterOverview", &self.compute()).into_iter().collect()
    }

    fn get(&self, _uid: &str) -> Option<Value> {
        None
    }

    fn changes(&self) -> Changes {
        self.pods
            .changes()
            .merge(self.nodes.changes())
            .merge(self.metrics.changes())
    }
}
