use super::types::{NodeMetrics, PodMetrics};
use crate::{Error, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::debug;

/// Where the poller reads usage from
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Cheap availability check for the metrics api
    async fn probe(&self) -> Result<()>;

    /// Current usage of a single pod
    async fn pod_metrics(&self, namespace: &str, name: &str) -> Result<PodMetrics>;
}

/// The `metrics.k8s.io` api served by metrics-server
#[derive(Clone)]
pub struct ApiMetrics {
    client: Client,
}

impl ApiMetrics {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSource for ApiMetrics {
    async fn probe(&self) -> Result<()> {
        let nodes: Api<NodeMetrics> = Api::all(self.client.clone());
        match nodes.list(&ListParams::default().limit(1)).await {
            Ok(_) => Ok(()),
            Err(err) => {
                debug!(error = %err, "node metrics probe failed");
                Err(Error::MetricsUnavailable)
            }
        }
    }

    async fn pod_metrics(&self, namespace: &str, name: &str) -> Result<PodMetrics> {
        let pods: Api<PodMetrics> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.get(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiMetrics, MetricsSource};
    use crate::Error;
    use http::{Request, Response, StatusCode};
    use kube::{client::Body, Client};
    use serde_json::json;

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    fn testcontext() -> (ApiMetrics, ApiServerHandle) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (ApiMetrics::new(Client::new(mock_service, "default")), handle)
    }

    fn respond(status: StatusCode, body: serde_json::Value) -> Response<Body> {
        Response::builder()
            .status(status)
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn probe_lists_a_single_node_metric() {
        let (metrics, mut handle) = testcontext();
        let apiserver = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert_eq!(request.uri().path(), "/apis/metrics.k8s.io/v1beta1/nodes");
            assert!(request.uri().query().unwrap_or_default().contains("limit=1"));
            send.send_response(respond(StatusCode::OK, json!({
                "kind": "NodeMetricsList",
                "apiVersion": "metrics.k8s.io/v1beta1",
                "metadata": {},
                "items": []
            })));
        });
        metrics.probe().await.unwrap();
        apiserver.await.unwrap();
    }

    #[tokio::test]
    async fn probe_reports_missing_metrics_api() {
        let (metrics, mut handle) = testcontext();
        let apiserver = tokio::spawn(async move {
            let (_, send) = handle.next_request().await.expect("service not called");
            send.send_response(respond(StatusCode::NOT_FOUND, json!({
                "kind": "Status",
                "apiVersion": "v1",
                "metadata": {},
                "status": "Failure",
                "message": "the server could not find the requested resource",
                "reason": "NotFound",
                "code": 404
            })));
        });
        assert!(matches!(metrics.probe().await, Err(Error::MetricsUnavailable)));
        apiserver.await.unwrap();
    }

    #[tokio::test]
    async fn pod_metrics_are_fetched_by_namespace_and_name() {
        let (metrics, mut handle) = testcontext();
        let apiserver = tokio::spawn(async move {
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(
                request.uri().path(),
                "/apis/metrics.k8s.io/v1beta1/namespaces/podinfo/pods/web"
            );
            send.send_response(respond(StatusCode::OK, json!({
                "kind": "PodMetrics",
                "apiVersion": "metrics.k8s.io/v1beta1",
                "metadata": { "name": "web", "namespace": "podinfo" },
                "containers": [{ "name": "app", "usage": { "cpu": "10m", "memory": "1Mi" } }]
            })));
        });
        let pod = metrics.pod_metrics("podinfo", "web").await.unwrap();
        let (cpu, memory) = pod.usage();
        assert!((cpu - 10.0).abs() < 1e-9);
        assert!((memory - 1_048_576.0).abs() < 1e-9);
        apiserver.await.unwrap();
    }
}
