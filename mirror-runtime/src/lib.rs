//! Live in-memory mirror of a Kubernetes cluster
//!
//! A [`Cache`] watches every tracked kind into a [`ResourceStore`] keyed by UID, holding
//! each object both dense and as a curated sparse projection. A [`MetricsPoller`] keeps
//! per-pod usage and a bounded history next to it. The [`Session`] owns the current
//! cache and replaces it wholesale when the api server comes back after an outage.
//!
//! Readers are handed type-erased [`Feed`]s and subscribe to coalesced [`Changes`]
//! notifications; they never see individual watch events.

pub mod cache;
pub mod config;
pub mod crd;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod overview;
pub mod project;
pub mod reflect;
pub mod session;
pub mod sparse;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::Cache;
pub use config::Config;
pub use crd::{CrdRegistry, GatedFeed};
pub use error::{Error, Result};
pub use feed::{Feed, View};
pub use metrics::{MetricsPoller, Sample};
pub use overview::{ClusterOverview, Overview};
pub use project::Projection;
pub use session::{ClusterIdentity, ConnectionState, KubeConnector, Session, Status};
pub use store::{Changes, Event, Filter, ResourceStore};
