//! List-view projections for every mirrored kind
//!
//! Each constant uses the same syntax as the `fields` query parameter. The common
//! identity fields are prepended by [`sparse`].
use crate::project::Projection;

const COMMON: &str = "apiVersion,kind,metadata";

pub const POD: &str = "spec.nodeName,spec.containers[].name,spec.containers[].image,\
    status.phase,status.podIP,status.startTime,status.conditions,\
    status.containerStatuses[].name,status.containerStatuses[].ready,\
    status.containerStatuses[].restartCount,status.containerStatuses[].state";
pub const DEPLOYMENT: &str = "spec.replicas,status.replicas,status.readyReplicas,\
    status.availableReplicas,status.updatedReplicas,status.conditions";
pub const DAEMON_SET: &str = "status.desiredNumberScheduled,status.currentNumberScheduled,\
    status.numberReady,status.numberAvailable,status.updatedNumberScheduled";
pub const STATEFUL_SET: &str = "spec.replicas,spec.serviceName,status.replicas,\
    status.readyReplicas,status.currentReplicas,status.updatedReplicas";
pub const REPLICA_SET: &str = "spec.replicas,status.replicas,status.readyReplicas,status.availableReplicas";
pub const JOB: &str = "spec.completions,spec.parallelism,status.active,status.succeeded,\
    status.failed,status.startTime,status.completionTime,status.conditions";
pub const CRON_JOB: &str = "spec.schedule,spec.suspend,status.active,status.lastScheduleTime,\
    status.lastSuccessfulTime";
pub const NODE: &str = "spec.unschedulable,spec.taints,status.conditions,status.nodeInfo,\
    status.capacity,status.allocatable,status.addresses";
pub const EVENT: &str = "reason,message,type,count,firstTimestamp,lastTimestamp,\
    involvedObject,source";
pub const NAMESPACE: &str = "status.phase";
pub const CONFIG_MAP: &str = "";
// secret payloads never leave the dense view
pub const SECRET: &str = "type";
pub const PACKAGE: &str = "spec.network.expose,status.phase,status.endpoints,status.ssoClientIds,\
    status.monitors,status.retryAttempt";
pub const EXEMPTION: &str = "spec.exemptions[].title,spec.exemptions[].policies,\
    spec.exemptions[].matcher";
pub const MUTATING_WEBHOOK: &str = "webhooks[].name,webhooks[].failurePolicy";
pub const VALIDATING_WEBHOOK: &str = "webhooks[].name,webhooks[].failurePolicy";
pub const HPA: &str = "spec.minReplicas,spec.maxReplicas,spec.scaleTargetRef,\
    status.currentReplicas,status.desiredReplicas,status.currentMetrics";
pub const PRIORITY_CLASS: &str = "value,globalDefault,preemptionPolicy,description";
pub const RUNTIME_CLASS: &str = "handler";
pub const POD_DISRUPTION_BUDGET: &str = "spec.minAvailable,spec.maxUnavailable,\
    status.currentHealthy,status.desiredHealthy,status.disruptionsAllowed,status.expectedPods";
pub const LIMIT_RANGE: &str = "spec.limits";
pub const RESOURCE_QUOTA: &str = "spec.hard,status.hard,status.used";
pub const SERVICE: &str = "spec.type,spec.clusterIP,spec.externalIPs,spec.ports,\
    status.loadBalancer";
pub const NETWORK_POLICY: &str = "spec.podSelector,spec.policyTypes";
pub const ENDPOINTS: &str = "subsets[].addresses[].ip,subsets[].ports";
pub const VIRTUAL_SERVICE: &str = "spec.hosts,spec.gateways";
pub const PERSISTENT_VOLUME: &str = "spec.capacity,spec.accessModes,spec.claimRef,\
    spec.persistentVolumeReclaimPolicy,spec.storageClassName,status.phase";
pub const PERSISTENT_VOLUME_CLAIM: &str = "spec.accessModes,spec.storageClassName,spec.volumeName,\
    status.phase,status.capacity";
pub const STORAGE_CLASS: &str = "provisioner,reclaimPolicy,volumeBindingMode,allowVolumeExpansion";
pub const CUSTOM_RESOURCE_DEFINITION: &str = "spec.group,spec.names,spec.scope,spec.versions[].name";

/// The sparse projection for a kind with the given extra fields
#[must_use]
pub fn sparse(extra: &str) -> Projection {
    if extra.is_empty() {
        Projection::parse(COMMON)
    } else {
        Projection::parse(&format!("{COMMON},{extra}"))
    }
}
