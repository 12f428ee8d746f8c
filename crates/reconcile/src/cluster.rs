//! Narrow seam between reconciliation logic and the orchestration API.

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use svcwatch_core::{ClusterError, Labels, PodObject, ServiceObject};

/// One-shot calls the reconciler makes while processing an event.
///
/// Calls are best-effort and independent: no retries, no resource versions.
/// Watch streams are not part of this trait; they feed the event queue directly.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    /// Pods in `namespace` whose labels satisfy `selector`.
    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<PodObject>, ClusterError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceObject>, ClusterError>;

    /// Fails with `AlreadyExists` when a Pod of the same name exists.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), ClusterError>;

    /// Fails with `NotFound` when no such Pod exists.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Pod spec carried by a PodTemplate.
    async fn read_pod_template(&self, name: &str, namespace: &str) -> Result<PodSpec, ClusterError>;
}
