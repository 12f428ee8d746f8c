//! service-watcher kubehub: kube client wiring, watch adapters and the
//! kube-backed `Cluster` implementation.

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodTemplate, Service};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use serde::{Deserialize, Serialize};
use svcwatch_core::{render_selector, ClusterError, Labels, PodObject, ServiceObject};
use svcwatch_reconcile::Cluster;
use tracing::{debug, info};

mod normalize;
mod watch;

pub use normalize::{critical_service_resource, critical_service_spec, pod_object, service_object};
pub use watch::{critical_service_event, pod_event, service_event, watch_critical_services, watch_pods, watch_services};

/// Build a client from an explicit kubeconfig, or infer one (local kubeconfig, then in-cluster).
pub async fn client(kubeconfig: Option<&Path>) -> Result<Client> {
    let Some(path) = kubeconfig else {
        return Client::try_default().await.context("inferring kube config");
    };
    let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
    let cfg = kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("loading kubeconfig {}", path.display()))?;
    info!(kubeconfig = %path.display(), cluster = %cfg.cluster_url, "kube config loaded");
    Client::try_from(cfg).context("building kube client")
}

/// Map a kube error onto the reconciler's error taxonomy.
fn cluster_error(e: kube::Error, kind: &str, namespace: &str, name: &str) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::already_exists(kind, namespace, name),
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::not_found(kind, namespace, name),
        other => ClusterError::Api(other.to_string()),
    }
}

/// `Cluster` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }

    pub fn client(&self) -> &Client { &self.client }

    /// Services in every namespace.
    pub async fn list_all_services(&self) -> Result<Vec<ServiceObject>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.context("listing services")?;
        Ok(list.items.iter().map(service_object).collect())
    }

    /// Every Pod with its IP, across all namespaces.
    pub async fn list_pod_ips(&self) -> Result<Vec<PodIp>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.context("listing pods")?;
        Ok(list
            .items
            .into_iter()
            .map(|p| PodIp {
                ip: p.status.and_then(|s| s.pod_ip),
                namespace: p.metadata.namespace.unwrap_or_default(),
                name: p.metadata.name.unwrap_or_default(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodIp {
    pub ip: Option<String>,
    pub namespace: String,
    pub name: String,
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<PodObject>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&render_selector(selector));
        let list = api.list(&lp).await.map_err(|e| ClusterError::Api(e.to_string()))?;
        debug!(ns = %namespace, selector = %render_selector(selector), count = list.items.len(), "listed pods");
        Ok(list.items.iter().map(pod_object).collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceObject>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await.map_err(|e| ClusterError::Api(e.to_string()))?;
        Ok(list.items.iter().map(service_object).collect())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let name = pod.metadata.name.clone().unwrap_or_default();
        api.create(&PostParams::default(), pod).await.map_err(|e| cluster_error(e, "Pod", namespace, &name))?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let _ = api.delete(name, &DeleteParams::default()).await.map_err(|e| cluster_error(e, "Pod", namespace, name))?;
        Ok(())
    }

    async fn read_pod_template(&self, name: &str, namespace: &str) -> Result<PodSpec, ClusterError> {
        let api: Api<PodTemplate> = Api::namespaced(self.client.clone(), namespace);
        let tpl = api.get(name).await.map_err(|e| cluster_error(e, "PodTemplate", namespace, name))?;
        tpl.template
            .and_then(|t| t.spec)
            .ok_or_else(|| ClusterError::Api(format!("PodTemplate {}/{} has no pod spec", namespace, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_err(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse { status: "Failure".into(), message: "m".into(), reason: "r".into(), code })
    }

    #[test]
    fn conflict_maps_to_already_exists() {
        assert!(cluster_error(api_err(409), "Pod", "ns1", "p").is_already_exists());
    }

    #[test]
    fn missing_maps_to_not_found() {
        let e = cluster_error(api_err(404), "PodTemplate", "default", "tpl");
        assert!(e.is_not_found());
        assert_eq!(e.to_string(), "PodTemplate default/tpl not found");
    }

    #[test]
    fn other_codes_are_api_errors() {
        assert!(matches!(cluster_error(api_err(403), "Pod", "ns1", "p"), ClusterError::Api(_)));
    }
}
