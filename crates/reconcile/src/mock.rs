//! In-memory `Cluster` used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use svcwatch_core::{matches, pairs, ClusterError, Labels, PodObject, ServiceObject, FALLBACK_ANNOTATION};

use crate::Cluster;

/// Simple in-memory cluster. Created Pods become visible to `list_pods`, so a
/// fallback Pod counts toward its Service's selector like it would on a real cluster.
#[derive(Default)]
pub struct MockCluster {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    services: Vec<ServiceObject>,
    pods: Vec<PodObject>,
    templates: BTreeMap<(String, String), PodSpec>,
    created: Vec<Pod>,
    deleted: Vec<(String, String)>,
    fail_api: bool,
}

impl MockCluster {
    pub fn new() -> Self { Self::default() }

    pub fn with_template(self, name: &str, namespace: &str, spec: PodSpec) -> Self {
        self.lock().templates.insert((namespace.to_string(), name.to_string()), spec);
        self
    }

    pub fn put_service(&self, svc: ServiceObject) {
        let mut g = self.lock();
        g.services.retain(|s| !(s.namespace == svc.namespace && s.name == svc.name));
        g.services.push(svc);
    }

    pub fn remove_service(&self, namespace: &str, name: &str) {
        self.lock().services.retain(|s| !(s.namespace == namespace && s.name == name));
    }

    pub fn put_pod(&self, pod: PodObject) {
        let mut g = self.lock();
        g.pods.retain(|p| !(p.namespace == pod.namespace && p.name == pod.name));
        g.pods.push(pod);
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.lock().pods.retain(|p| !(p.namespace == namespace && p.name == name));
    }

    /// Make every call fail with `ClusterError::Api`.
    pub fn set_fail_api(&self, fail: bool) { self.lock().fail_api = fail; }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        let g = self.lock();
        let mut out: Vec<String> = g.pods.iter().filter(|p| p.namespace == namespace).map(|p| p.name.clone()).collect();
        out.sort();
        out
    }

    pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.lock().pods.iter().any(|p| p.namespace == namespace && p.name == name)
    }

    /// Every manifest accepted by `create_pod`, in order.
    pub fn created(&self) -> Vec<Pod> { self.lock().created.clone() }

    /// Every `(namespace, name)` successfully deleted, in order.
    pub fn deleted(&self) -> Vec<(String, String)> { self.lock().deleted.clone() }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl Cluster for MockCluster {
    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<PodObject>, ClusterError> {
        let g = self.lock();
        if g.fail_api { return Err(ClusterError::Api("list pods: injected failure".into())); }
        Ok(g.pods
            .iter()
            .filter(|p| p.namespace == namespace && matches(p.labels.as_ref(), pairs(selector)))
            .cloned()
            .collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceObject>, ClusterError> {
        let g = self.lock();
        if g.fail_api { return Err(ClusterError::Api("list services: injected failure".into())); }
        Ok(g.services.iter().filter(|s| s.namespace == namespace).cloned().collect())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<(), ClusterError> {
        let mut g = self.lock();
        if g.fail_api { return Err(ClusterError::Api("create pod: injected failure".into())); }
        let name = pod.metadata.name.clone().unwrap_or_default();
        if g.pods.iter().any(|p| p.namespace == namespace && p.name == name) {
            return Err(ClusterError::already_exists("Pod", namespace, &name));
        }
        let fallback = pod.metadata.annotations.as_ref().map(|a| a.contains_key(FALLBACK_ANNOTATION)).unwrap_or(false);
        g.pods.push(PodObject { name, namespace: namespace.to_string(), labels: pod.metadata.labels.clone(), fallback });
        g.created.push(pod.clone());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut g = self.lock();
        if g.fail_api { return Err(ClusterError::Api("delete pod: injected failure".into())); }
        let before = g.pods.len();
        g.pods.retain(|p| !(p.namespace == namespace && p.name == name));
        if g.pods.len() == before { return Err(ClusterError::not_found("Pod", namespace, name)); }
        g.deleted.push((namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn read_pod_template(&self, name: &str, namespace: &str) -> Result<PodSpec, ClusterError> {
        let g = self.lock();
        if g.fail_api { return Err(ClusterError::Api("read pod template: injected failure".into())); }
        g.templates
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("PodTemplate", namespace, name))
    }
}
