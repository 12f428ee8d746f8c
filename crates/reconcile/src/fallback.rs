//! Fallback ("default") Pods for critical Services.
//!
//! Both operations are idempotent and best-effort: API failures are logged,
//! never retried, and never reflected in reconciliation state.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use metrics::counter;
use svcwatch_core::{Labels, ServiceObject, WatcherConfig, FALLBACK_ANNOTATION, FALLBACK_ANNOTATION_VALUE};
use tracing::{debug, error, info, warn};

use crate::Cluster;

/// What a fallback operation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackOutcome {
    Created,
    Deleted,
    /// Create observed an existing Pod of the same name.
    AlreadyExists,
    /// Delete observed no Pod of that name.
    NotFound,
    /// The configured PodTemplate could not be read.
    TemplateUnavailable,
    /// Service cannot have endpoints (ExternalName, no selector, terminating).
    Skipped,
    Failed,
}

impl FallbackOutcome {
    fn as_label(self) -> &'static str {
        match self {
            FallbackOutcome::Created => "created",
            FallbackOutcome::Deleted => "deleted",
            FallbackOutcome::AlreadyExists => "already_exists",
            FallbackOutcome::NotFound => "not_found",
            FallbackOutcome::TemplateUnavailable => "template_unavailable",
            FallbackOutcome::Skipped => "skipped",
            FallbackOutcome::Failed => "failed",
        }
    }
}

pub struct FallbackPods {
    cluster: Arc<dyn Cluster>,
    config: Arc<WatcherConfig>,
}

impl FallbackPods {
    pub fn new(cluster: Arc<dyn Cluster>, config: Arc<WatcherConfig>) -> Self { Self { cluster, config } }

    pub fn pod_name(&self, svc: &ServiceObject) -> String { self.config.fallback_pod_name(&svc.name) }

    /// Pod manifest for `svc`: selector as labels, ownership annotation, template spec.
    pub fn manifest(&self, svc: &ServiceObject, selector: &Labels, spec: PodSpec) -> Pod {
        let annotations = BTreeMap::from([(FALLBACK_ANNOTATION.to_string(), FALLBACK_ANNOTATION_VALUE.to_string())]);
        Pod {
            metadata: ObjectMeta {
                name: Some(self.pod_name(svc)),
                namespace: Some(svc.namespace.clone()),
                labels: Some(selector.clone()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        }
    }

    /// Create the fallback Pod for `svc` unless one already exists.
    pub async fn ensure_present(&self, svc: &ServiceObject) -> FallbackOutcome {
        let outcome = self.create(svc).await;
        counter!("svcwatch_fallback_ops_total", 1u64, "op" => "create", "outcome" => outcome.as_label());
        outcome
    }

    /// Delete the fallback Pod for `svc` if there is one.
    pub async fn ensure_absent(&self, svc: &ServiceObject) -> FallbackOutcome {
        let name = self.pod_name(svc);
        info!(ns = %svc.namespace, service = %svc.name, pod = %name, "deleting fallback pod");
        let outcome = match self.cluster.delete_pod(&svc.namespace, &name).await {
            Ok(()) => {
                warn!(ns = %svc.namespace, pod = %name, "fallback pod deleted");
                FallbackOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                info!(ns = %svc.namespace, pod = %name, "no fallback pod to delete");
                FallbackOutcome::NotFound
            }
            Err(e) => {
                error!(ns = %svc.namespace, pod = %name, error = %e, "delete fallback pod failed");
                FallbackOutcome::Failed
            }
        };
        counter!("svcwatch_fallback_ops_total", 1u64, "op" => "delete", "outcome" => outcome.as_label());
        outcome
    }

    async fn create(&self, svc: &ServiceObject) -> FallbackOutcome {
        let Some(selector) = svc.pod_selector() else {
            debug!(ns = %svc.namespace, service = %svc.name, "service cannot have endpoints; no fallback pod");
            return FallbackOutcome::Skipped;
        };
        let (tpl, tpl_ns) = (&self.config.pod_template, &self.config.pod_template_namespace);
        info!(ns = %svc.namespace, service = %svc.name, template = %tpl, template_ns = %tpl_ns, "creating fallback pod");

        let spec = match self.cluster.read_pod_template(tpl, tpl_ns).await {
            Ok(spec) => spec,
            Err(e) => {
                error!(template = %tpl, template_ns = %tpl_ns, error = %e, "read pod template failed");
                return FallbackOutcome::TemplateUnavailable;
            }
        };
        let pod = self.manifest(svc, selector, spec);
        let name = self.pod_name(svc);
        match self.cluster.create_pod(&svc.namespace, &pod).await {
            Ok(()) => {
                warn!(ns = %svc.namespace, pod = %name, "fallback pod created");
                FallbackOutcome::Created
            }
            Err(e) if e.is_already_exists() => {
                info!(ns = %svc.namespace, pod = %name, "fallback pod already exists");
                FallbackOutcome::AlreadyExists
            }
            Err(e) => {
                error!(ns = %svc.namespace, pod = %name, error = %e, "create fallback pod failed");
                FallbackOutcome::Failed
            }
        }
    }
}
