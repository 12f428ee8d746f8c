//! Conversion of API objects into the reconciler's normalized types.

use anyhow::{anyhow, bail, Context, Result};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::Deserialize;
use smallvec::SmallVec;
use svcwatch_core::{CriticalServiceSpec, MatchLabel, PodObject, ServiceObject, FALLBACK_ANNOTATION, FALLBACK_ANNOTATION_VALUE};

pub const CRITICAL_SERVICE_GROUP: &str = "mycrd.com";
pub const CRITICAL_SERVICE_VERSION: &str = "v1";
pub const CRITICAL_SERVICE_KIND: &str = "CriticalService";
pub const CRITICAL_SERVICE_PLURAL: &str = "criticalservices";

/// Cluster-scoped CriticalService custom resource.
pub fn critical_service_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk(CRITICAL_SERVICE_GROUP, CRITICAL_SERVICE_VERSION, CRITICAL_SERVICE_KIND);
    ApiResource::from_gvk_with_plural(&gvk, CRITICAL_SERVICE_PLURAL)
}

pub fn service_object(svc: &Service) -> ServiceObject {
    let spec = svc.spec.as_ref();
    ServiceObject {
        name: svc.metadata.name.clone().unwrap_or_default(),
        namespace: svc.metadata.namespace.clone().unwrap_or_default(),
        type_: spec.and_then(|s| s.type_.clone()),
        selector: spec.and_then(|s| s.selector.clone()),
        labels: svc.metadata.labels.clone(),
        deleting: svc.metadata.deletion_timestamp.is_some(),
    }
}

pub fn pod_object(pod: &Pod) -> PodObject {
    let fallback = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(FALLBACK_ANNOTATION))
        .map(|v| v == FALLBACK_ANNOTATION_VALUE)
        .unwrap_or(false);
    PodObject {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        labels: pod.metadata.labels.clone(),
        fallback,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CriticalServiceBody {
    namespace: String,
    match_labels: SmallVec<[MatchLabel; 4]>,
}

/// Parse a CriticalService object. Wrong kind, missing name or a spec without
/// `namespace`/`matchLabels` is an error.
pub fn critical_service_spec(obj: &DynamicObject) -> Result<CriticalServiceSpec> {
    if let Some(types) = &obj.types {
        if types.kind != CRITICAL_SERVICE_KIND {
            bail!("unexpected kind {}", types.kind);
        }
    }
    let name = obj.metadata.name.clone().ok_or_else(|| anyhow!("CriticalService without metadata.name"))?;
    let spec = obj.data.get("spec").cloned().ok_or_else(|| anyhow!("CriticalService {} has no spec", name))?;
    let body: CriticalServiceBody =
        serde_json::from_value(spec).with_context(|| format!("decoding CriticalService {} spec", name))?;
    Ok(CriticalServiceSpec { name, namespace: body.namespace, match_labels: body.match_labels })
}
