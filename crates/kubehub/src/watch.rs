//! Watch adapters: one long-lived watch per resource type, normalized into `Event`s.
//!
//! Adapters are transport only. The API server closes every watch after its
//! timeout; the adapter then resumes from the last seen resource version. An
//! error frame (including an expired resource version) or a transport error
//! ends the adapter with an error; there is no backoff or retry for those.

use std::fmt::Debug;

use anyhow::{anyhow, Context, Result};
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::{Api, WatchEvent, WatchParams},
    core::DynamicObject,
    Client, Resource, ResourceExt,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use svcwatch_core::{Action, Event, NamespaceFilter};
use svcwatch_reconcile::EventSender;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::normalize::{critical_service_resource, critical_service_spec, pod_object, service_object};

/// Services cluster-wide, restricted to `filter`.
pub async fn watch_services(client: Client, filter: NamespaceFilter, tx: EventSender, shutdown: watch::Receiver<bool>) -> Result<()> {
    let api: Api<Service> = Api::all(client);
    pump(api, "Service", tx, shutdown, move |action, svc| service_event(&filter, action, &svc)).await
}

/// Pods cluster-wide, restricted to `filter`.
pub async fn watch_pods(client: Client, filter: NamespaceFilter, tx: EventSender, shutdown: watch::Receiver<bool>) -> Result<()> {
    let api: Api<Pod> = Api::all(client);
    pump(api, "Pod", tx, shutdown, move |action, pod| pod_event(&filter, action, &pod)).await
}

/// CriticalServices cluster-wide. Never namespace-filtered; malformed objects are dropped.
pub async fn watch_critical_services(client: Client, tx: EventSender, shutdown: watch::Receiver<bool>) -> Result<()> {
    let ar = critical_service_resource();
    let api: Api<DynamicObject> = Api::all_with(client, &ar);
    pump(api, "CriticalService", tx, shutdown, |action, obj| critical_service_event(action, &obj)).await
}

pub fn service_event(filter: &NamespaceFilter, action: Action, svc: &Service) -> Option<Event> {
    let o = service_object(svc);
    info!(event = %action, service = %o.name, type_ = ?o.type_, ns = %o.namespace, "service event");
    filter.allows(&o.namespace).then(|| Event::Service(action, o))
}

pub fn pod_event(filter: &NamespaceFilter, action: Action, pod: &Pod) -> Option<Event> {
    let o = pod_object(pod);
    info!(event = %action, pod = %o.name, ns = %o.namespace, "pod event");
    filter.allows(&o.namespace).then(|| Event::Pod(action, o))
}

pub fn critical_service_event(action: Action, obj: &DynamicObject) -> Option<Event> {
    match critical_service_spec(obj) {
        Ok(spec) => {
            info!(event = %action, critical = %spec.name, ns = %spec.namespace, "critical service event");
            Some(Event::CriticalService(action, spec))
        }
        Err(e) => {
            warn!(event = %action, name = ?obj.metadata.name, error = %e, "dropping malformed CriticalService");
            None
        }
    }
}

/// Resource version a watch resumes from after the server closes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchCursor {
    resource_version: String,
}

impl Default for WatchCursor {
    /// `"0"`: the server replays current objects as `ADDED`.
    fn default() -> Self { Self { resource_version: "0".to_string() } }
}

impl WatchCursor {
    pub(crate) fn resource_version(&self) -> &str { &self.resource_version }

    /// Record the version carried by `ev` and unwrap it into an object change.
    /// Bookmarks only move the cursor; error frames are fatal.
    pub(crate) fn advance<K: Resource>(&mut self, resource: &str, ev: WatchEvent<K>) -> Result<Option<(Action, K)>> {
        let (action, obj) = match ev {
            WatchEvent::Added(o) => (Action::Added, o),
            WatchEvent::Modified(o) => (Action::Modified, o),
            WatchEvent::Deleted(o) => (Action::Deleted, o),
            WatchEvent::Bookmark(b) => {
                self.resource_version = b.metadata.resource_version;
                return Ok(None);
            }
            WatchEvent::Error(e) => return Err(anyhow!("{} watch error {}: {}", resource, e.code, e.message)),
        };
        if let Some(rv) = obj.resource_version() {
            self.resource_version = rv;
        }
        Ok(Some((action, obj)))
    }
}

async fn pump<K, F>(api: Api<K>, resource: &'static str, tx: EventSender, mut shutdown: watch::Receiver<bool>, mut normalize: F) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(Action, K) -> Option<Event>,
{
    let wp = WatchParams::default();
    let mut cursor = WatchCursor::default();
    loop {
        let stream = api
            .watch(&wp, cursor.resource_version())
            .await
            .with_context(|| format!("starting {} watch", resource))?;
        futures::pin_mut!(stream);
        info!(resource, rv = %cursor.resource_version(), "watcher started");
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => {
                    info!(resource, "watcher shutting down");
                    return Ok(());
                }
                next = stream.try_next() => next.with_context(|| format!("{} watch stream", resource))?,
            };
            // Server-side timeout: resume where the closed stream left off.
            let Some(ev) = next else {
                debug!(resource, rv = %cursor.resource_version(), "watch closed by server; resuming");
                break;
            };
            let Some((action, obj)) = cursor.advance(resource, ev)? else { continue };
            counter!("svcwatch_watch_events_total", 1u64, "resource" => resource);
            if let Some(event) = normalize(action, obj) {
                if tx.send(event).is_err() {
                    debug!(resource, "event queue closed; watcher stopping");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_watch(v: serde_json::Value) -> WatchEvent<Pod> { serde_json::from_value(v).expect("watch event") }

    fn pod_json(name: &str, ns: &str, rv: &str) -> serde_json::Value {
        serde_json::json!({ "metadata": { "name": name, "namespace": ns, "resourceVersion": rv, "labels": { "app": "foo" } } })
    }

    #[test]
    fn cursor_follows_objects_and_bookmarks() {
        let mut cursor = WatchCursor::default();
        assert_eq!(cursor.resource_version(), "0");

        let added = pod_watch(serde_json::json!({ "type": "ADDED", "object": pod_json("web-1", "ns1", "11") }));
        let (action, pod) = cursor.advance("Pod", added).expect("advance").expect("object");
        assert_eq!(action, Action::Added);
        assert_eq!(pod.metadata.name.as_deref(), Some("web-1"));
        assert_eq!(cursor.resource_version(), "11");

        let bookmark = pod_watch(serde_json::json!({
            "type": "BOOKMARK",
            "object": { "kind": "Pod", "apiVersion": "v1", "metadata": { "resourceVersion": "42" } }
        }));
        assert!(cursor.advance("Pod", bookmark).expect("advance").is_none());
        assert_eq!(cursor.resource_version(), "42");

        let deleted = pod_watch(serde_json::json!({ "type": "DELETED", "object": pod_json("web-1", "ns1", "43") }));
        let (action, _) = cursor.advance("Pod", deleted).expect("advance").expect("object");
        assert_eq!(action, Action::Deleted);
        assert_eq!(cursor.resource_version(), "43");
    }

    #[test]
    fn error_frame_is_fatal_and_keeps_cursor() {
        let mut cursor = WatchCursor::default();
        let modified = pod_watch(serde_json::json!({ "type": "MODIFIED", "object": pod_json("web-1", "ns1", "7") }));
        cursor.advance("Pod", modified).expect("advance");

        let expired = pod_watch(serde_json::json!({
            "type": "ERROR",
            "object": { "status": "Failure", "message": "too old resource version", "reason": "Expired", "code": 410 }
        }));
        let err = cursor.advance("Pod", expired).expect_err("error frame");
        assert!(err.to_string().contains("410"));
        assert_eq!(cursor.resource_version(), "7");
    }

    #[test]
    fn object_without_version_keeps_cursor() {
        let mut cursor = WatchCursor::default();
        let added = pod_watch(serde_json::json!({ "type": "ADDED", "object": { "metadata": { "name": "x", "namespace": "ns1" } } }));
        assert!(cursor.advance("Pod", added).expect("advance").is_some());
        assert_eq!(cursor.resource_version(), "0");
    }

    #[test]
    fn allow_list_drops_services_and_pods_outside_it() {
        let filter = NamespaceFilter::new(["ns1"]);
        let svc = |ns: &str| -> Service {
            serde_json::from_value(serde_json::json!({
                "metadata": { "name": "svc1", "namespace": ns },
                "spec": { "selector": { "app": "foo" } }
            }))
            .expect("service")
        };
        let pod = |ns: &str| -> Pod { serde_json::from_value(pod_json("web-1", ns, "1")).expect("pod") };

        assert!(matches!(service_event(&filter, Action::Added, &svc("ns1")), Some(Event::Service(Action::Added, _))));
        assert!(service_event(&filter, Action::Added, &svc("ns2")).is_none());
        assert!(matches!(pod_event(&filter, Action::Deleted, &pod("ns1")), Some(Event::Pod(Action::Deleted, _))));
        assert!(pod_event(&filter, Action::Deleted, &pod("ns2")).is_none());

        let all = NamespaceFilter::all();
        assert!(service_event(&all, Action::Modified, &svc("ns2")).is_some());
        assert!(pod_event(&all, Action::Modified, &pod("ns2")).is_some());
    }

    #[test]
    fn critical_services_pass_regardless_of_namespace() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "mycrd.com/v1",
            "kind": "CriticalService",
            "metadata": { "name": "svc1" },
            "spec": { "namespace": "ns2", "matchLabels": [{ "key": "app", "value": "foo" }] }
        }))
        .expect("dynamic object");

        match critical_service_event(Action::Added, &obj) {
            Some(Event::CriticalService(Action::Added, spec)) => assert_eq!(spec.namespace, "ns2"),
            other => panic!("unexpected {:?}", other),
        }

        let broken: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "mycrd.com/v1", "kind": "CriticalService", "metadata": { "name": "x" }
        }))
        .expect("dynamic object");
        assert!(critical_service_event(Action::Added, &broken).is_none());
    }
}
