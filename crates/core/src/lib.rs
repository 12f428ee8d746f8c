//! service-watcher core types: events, normalized objects, selector matching.
//!
//! Nothing in here talks to a cluster. The kube integration lives in
//! `svcwatch-kubehub`, the consumer loop in `svcwatch-reconcile`.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod config;
pub mod error;
pub mod selector;

pub use config::{NamespaceFilter, WatcherConfig};
pub use error::ClusterError;
pub use selector::{matches, pairs, render_selector};

/// Kubernetes labels (and Service selectors) keyed by label name.
pub type Labels = BTreeMap<String, String>;

/// Annotation marking a Pod as created and owned by the watcher.
pub const FALLBACK_ANNOTATION: &str = "service-watcher";
pub const FALLBACK_ANNOTATION_VALUE: &str = "owned";

/// Service type that never selects Pods.
pub const EXTERNAL_NAME: &str = "ExternalName";

/// Change notification verb as delivered by a watch stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Action {
    Added,
    Modified,
    Deleted,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Added => "ADDED",
            Action::Modified => "MODIFIED",
            Action::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// A Service at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServiceObject {
    pub name: String,
    pub namespace: String,
    /// `spec.type`; absent means ClusterIP.
    pub type_: Option<String>,
    /// `spec.selector`; `None` for selector-less Services (e.g. the API server).
    pub selector: Option<Labels>,
    /// Metadata labels, compared against CriticalService `matchLabels`.
    pub labels: Option<Labels>,
    /// `metadata.deletionTimestamp` is set.
    pub deleting: bool,
}

impl ServiceObject {
    pub fn qualified_name(&self) -> String { qualified_name(&self.namespace, &self.name) }

    pub fn is_external_name(&self) -> bool { self.type_.as_deref() == Some(EXTERNAL_NAME) }

    /// Selector of a Service that can have endpoints at all.
    ///
    /// ExternalName, selector-less and terminating Services yield `None` and are
    /// never considered lame.
    pub fn pod_selector(&self) -> Option<&Labels> {
        if self.is_external_name() || self.deleting { return None; }
        self.selector.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PodObject {
    pub name: String,
    pub namespace: String,
    pub labels: Option<Labels>,
    /// Carries the fallback ownership annotation.
    pub fallback: bool,
}

impl PodObject {
    /// The annotated fallback Pod owned for `svc`.
    pub fn is_fallback_for(&self, svc: &ServiceObject, config: &WatcherConfig) -> bool {
        self.fallback && self.namespace == svc.namespace && self.name == config.fallback_pod_name(&svc.name)
    }
}

/// One `matchLabels` entry of a CriticalService.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchLabel {
    pub key: String,
    pub value: String,
}

impl MatchLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Declaration that a Service must always keep at least one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriticalServiceSpec {
    pub name: String,
    /// Namespace of the Services this declaration applies to.
    pub namespace: String,
    pub match_labels: SmallVec<[MatchLabel; 4]>,
}

impl CriticalServiceSpec {
    pub fn label_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.match_labels.iter().map(|m| (m.key.as_str(), m.value.as_str()))
    }

    /// Same namespace and the Service's own labels satisfy `matchLabels`.
    pub fn covers(&self, svc: &ServiceObject) -> bool {
        svc.namespace == self.namespace && matches(svc.labels.as_ref(), self.label_pairs())
    }
}

/// Normalized watch event. Built once by a watch adapter, consumed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Service(Action, ServiceObject),
    Pod(Action, PodObject),
    CriticalService(Action, CriticalServiceSpec),
}

impl Event {
    pub fn action(&self) -> Action {
        match self {
            Event::Service(a, _) | Event::Pod(a, _) | Event::CriticalService(a, _) => *a,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Service(..) => "Service",
            Event::Pod(..) => "Pod",
            Event::CriticalService(..) => "CriticalService",
        }
    }
}

/// `namespace/name` key used by the lame-service set.
pub fn qualified_name(namespace: &str, name: &str) -> String { format!("{}/{}", namespace, name) }

pub mod prelude {
    pub use super::{
        Action, ClusterError, CriticalServiceSpec, Event, Labels, MatchLabel, NamespaceFilter, PodObject,
        ServiceObject, WatcherConfig,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn pod_selector_skips_external_name_and_terminating() {
        let mut svc = ServiceObject {
            name: "svc1".into(),
            namespace: "ns1".into(),
            selector: Some(labels(&[("app", "foo")])),
            ..Default::default()
        };
        assert!(svc.pod_selector().is_some());

        svc.type_ = Some(EXTERNAL_NAME.into());
        assert!(svc.pod_selector().is_none());

        svc.type_ = Some("ClusterIP".into());
        svc.deleting = true;
        assert!(svc.pod_selector().is_none());

        svc.deleting = false;
        svc.selector = None;
        assert!(svc.pod_selector().is_none());
    }

    #[test]
    fn critical_spec_requires_same_namespace() {
        let spec = CriticalServiceSpec {
            name: "svc1".into(),
            namespace: "ns1".into(),
            match_labels: smallvec::smallvec![MatchLabel::new("app", "foo")],
        };
        let mut svc = ServiceObject {
            name: "svc1".into(),
            namespace: "ns1".into(),
            labels: Some(labels(&[("app", "foo"), ("tier", "web")])),
            ..Default::default()
        };
        assert!(spec.covers(&svc));
        svc.namespace = "ns2".into();
        assert!(!spec.covers(&svc));
        svc.namespace = "ns1".into();
        svc.labels = None;
        assert!(!spec.covers(&svc));
    }

    #[test]
    fn match_labels_deserialize_from_crd_shape() {
        let v = serde_json::json!([{ "key": "app", "value": "foo" }, { "key": "tier", "value": "web" }]);
        let parsed: SmallVec<[MatchLabel; 4]> = serde_json::from_value(v).expect("parse");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1], MatchLabel::new("tier", "web"));
    }

    #[test]
    fn event_accessors() {
        let ev = Event::Pod(Action::Deleted, PodObject::default());
        assert_eq!(ev.kind(), "Pod");
        assert_eq!(ev.action(), Action::Deleted);
        assert_eq!(Action::Modified.to_string(), "MODIFIED");
        assert_eq!(qualified_name("ns1", "svc1"), "ns1/svc1");
    }

    #[test]
    fn fallback_pod_is_recognized_by_annotation_name_and_namespace() {
        let cfg = WatcherConfig::default();
        let svc = ServiceObject { name: "svc1".into(), namespace: "ns1".into(), ..Default::default() };
        let mut pod = PodObject { name: "service-watcher-svc1".into(), namespace: "ns1".into(), labels: None, fallback: true };
        assert!(pod.is_fallback_for(&svc, &cfg));

        pod.namespace = "ns2".into();
        assert!(!pod.is_fallback_for(&svc, &cfg));

        pod.namespace = "ns1".into();
        pod.fallback = false;
        assert!(!pod.is_fallback_for(&svc, &cfg));

        let real = PodObject { name: "web-1".into(), namespace: "ns1".into(), labels: None, fallback: true };
        assert!(!real.is_fallback_for(&svc, &cfg));
    }
}
