//! Values the reconciler consumes; parsing them is the binary's job.

use serde::{Deserialize, Serialize};

pub const DEFAULT_POD_NAME_PREFIX: &str = "service-watcher";
pub const DEFAULT_POD_TEMPLATE: &str = "critical-service-pod-template";
pub const DEFAULT_POD_TEMPLATE_NS: &str = "default";

/// Namespace allow-list. Empty means every namespace is watched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceFilter(Vec<String>);

impl NamespaceFilter {
    pub fn all() -> Self { Self(Vec::new()) }

    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(namespaces.into_iter().map(Into::into).collect())
    }

    /// Parse a comma-separated list (`NAMESPACES=ns1,ns2`). Blank entries are ignored.
    pub fn parse(raw: &str) -> Self {
        Self(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
    }

    pub fn allows(&self, namespace: &str) -> bool { self.0.is_empty() || self.0.iter().any(|n| n == namespace) }

    pub fn is_all(&self) -> bool { self.0.is_empty() }

    pub fn namespaces(&self) -> &[String] { &self.0 }
}

/// Fallback-pod and scoping settings for the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatcherConfig {
    pub pod_name_prefix: String,
    pub pod_template: String,
    pub pod_template_namespace: String,
    pub namespaces: NamespaceFilter,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            pod_name_prefix: DEFAULT_POD_NAME_PREFIX.to_string(),
            pod_template: DEFAULT_POD_TEMPLATE.to_string(),
            pod_template_namespace: DEFAULT_POD_TEMPLATE_NS.to_string(),
            namespaces: NamespaceFilter::all(),
        }
    }
}

impl WatcherConfig {
    /// Deterministic name of the fallback Pod for a Service.
    pub fn fallback_pod_name(&self, service: &str) -> String { format!("{}-{}", self.pod_name_prefix, service) }
}
