//! Event dispatch: the only code that mutates `ReconcileState`.

use std::sync::Arc;

use metrics::{counter, gauge};
use svcwatch_core::{render_selector, Action, CriticalServiceSpec, Event, Labels, PodObject, ServiceObject, WatcherConfig};
use tracing::{debug, error, info, warn};

use crate::{Cluster, FallbackPods, ReconcileState};

/// Processes one event at a time to completion. API calls are awaited inline,
/// so a slow call delays every queued event behind it.
pub struct Reconciler {
    cluster: Arc<dyn Cluster>,
    config: Arc<WatcherConfig>,
    fallback: FallbackPods,
    state: ReconcileState,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn Cluster>, config: WatcherConfig) -> Self {
        let config = Arc::new(config);
        let fallback = FallbackPods::new(Arc::clone(&cluster), Arc::clone(&config));
        Self { cluster, config, fallback, state: ReconcileState::new() }
    }

    pub fn state(&self) -> &ReconcileState { &self.state }

    pub fn into_state(self) -> ReconcileState { self.state }

    pub async fn handle(&mut self, event: Event) {
        counter!("svcwatch_events_total", 1u64, "kind" => event.kind());
        match event {
            Event::CriticalService(action, spec) => self.on_critical_service(action, spec).await,
            Event::Service(action, svc) => self.on_service(action, svc).await,
            Event::Pod(action, pod) => self.on_pod(action, pod).await,
        }
        gauge!("svcwatch_lame_services", self.state.lame_len() as f64);
    }

    async fn on_critical_service(&mut self, action: Action, spec: CriticalServiceSpec) {
        match action {
            Action::Added | Action::Modified => {
                info!(critical = %spec.name, ns = %spec.namespace, %action, "checking CriticalService impact");
                self.state.register(spec.clone());
                let Some(services) = self.list_services(&spec.namespace).await else { return };
                for svc in services.iter().filter(|s| spec.covers(s)) {
                    let Some(selector) = svc.pod_selector() else {
                        debug!(ns = %svc.namespace, service = %svc.name, "skip service without endpoints");
                        continue;
                    };
                    info!(ns = %svc.namespace, service = %svc.name, critical = %spec.name, "service matches CriticalService");
                    if self.count_pods(&svc.namespace, selector).await == Some(0) {
                        self.fallback.ensure_present(svc).await;
                    }
                }
            }
            Action::Deleted => {
                let Some(registered) = self.state.critical(&spec.name).cloned() else {
                    debug!(critical = %spec.name, "CriticalService was never registered");
                    return;
                };
                info!(critical = %registered.name, ns = %registered.namespace, "removing CriticalService impact");
                if let Some(services) = self.list_services(&registered.namespace).await {
                    for svc in services.iter().filter(|s| registered.covers(s)) {
                        info!(ns = %svc.namespace, service = %svc.name, critical = %registered.name, "service matches CriticalService");
                        self.fallback.ensure_absent(svc).await;
                    }
                }
                self.state.unregister(&registered.name);
            }
        }
    }

    async fn on_service(&mut self, action: Action, svc: ServiceObject) {
        let critical = self.state.is_critical(&svc);
        let selector = match svc.pod_selector() {
            Some(sel) if action != Action::Deleted => sel,
            _ => {
                debug!(ns = %svc.namespace, service = %svc.name, %action, "skip service");
                if self.state.unmark_lame(&svc.qualified_name()) {
                    debug!(service = %svc.qualified_name(), "forgot lame service");
                }
                if critical {
                    self.fallback.ensure_absent(&svc).await;
                }
                return;
            }
        };

        let Some(count) = self.count_pods(&svc.namespace, selector).await else { return };
        if count == 0 {
            self.mark_lame(&svc, critical).await;
        } else {
            self.mark_healthy(&svc, count);
        }
    }

    async fn on_pod(&mut self, action: Action, pod: PodObject) {
        debug!(ns = %pod.namespace, pod = %pod.name, fallback = pod.fallback, %action, "pod changed; checking services");
        self.check_all_services(&pod, action).await;
    }

    /// Re-evaluate every Service in `namespace` after a Pod change there.
    ///
    /// A Pod may be selected by several Services, and the cached view of any one
    /// Service may be stale under cross-stream reordering, so nothing is cached.
    async fn check_all_services(&mut self, pod: &PodObject, action: Action) {
        let namespace = pod.namespace.as_str();
        if !self.config.namespaces.allows(namespace) { return; }
        let Some(services) = self.list_services(namespace).await else { return };
        for svc in &services {
            let Some(selector) = svc.pod_selector() else {
                debug!(ns = %svc.namespace, service = %svc.name, "skip service");
                continue;
            };
            let Some(count) = self.count_pods(namespace, selector).await else { continue };
            let critical = self.state.is_critical(svc);

            if count == 0 && matches!(action, Action::Deleted | Action::Modified) {
                self.mark_lame(svc, critical).await;
            }
            if count > 0 && action == Action::Added {
                if self.mark_healthy(svc, count) && pod.is_fallback_for(svc, &self.config) {
                    info!(ns = %svc.namespace, service = %svc.name, pod = %pod.name, "Service {} from Namespace {} is served by fallback Pod {}", svc.name, svc.namespace, pod.name);
                }
                // The fallback Pod matches the selector itself: only drop it once a
                // second Pod backs the Service.
                if count > 1 && critical {
                    self.fallback.ensure_absent(svc).await;
                }
            }
        }
    }

    async fn mark_lame(&mut self, svc: &ServiceObject, critical: bool) {
        if !self.state.mark_lame(svc.qualified_name()) { return; }
        warn!(ns = %svc.namespace, service = %svc.name, "Service {} from Namespace {} has no selected Pod", svc.name, svc.namespace);
        counter!("svcwatch_lame_transitions_total", 1u64, "direction" => "lame");
        info!(lame = ?self.state.lame_services(), "lame services");
        if critical {
            self.fallback.ensure_present(svc).await;
        }
    }

    fn mark_healthy(&mut self, svc: &ServiceObject, count: usize) -> bool {
        if !self.state.unmark_lame(&svc.qualified_name()) { return false; }
        warn!(ns = %svc.namespace, service = %svc.name, pods = count, "Service {} from Namespace {} now has {} selected Pod(s)", svc.name, svc.namespace, count);
        counter!("svcwatch_lame_transitions_total", 1u64, "direction" => "healthy");
        info!(lame = ?self.state.lame_services(), "lame services");
        true
    }

    async fn list_services(&self, namespace: &str) -> Option<Vec<ServiceObject>> {
        match self.cluster.list_services(namespace).await {
            Ok(s) => Some(s),
            Err(e) => {
                error!(ns = %namespace, error = %e, "list services failed");
                None
            }
        }
    }

    async fn count_pods(&self, namespace: &str, selector: &Labels) -> Option<usize> {
        match self.cluster.list_pods(namespace, selector).await {
            Ok(pods) => Some(pods.len()),
            Err(e) => {
                error!(ns = %namespace, selector = %render_selector(selector), error = %e, "list pods failed");
                None
            }
        }
    }
}
