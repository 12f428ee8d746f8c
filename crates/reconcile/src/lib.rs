//! service-watcher reconciliation: event queue consumer, state and fallback Pods.

#![forbid(unsafe_code)]

use std::sync::Arc;

use svcwatch_core::{render_selector, ClusterError, Event, ServiceObject, WatcherConfig};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

mod cluster;
mod fallback;
pub mod mock;
mod reconciler;
mod state;

pub use cluster::Cluster;
pub use fallback::{FallbackOutcome, FallbackPods};
pub use mock::MockCluster;
pub use reconciler::Reconciler;
pub use state::ReconcileState;

/// Producer side of the event queue; cloned once per watch adapter.
pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Unbounded MPSC queue: FIFO per producer, no ordering across producers.
pub fn event_queue() -> (EventSender, EventReceiver) { mpsc::unbounded_channel() }

/// Drain `rx` through `reconciler` until every sender is dropped.
pub async fn run_reconciler(mut reconciler: Reconciler, mut rx: EventReceiver) -> ReconcileState {
    info!("reconciler started");
    while let Some(ev) = rx.recv().await {
        debug!(kind = ev.kind(), action = %ev.action(), "dequeued event");
        reconciler.handle(ev).await;
    }
    let state = reconciler.into_state();
    info!(lame = state.lame_len(), critical = state.critical_len(), "event queue closed; reconciler stopped");
    state
}

/// Spawn the consumer loop. Returns the queue sender and a handle yielding the
/// final state once all senders are gone and the queue is drained.
pub fn spawn_reconciler(cluster: Arc<dyn Cluster>, config: WatcherConfig) -> (EventSender, JoinHandle<ReconcileState>) {
    let (tx, rx) = event_queue();
    let reconciler = Reconciler::new(cluster, config);
    let handle = tokio::spawn(run_reconciler(reconciler, rx));
    (tx, handle)
}

/// One-shot audit: qualified names of `services` that currently select no Pod.
///
/// Read-only; ExternalName, selector-less and terminating Services are ignored.
pub async fn scan_lame_services(cluster: &dyn Cluster, services: &[ServiceObject]) -> Result<Vec<String>, ClusterError> {
    let mut lame = Vec::new();
    for svc in services {
        let Some(selector) = svc.pod_selector() else { continue };
        let pods = cluster.list_pods(&svc.namespace, selector).await?;
        debug!(service = %svc.qualified_name(), selector = %render_selector(selector), pods = pods.len(), "scanned");
        if pods.is_empty() {
            lame.push(svc.qualified_name());
        }
    }
    lame.sort();
    Ok(lame)
}
