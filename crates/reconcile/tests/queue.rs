#![forbid(unsafe_code)]

use std::sync::Arc;

use svcwatch_core::{Action, Event, Labels, PodObject, ServiceObject, WatcherConfig};
use svcwatch_reconcile::{scan_lame_services, spawn_reconciler, MockCluster};

fn sel(app: &str) -> Option<Labels> { Some([("app".to_string(), app.to_string())].into_iter().collect()) }

fn svc(name: &str, app: &str) -> ServiceObject {
    ServiceObject { name: name.into(), namespace: "ns1".into(), selector: sel(app), labels: sel(app), ..Default::default() }
}

fn pod(name: &str, app: &str) -> PodObject {
    PodObject { name: name.into(), namespace: "ns1".into(), labels: sel(app), fallback: false }
}

#[tokio::test]
async fn reconciler_drains_queue_after_producers_stop() {
    let cluster = Arc::new(MockCluster::new());
    cluster.put_service(svc("a", "a"));
    cluster.put_service(svc("b", "b"));
    cluster.put_pod(pod("b-1", "b"));

    let (tx, handle) = spawn_reconciler(cluster.clone(), WatcherConfig::default());

    let services = tokio::spawn({
        let tx = tx.clone();
        async move {
            for s in [svc("a", "a"), svc("b", "b")] {
                tx.send(Event::Service(Action::Added, s)).expect("queue open");
            }
        }
    });
    let pods = tokio::spawn({
        let tx = tx.clone();
        async move {
            tx.send(Event::Pod(Action::Added, pod("b-1", "b"))).expect("queue open");
        }
    });
    services.await.expect("service producer");
    pods.await.expect("pod producer");
    drop(tx);

    let state = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("reconciler stops once senders are dropped")
        .expect("reconciler task");
    assert_eq!(state.lame_services(), vec!["ns1/a".to_string()]);
}

#[tokio::test]
async fn scan_reports_lame_services_only() {
    let cluster = MockCluster::new();
    cluster.put_pod(pod("b-1", "b"));
    let mut ext = svc("ext", "x");
    ext.type_ = Some("ExternalName".into());
    let services = vec![svc("c", "c"), svc("b", "b"), svc("a", "a"), ext];

    let lame = scan_lame_services(&cluster, &services).await.expect("scan");

    assert_eq!(lame, vec!["ns1/a".to_string(), "ns1/c".to_string()]);
    assert!(cluster.created().is_empty());
}

#[tokio::test]
async fn scan_propagates_api_errors() {
    let cluster = MockCluster::new();
    cluster.set_fail_api(true);
    assert!(scan_lame_services(&cluster, &[svc("a", "a")]).await.is_err());
}
