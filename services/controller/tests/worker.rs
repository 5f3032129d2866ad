//! Worker loop against the in-memory store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use leftover_api::{find_condition, CapacityType, LeftoverNodePool, CONDITION_READY};
use leftover_capacity::SnapshotClientFactory;
use leftover_controller::{
    InMemoryStore, Reconciler, ReconcilerSettings, ResourceStore, Worker, WorkerConfig,
};
use leftover_testing::{node_classes, standard_snapshot, RequestBuilder};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<InMemoryStore>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

async fn seeded(requests: Vec<LeftoverNodePool>) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for class in node_classes() {
        store.insert_node_class(class).await;
    }
    for request in requests {
        store.upsert_request(request).await;
    }
    store
}

fn start(store: Arc<InMemoryStore>) -> Harness {
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(SnapshotClientFactory::new(standard_snapshot(2, 6))),
        ReconcilerSettings::default(),
    );
    let config = WorkerConfig {
        resync_interval: Duration::from_millis(20),
        max_concurrent_passes: 2,
        failure_backoff: Duration::from_millis(50),
    };
    let worker = Worker::new(store.clone(), Arc::new(reconciler), config);

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });
    Harness {
        store,
        shutdown,
        handle,
    }
}

/// Poll `check` until it returns true or the wait budget runs out.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

async fn observed_generation(store: &InMemoryStore, name: &str) -> Option<i64> {
    let request = store.get_request(name).await.ok()??;
    find_condition(&request.status.conditions, CONDITION_READY).map(|c| c.observed_generation)
}

#[tokio::test]
async fn test_worker_reconciles_every_request() {
    let names = ["train", "infer", "batch"];
    let harness = start(seeded(names.iter().map(|n| RequestBuilder::new(*n).build()).collect()).await);

    let store = harness.store.clone();
    let done = eventually(|| {
        let store = store.clone();
        async move {
            for name in names {
                if store.node_pool(&format!("leftover-{name}")).await.is_none() {
                    return false;
                }
            }
            true
        }
    })
    .await;
    assert!(done, "every request should get a NodePool");

    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, harness.handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_spec_change_triggers_new_pass() {
    let harness = start(seeded(vec![RequestBuilder::new("train").build()]).await);
    let store = harness.store.clone();

    let first = eventually(|| {
        let store = store.clone();
        async move { observed_generation(&store, "train").await == Some(1) }
    })
    .await;
    assert!(first);

    // The steady interval is minutes away; only the generation bump can
    // bring the request back before the wait runs out.
    store
        .upsert_request(RequestBuilder::new("train").min_spot_score(8).build())
        .await;

    let second = eventually(|| {
        let store = store.clone();
        async move { observed_generation(&store, "train").await == Some(2) }
    })
    .await;
    assert!(second, "generation 2 should be reconciled");

    let request = store.get_request("train").await.unwrap().unwrap();
    assert_eq!(request.status.capacity_type, Some(CapacityType::OnDemand));

    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, harness.handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_steady_request_is_not_repassed() {
    let harness = start(seeded(vec![RequestBuilder::new("train").build()]).await);
    let store = harness.store.clone();

    let reconciled = eventually(|| {
        let store = store.clone();
        async move { store.apply_calls() == 1 }
    })
    .await;
    assert!(reconciled);

    // Several resync ticks later the request is still not due.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.apply_calls(), 1);

    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, harness.handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_huge_requeue_interval_is_passed_once() {
    let request = RequestBuilder::new("train").requeue_minutes(i64::MAX).build();
    let harness = start(seeded(vec![request]).await);
    let store = harness.store.clone();

    let reconciled = eventually(|| {
        let store = store.clone();
        async move { observed_generation(&store, "train").await == Some(1) }
    })
    .await;
    assert!(reconciled);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.apply_calls(), 1);
    assert!(!harness.handle.is_finished());

    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, harness.handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_request_is_retried_after_backoff() {
    let store = seeded(vec![RequestBuilder::new("train").build()]).await;
    store.fail_applies(true);
    let harness = start(store.clone());

    let retried = eventually(|| {
        let store = store.clone();
        async move { store.apply_calls() >= 2 }
    })
    .await;
    assert!(retried, "a failed pass should be retried after the backoff");

    store.fail_applies(false);
    let recovered = eventually(|| {
        let store = store.clone();
        async move { store.node_pool("leftover-train").await.is_some() }
    })
    .await;
    assert!(recovered);

    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, harness.handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_with_no_requests() {
    let harness = start(seeded(Vec::new()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.shutdown.send(true).unwrap();
    tokio::time::timeout(WAIT, harness.handle).await.unwrap().unwrap();
}
