//! End-to-end passes of the deployment splitter against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleetsplit_controller::controller::Reconcile;
use fleetsplit_controller::error::ReconcileError;
use fleetsplit_controller::model::{
    ManifestWork, ObjectMeta, Placement, PlacementDecision, SourceObject, SCOPE_LABEL, SPLIT_KIND,
    SPLIT_LABEL,
};
use fleetsplit_controller::splitter::DeploymentSplitter;
use fleetsplit_controller::store::{ArtifactStore, MemoryStore, SelectionStore};
use fleetsplit_id::{DestinationName, ScopeName};
use fleetsplit_reconcile::Manifest;
use serde_json::json;
use tokio::sync::watch;

const KEY: &str = "default/web";
const NAME: &str = "deployment-default-web";

fn scope() -> ScopeName {
    ScopeName::parse("team-a").unwrap()
}

fn dests(names: &[&str]) -> Vec<DestinationName> {
    names.iter().map(|n| DestinationName::parse(n).unwrap()).collect()
}

struct Fixture {
    store: Arc<MemoryStore>,
    splitter: DeploymentSplitter,
    cancel: watch::Receiver<bool>,
    _cancel_tx: watch::Sender<bool>,
}

impl Fixture {
    /// A source with `replicas`, its placement already requested, and a
    /// decision selecting `destinations`.
    async fn new(replicas: i64, destinations: &[&str]) -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .put_source(&scope(), SourceObject::deployment("default", "web", replicas))
            .await;
        store.put_placement(Placement::new(&scope(), NAME)).await;
        let fixture = Self::bare(store);
        fixture.select(destinations).await;
        fixture
    }

    fn bare(store: Arc<MemoryStore>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            splitter: DeploymentSplitter::new(scope(), store.clone()),
            store,
            cancel: rx,
            _cancel_tx: tx,
        }
    }

    async fn select(&self, destinations: &[&str]) {
        self.store
            .put_decision(PlacementDecision::new(&scope(), "web-1", NAME, &dests(destinations)))
            .await;
    }

    async fn reconcile(&self) -> Result<(), ReconcileError> {
        self.splitter.reconcile(KEY, &self.cancel).await
    }

    /// Destination -> replicas carried by its artifact.
    async fn replicas(&self) -> BTreeMap<String, i64> {
        self.store
            .artifacts_named(NAME)
            .await
            .iter()
            .map(|w| (w.destination().to_string(), w.manifests[0].replicas().unwrap()))
            .collect()
    }
}

fn expected(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|(d, r)| (d.to_string(), *r)).collect()
}

#[tokio::test]
async fn first_pass_only_requests_a_placement() {
    let store = Arc::new(MemoryStore::new());
    store
        .put_source(&scope(), SourceObject::deployment("default", "web", 3))
        .await;
    let fixture = Fixture::bare(store.clone());

    fixture.reconcile().await.unwrap();
    assert!(store.get_placement(&scope(), NAME).await.unwrap().is_some());
    assert_eq!(store.artifact_writes(), 0);

    fixture.select(&["c1"]).await;
    fixture.reconcile().await.unwrap();
    assert_eq!(fixture.replicas().await, expected(&[("c1", 3)]));
}

#[tokio::test]
async fn ten_replicas_over_three_destinations() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();
    assert_eq!(
        fixture.replicas().await,
        expected(&[("c1", 4), ("c2", 3), ("c3", 3)])
    );
}

#[tokio::test]
async fn fewer_replicas_than_destinations_drops_the_tail() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();

    fixture
        .store
        .put_source(&scope(), SourceObject::deployment("default", "web", 2))
        .await;
    fixture.reconcile().await.unwrap();

    assert_eq!(fixture.replicas().await, expected(&[("c1", 1), ("c2", 1)]));
}

#[tokio::test]
async fn second_pass_writes_nothing() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();
    let writes = fixture.store.artifact_writes();
    assert_eq!(writes, 3);

    fixture.reconcile().await.unwrap();
    assert_eq!(fixture.store.artifact_writes(), writes);
}

#[tokio::test]
async fn shrinking_the_selection_deletes_and_resplits() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();

    fixture.select(&["c1", "c2"]).await;
    fixture.reconcile().await.unwrap();

    assert_eq!(fixture.replicas().await, expected(&[("c1", 5), ("c2", 5)]));
}

#[tokio::test]
async fn growing_the_selection_creates_exactly_one_artifact() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();
    let before = fixture.store.artifact_writes();

    fixture.select(&["c1", "c2", "c3", "c4"]).await;
    fixture.reconcile().await.unwrap();

    assert_eq!(
        fixture.replicas().await,
        expected(&[("c1", 3), ("c2", 3), ("c3", 2), ("c4", 2)])
    );
    // c4 created; c1 and c3 updated; c2 keeps 3.
    assert_eq!(fixture.store.artifact_writes(), before + 3);
}

#[tokio::test]
async fn reshuffled_selection_still_sums_to_total() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();

    fixture.select(&["c3", "c1", "c2"]).await;
    fixture.reconcile().await.unwrap();

    let replicas = fixture.replicas().await;
    assert_eq!(replicas, expected(&[("c1", 3), ("c2", 3), ("c3", 4)]));
    assert_eq!(replicas.values().sum::<i64>(), 10);
}

#[tokio::test]
async fn failing_destination_does_not_block_the_others() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3", "c4"]).await;
    fixture.reconcile().await.unwrap();

    fixture.store.fail_writes_to("c1").await;
    fixture.select(&["c1", "c2", "c3"]).await;
    let err = fixture.reconcile().await.unwrap_err();

    assert!(err.is_retryable());
    match &err {
        ReconcileError::Destinations(aggregate) => {
            assert_eq!(aggregate.destinations(), vec!["c1"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // c2 and c3 moved to the new split; c1 kept its old share; c4 is left
    // for the pass that succeeds.
    assert_eq!(
        fixture.replicas().await,
        expected(&[("c1", 3), ("c2", 3), ("c3", 3), ("c4", 2)])
    );

    fixture.store.heal("c1").await;
    fixture.reconcile().await.unwrap();
    assert_eq!(
        fixture.replicas().await,
        expected(&[("c1", 4), ("c2", 3), ("c3", 3)])
    );
}

#[tokio::test]
async fn empty_selection_tears_everything_down() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();

    fixture.select(&[]).await;
    fixture.reconcile().await.unwrap();
    assert!(fixture.replicas().await.is_empty());
}

#[tokio::test]
async fn zero_replicas_tears_everything_down() {
    let fixture = Fixture::new(10, &["c1", "c2"]).await;
    fixture.reconcile().await.unwrap();

    fixture
        .store
        .put_source(&scope(), SourceObject::deployment("default", "web", 0))
        .await;
    fixture.reconcile().await.unwrap();
    assert!(fixture.replicas().await.is_empty());
}

#[tokio::test]
async fn deleted_source_tears_everything_down() {
    let fixture = Fixture::new(4, &["c1", "c2"]).await;
    fixture.reconcile().await.unwrap();

    fixture
        .store
        .delete_source(&scope(), SPLIT_KIND, "default", "web")
        .await;
    fixture.reconcile().await.unwrap();
    assert!(fixture.replicas().await.is_empty());
}

#[tokio::test]
async fn third_party_drift_is_reverted() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    fixture.reconcile().await.unwrap();

    let mut tampered = fixture.store.artifacts_named(NAME).await.remove(0);
    tampered.manifests = vec![Manifest::render(&json!({"kind": "Deployment"})).unwrap()];
    fixture.store.tamper_artifact(tampered).await;

    fixture.reconcile().await.unwrap();
    assert_eq!(
        fixture.replicas().await,
        expected(&[("c1", 4), ("c2", 3), ("c3", 3)])
    );
}

#[tokio::test]
async fn malformed_template_is_fatal_and_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let mut source = SourceObject::deployment("default", "web", 3);
    source.spec = json!("not an object");
    store.put_source(&scope(), source).await;
    store.put_placement(Placement::new(&scope(), NAME)).await;
    let fixture = Fixture::bare(store);
    fixture.select(&["c1", "c2"]).await;

    let err = fixture.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::Render { .. }));
    assert!(!err.is_retryable());
    assert_eq!(fixture.store.artifact_writes(), 0);
}

#[tokio::test]
async fn negative_replicas_are_fatal() {
    let fixture = Fixture::new(-1, &["c1"]).await;
    let err = fixture.reconcile().await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidSource { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_key_is_fatal() {
    let fixture = Fixture::new(1, &["c1"]).await;
    let err = fixture
        .splitter
        .reconcile("no-separator", &fixture.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidKey(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn cancellation_stops_before_the_next_destination() {
    let fixture = Fixture::new(10, &["c1", "c2", "c3"]).await;
    let (tx, cancel) = watch::channel(true);

    let err = fixture.splitter.reconcile(KEY, &cancel).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cancelled));
    assert_eq!(fixture.store.artifact_writes(), 0);
    drop(tx);
}

#[tokio::test]
async fn teardown_leaves_other_scopes_alone() {
    let fixture = Fixture::new(2, &["c1"]).await;
    fixture.reconcile().await.unwrap();

    // Same derived name, other scope, other destination.
    let foreign = ManifestWork::new(
        &DestinationName::parse("c9").unwrap(),
        ObjectMeta::new("", NAME)
            .with_label(SPLIT_LABEL, NAME)
            .with_label(SCOPE_LABEL, "team-b"),
        vec![Manifest::render(&json!({})).unwrap()],
    );
    fixture.store.create_artifact(&foreign).await.unwrap();

    fixture.select(&[]).await;
    fixture.reconcile().await.unwrap();

    let left: Vec<String> = fixture
        .store
        .artifacts_named(NAME)
        .await
        .iter()
        .map(|w| w.destination().to_string())
        .collect();
    assert_eq!(left, vec!["c9"]);
}

/// `shop-eu/cart` and `shop/eu-cart` both derive `deployment-shop-eu-cart`.
async fn colliding_sources() -> (Fixture, &'static str, &'static str) {
    let store = Arc::new(MemoryStore::new());
    store
        .put_source(&scope(), SourceObject::deployment("shop-eu", "cart", 1))
        .await;
    store
        .put_source(&scope(), SourceObject::deployment("shop", "eu-cart", 5))
        .await;
    (Fixture::bare(store), "shop-eu/cart", "shop/eu-cart")
}

const SHARED: &str = "deployment-shop-eu-cart";

async fn replicas_of(store: &MemoryStore, name: &str) -> BTreeMap<String, i64> {
    store
        .artifacts_named(name)
        .await
        .iter()
        .map(|w| (w.destination().to_string(), w.manifests[0].replicas().unwrap()))
        .collect()
}

#[tokio::test]
async fn colliding_source_cannot_take_over_a_placement() {
    let (fixture, first, second) = colliding_sources().await;

    // First claim creates the placement.
    fixture.splitter.reconcile(first, &fixture.cancel).await.unwrap();
    fixture
        .store
        .put_decision(PlacementDecision::new(&scope(), "cart-1", SHARED, &dests(&["c1"])))
        .await;
    fixture.splitter.reconcile(first, &fixture.cancel).await.unwrap();
    assert_eq!(replicas_of(&fixture.store, SHARED).await, expected(&[("c1", 1)]));

    let err = fixture
        .splitter
        .reconcile(second, &fixture.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict { .. }));
    assert!(!err.is_retryable());
    assert_eq!(replicas_of(&fixture.store, SHARED).await, expected(&[("c1", 1)]));
    assert_eq!(fixture.store.artifact_writes(), 1);
}

#[tokio::test]
async fn teardown_never_deletes_a_colliding_source() {
    let (fixture, first, second) = colliding_sources().await;
    // Requested upstream, so neither source is recorded on it.
    fixture.store.put_placement(Placement::new(&scope(), SHARED)).await;
    fixture
        .store
        .put_decision(PlacementDecision::new(&scope(), "cart-1", SHARED, &dests(&["c1"])))
        .await;

    fixture.splitter.reconcile(second, &fixture.cancel).await.unwrap();
    assert_eq!(replicas_of(&fixture.store, SHARED).await, expected(&[("c1", 5)]));

    let err = fixture
        .splitter
        .reconcile(first, &fixture.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict { .. }));
    assert_eq!(replicas_of(&fixture.store, SHARED).await, expected(&[("c1", 5)]));

    fixture
        .store
        .delete_source(&scope(), SPLIT_KIND, "shop-eu", "cart")
        .await;
    fixture.splitter.reconcile(first, &fixture.cancel).await.unwrap();

    let left = fixture.store.artifacts_named(SHARED).await;
    assert_eq!(left.len(), 1);
    assert_eq!(
        left[0].metadata.source_key().map(|k| k.to_string()).as_deref(),
        Some(second)
    );
    assert_eq!(left[0].manifests[0].replicas(), Some(5));
}
