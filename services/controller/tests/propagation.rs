//! Verbatim propagation of namespaces to every selected destination.

use std::sync::Arc;

use fleetsplit_controller::controller::Reconcile;
use fleetsplit_controller::error::ReconcileError;
use fleetsplit_controller::model::{PlacementDecision, SourceObject, DEFAULT_PLACEMENT};
use fleetsplit_controller::propagator::{PropagationSpec, Propagator};
use fleetsplit_controller::store::MemoryStore;
use fleetsplit_id::{DestinationName, ScopeName};
use serde_json::json;
use tokio::sync::watch;

const ARTIFACT: &str = "namespace-syncer";

fn scope() -> ScopeName {
    ScopeName::parse("team-a").unwrap()
}

fn dests(names: &[&str]) -> Vec<DestinationName> {
    names.iter().map(|n| DestinationName::parse(n).unwrap()).collect()
}

async fn select(store: &MemoryStore, destinations: &[&str]) {
    store
        .put_decision(PlacementDecision::new(
            &scope(),
            "default-1",
            DEFAULT_PLACEMENT,
            &dests(destinations),
        ))
        .await;
}

async fn destinations(store: &MemoryStore) -> Vec<String> {
    store
        .artifacts_named(ARTIFACT)
        .await
        .iter()
        .map(|w| w.destination().to_string())
        .collect()
}

fn propagator(store: &Arc<MemoryStore>) -> Propagator {
    Propagator::new(scope(), PropagationSpec::namespaces(), store.clone())
}

#[tokio::test]
async fn namespaces_are_shipped_verbatim_in_name_order() {
    let store = Arc::new(MemoryStore::new());
    store.put_source(&scope(), SourceObject::namespace("payments")).await;
    store.put_source(&scope(), SourceObject::namespace("billing")).await;
    select(&store, &["c1", "c2"]).await;

    let (_tx, cancel) = watch::channel(false);
    propagator(&store).reconcile("team-a", &cancel).await.unwrap();

    let works = store.artifacts_named(ARTIFACT).await;
    assert_eq!(works.len(), 2);
    for work in &works {
        let names: Vec<_> = work
            .manifests
            .iter()
            .map(|m| m.to_value().unwrap()["metadata"]["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("billing"), json!("payments")]);
        assert!(work.manifests.iter().all(|m| m.replicas().is_none()));
    }
    assert_eq!(works[0].manifests, works[1].manifests);
}

#[tokio::test]
async fn propagation_is_idempotent_and_cleans_orphans() {
    let store = Arc::new(MemoryStore::new());
    store.put_source(&scope(), SourceObject::namespace("payments")).await;
    select(&store, &["c1", "c2", "c3"]).await;
    let propagator = propagator(&store);
    let (_tx, cancel) = watch::channel(false);

    propagator.reconcile("team-a", &cancel).await.unwrap();
    propagator.reconcile("team-a", &cancel).await.unwrap();
    assert_eq!(store.artifact_writes(), 3);

    select(&store, &["c2"]).await;
    propagator.reconcile("team-a", &cancel).await.unwrap();
    assert_eq!(destinations(&store).await, vec!["c2"]);

    // A new namespace updates the remaining copy.
    store.put_source(&scope(), SourceObject::namespace("billing")).await;
    propagator.reconcile("team-a", &cancel).await.unwrap();
    assert_eq!(store.artifacts_named(ARTIFACT).await[0].manifests.len(), 2);
}

#[tokio::test]
async fn no_namespaces_means_no_copies() {
    let store = Arc::new(MemoryStore::new());
    store.put_source(&scope(), SourceObject::namespace("payments")).await;
    select(&store, &["c1"]).await;
    let propagator = propagator(&store);
    let (_tx, cancel) = watch::channel(false);

    propagator.reconcile("team-a", &cancel).await.unwrap();
    assert_eq!(destinations(&store).await, vec!["c1"]);

    store.delete_source(&scope(), "Namespace", "", "payments").await;
    propagator.reconcile("team-a", &cancel).await.unwrap();
    assert!(destinations(&store).await.is_empty());
}

#[tokio::test]
async fn failed_destination_is_reported_alone() {
    let store = Arc::new(MemoryStore::new());
    store.put_source(&scope(), SourceObject::namespace("payments")).await;
    select(&store, &["c1", "c2"]).await;
    store.fail_writes_to("c2").await;
    let (_tx, cancel) = watch::channel(false);

    let err = propagator(&store)
        .reconcile("team-a", &cancel)
        .await
        .unwrap_err();
    match err {
        ReconcileError::Destinations(aggregate) => assert_eq!(aggregate.destinations(), vec!["c2"]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(destinations(&store).await, vec!["c1"]);
}

#[tokio::test]
async fn foreign_scope_key_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let (_tx, cancel) = watch::channel(false);

    let err = propagator(&store)
        .reconcile("team-b", &cancel)
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
}
