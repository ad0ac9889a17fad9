//! In-memory store for development and testing.
//!
//! Every write is broadcast as a [`ChangeEvent`], standing in for the watch
//! stream of a real API server. Artifact writes can be made to fail per
//! destination.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use fleetsplit_id::{ScopeName, SourceKey};
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::{ArtifactStore, BindingStore, SelectionStore, SourceStore, WatchStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    ChangeEvent, EventKind, LabelSelector, ManifestWork, Placement, PlacementDecision,
    SourceObject,
};

/// Capacity of the change broadcast; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 1024;

/// Initial contents, loaded from JSON.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub scopes: Vec<ScopeName>,
    pub sources: Vec<SeedSource>,
    pub placements: Vec<Placement>,
    pub decisions: Vec<PlacementDecision>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSource {
    pub scope: ScopeName,
    pub object: SourceObject,
}

type SourceKeyTuple = (ScopeName, String, String, String);

#[derive(Default)]
struct MemoryState {
    /// (scope, kind, namespace, name) -> object
    sources: BTreeMap<SourceKeyTuple, SourceObject>,
    /// (scope, name) -> placement
    placements: BTreeMap<(String, String), Placement>,
    /// (scope, name) -> decision
    decisions: BTreeMap<(String, String), PlacementDecision>,
    /// (destination, name) -> artifact
    artifacts: BTreeMap<(String, String), ManifestWork>,
    bindings: BTreeSet<ScopeName>,
}

/// Thread-safe in-memory implementation of every collaborator trait.
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    failing: RwLock<HashSet<String>>,
    events: broadcast::Sender<ChangeEvent>,
    version: AtomicU64,
    artifact_writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(MemoryState::default()),
            failing: RwLock::new(HashSet::new()),
            events,
            version: AtomicU64::new(0),
            artifact_writes: AtomicU64::new(0),
        }
    }

    /// Build a store from seed contents.
    pub async fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for scope in seed.scopes {
            store.bind_scope(&scope).await;
        }
        for source in seed.sources {
            store.put_source(&source.scope, source.object).await;
        }
        for placement in seed.placements {
            store.put_placement(placement).await;
        }
        for decision in seed.decisions {
            store.put_decision(decision).await;
        }
        store
    }

    /// Subscribe to the change stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Number of artifact creates, updates and deletes so far.
    pub fn artifact_writes(&self) -> u64 {
        self.artifact_writes.load(Ordering::SeqCst)
    }

    /// Make every artifact write to `destination` fail.
    pub async fn fail_writes_to(&self, destination: &str) {
        self.failing.write().await.insert(destination.to_string());
    }

    /// Undo [`fail_writes_to`](Self::fail_writes_to).
    pub async fn heal(&self, destination: &str) {
        self.failing.write().await.remove(destination);
    }

    /// All artifacts with the given name, ordered by destination.
    pub async fn artifacts_named(&self, name: &str) -> Vec<ManifestWork> {
        self.state
            .read()
            .await
            .artifacts
            .values()
            .filter(|w| w.metadata.name == name)
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Upstream writers
    // -------------------------------------------------------------------------

    pub async fn put_source(&self, scope: &ScopeName, mut object: SourceObject) {
        object.metadata.resource_version = self.next_version();
        let key = (
            scope.clone(),
            object.kind.clone(),
            object.metadata.namespace.clone(),
            object.metadata.name.clone(),
        );
        self.state.write().await.sources.insert(key, object.clone());
        self.emit(ChangeEvent::Source {
            scope: scope.clone(),
            kind: EventKind::Applied,
            object,
        });
    }

    pub async fn delete_source(&self, scope: &ScopeName, kind: &str, namespace: &str, name: &str) {
        let key = (
            scope.clone(),
            kind.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        let removed = self.state.write().await.sources.remove(&key);
        if let Some(object) = removed {
            self.emit(ChangeEvent::Source {
                scope: scope.clone(),
                kind: EventKind::Deleted,
                object,
            });
        }
    }

    pub async fn put_placement(&self, mut placement: Placement) {
        placement.metadata.resource_version = self.next_version();
        let key = (
            placement.metadata.namespace.clone(),
            placement.metadata.name.clone(),
        );
        self.state.write().await.placements.insert(key, placement.clone());
        self.emit(ChangeEvent::Placement {
            kind: EventKind::Applied,
            object: placement,
        });
    }

    pub async fn put_decision(&self, mut decision: PlacementDecision) {
        decision.metadata.resource_version = self.next_version();
        let key = (
            decision.metadata.namespace.clone(),
            decision.metadata.name.clone(),
        );
        self.state.write().await.decisions.insert(key, decision.clone());
        self.emit(ChangeEvent::Decision {
            kind: EventKind::Applied,
            object: decision,
        });
    }

    pub async fn delete_decision(&self, scope: &ScopeName, name: &str) {
        let removed = self
            .state
            .write()
            .await
            .decisions
            .remove(&(scope.to_string(), name.to_string()));
        if let Some(object) = removed {
            self.emit(ChangeEvent::Decision {
                kind: EventKind::Deleted,
                object,
            });
        }
    }

    pub async fn bind_scope(&self, scope: &ScopeName) {
        self.state.write().await.bindings.insert(scope.clone());
        self.emit(ChangeEvent::Binding {
            scope: scope.clone(),
            bound: true,
        });
    }

    pub async fn unbind_scope(&self, scope: &ScopeName) {
        self.state.write().await.bindings.remove(scope);
        self.emit(ChangeEvent::Binding {
            scope: scope.clone(),
            bound: false,
        });
    }

    /// Overwrite an artifact as a third party would, bypassing the controller.
    pub async fn tamper_artifact(&self, mut work: ManifestWork) {
        work.metadata.resource_version = self.next_version();
        let key = (work.metadata.namespace.clone(), work.metadata.name.clone());
        self.state.write().await.artifacts.insert(key, work.clone());
        self.emit(ChangeEvent::Artifact {
            kind: EventKind::Applied,
            object: work,
        });
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: ChangeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn check_writable(&self, destination: &str) -> StoreResult<()> {
        if self.failing.read().await.contains(destination) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for destination {destination}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get_source(
        &self,
        scope: &ScopeName,
        kind: &str,
        key: &SourceKey,
    ) -> StoreResult<Option<SourceObject>> {
        let lookup = (
            scope.clone(),
            kind.to_string(),
            key.namespace().to_string(),
            key.name().to_string(),
        );
        Ok(self.state.read().await.sources.get(&lookup).cloned())
    }

    async fn list_sources(&self, scope: &ScopeName, kind: &str) -> StoreResult<Vec<SourceObject>> {
        Ok(self
            .state
            .read()
            .await
            .sources
            .iter()
            .filter(|((s, k, _, _), _)| s == scope && k == kind)
            .map(|(_, object)| object.clone())
            .collect())
    }
}

#[async_trait]
impl SelectionStore for MemoryStore {
    async fn get_placement(&self, scope: &ScopeName, name: &str) -> StoreResult<Option<Placement>> {
        Ok(self
            .state
            .read()
            .await
            .placements
            .get(&(scope.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_placement(&self, placement: &Placement) -> StoreResult<Placement> {
        let key = (
            placement.metadata.namespace.clone(),
            placement.metadata.name.clone(),
        );
        let mut created = placement.clone();
        created.metadata.resource_version = self.next_version();
        created.metadata.uid = Some(Uuid::new_v4());
        created.metadata.creation_timestamp = Some(Utc::now());

        {
            let mut state = self.state.write().await;
            if state.placements.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: "placement",
                    name: format!("{}/{}", key.0, key.1),
                });
            }
            state.placements.insert(key, created.clone());
        }

        self.emit(ChangeEvent::Placement {
            kind: EventKind::Applied,
            object: created.clone(),
        });
        Ok(created)
    }

    async fn delete_placement(&self, scope: &ScopeName, name: &str) -> StoreResult<()> {
        let removed = self
            .state
            .write()
            .await
            .placements
            .remove(&(scope.to_string(), name.to_string()));
        match removed {
            Some(object) => {
                self.emit(ChangeEvent::Placement {
                    kind: EventKind::Deleted,
                    object,
                });
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "placement",
                name: format!("{scope}/{name}"),
            }),
        }
    }

    async fn list_decisions(
        &self,
        scope: &ScopeName,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<PlacementDecision>> {
        Ok(self
            .state
            .read()
            .await
            .decisions
            .iter()
            .filter(|((s, _), d)| s == scope.as_str() && selector.matches(&d.metadata.labels))
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get_artifact(
        &self,
        destination: &str,
        name: &str,
    ) -> StoreResult<Option<ManifestWork>> {
        Ok(self
            .state
            .read()
            .await
            .artifacts
            .get(&(destination.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_artifact(&self, work: &ManifestWork) -> StoreResult<ManifestWork> {
        self.check_writable(work.destination()).await?;

        let key = (work.metadata.namespace.clone(), work.metadata.name.clone());
        let mut created = work.clone();
        created.metadata.resource_version = self.next_version();
        created.metadata.uid = Some(Uuid::new_v4());
        created.metadata.creation_timestamp = Some(Utc::now());

        {
            let mut state = self.state.write().await;
            if state.artifacts.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: "manifestwork",
                    name: format!("{}/{}", key.0, key.1),
                });
            }
            state.artifacts.insert(key, created.clone());
        }

        self.artifact_writes.fetch_add(1, Ordering::SeqCst);
        debug!(destination = %created.destination(), name = %created.metadata.name, "[MEMORY] Created artifact");
        self.emit(ChangeEvent::Artifact {
            kind: EventKind::Applied,
            object: created.clone(),
        });
        Ok(created)
    }

    async fn update_artifact(&self, work: &ManifestWork) -> StoreResult<ManifestWork> {
        self.check_writable(work.destination()).await?;

        let key = (work.metadata.namespace.clone(), work.metadata.name.clone());
        let updated = {
            let mut state = self.state.write().await;
            let Some(current) = state.artifacts.get_mut(&key) else {
                return Err(StoreError::NotFound {
                    kind: "manifestwork",
                    name: format!("{}/{}", key.0, key.1),
                });
            };
            if current.metadata.resource_version != work.metadata.resource_version {
                return Err(StoreError::Conflict {
                    kind: "manifestwork",
                    name: format!("{}/{}", key.0, key.1),
                    expected: work.metadata.resource_version,
                    actual: current.metadata.resource_version,
                });
            }
            *current = work.clone();
            current.metadata.resource_version = self.next_version();
            current.clone()
        };

        self.artifact_writes.fetch_add(1, Ordering::SeqCst);
        debug!(destination = %updated.destination(), name = %updated.metadata.name, "[MEMORY] Updated artifact");
        self.emit(ChangeEvent::Artifact {
            kind: EventKind::Applied,
            object: updated.clone(),
        });
        Ok(updated)
    }

    async fn delete_artifact(&self, destination: &str, name: &str) -> StoreResult<()> {
        self.check_writable(destination).await?;

        let removed = self
            .state
            .write()
            .await
            .artifacts
            .remove(&(destination.to_string(), name.to_string()));
        let Some(object) = removed else {
            return Err(StoreError::NotFound {
                kind: "manifestwork",
                name: format!("{destination}/{name}"),
            });
        };

        self.artifact_writes.fetch_add(1, Ordering::SeqCst);
        debug!(destination, name, "[MEMORY] Deleted artifact");
        self.emit(ChangeEvent::Artifact {
            kind: EventKind::Deleted,
            object,
        });
        Ok(())
    }

    async fn list_artifacts(&self, selector: &LabelSelector) -> StoreResult<Vec<ManifestWork>> {
        Ok(self
            .state
            .read()
            .await
            .artifacts
            .values()
            .filter(|w| selector.matches(&w.metadata.labels))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn is_bound(&self, scope: &ScopeName) -> StoreResult<bool> {
        Ok(self.state.read().await.bindings.contains(scope))
    }

    async fn list_bound(&self) -> StoreResult<Vec<ScopeName>> {
        Ok(self.state.read().await.bindings.iter().cloned().collect())
    }
}

impl WatchStore for MemoryStore {
    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.subscribe()
    }
}
