//! Collaborator interfaces.
//!
//! The controller never talks to a concrete API server. It reads sources,
//! selections and bindings, and reads/writes artifacts, through these traits.
//! Reads may be served from an eventually consistent cache; writes go to the
//! authoritative store.
//!
//! Not-found on read is `Ok(None)`, never an error.

mod memory;

use async_trait::async_trait;
use fleetsplit_id::{ScopeName, SourceKey};
use tokio::sync::broadcast;

use crate::error::StoreResult;
use crate::model::{
    ChangeEvent, LabelSelector, ManifestWork, Placement, PlacementDecision, SourceObject,
};

pub use memory::{MemoryStore, Seed, SeedSource};

/// Read access to upstream source objects.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source(
        &self,
        scope: &ScopeName,
        kind: &str,
        key: &SourceKey,
    ) -> StoreResult<Option<SourceObject>>;

    /// All sources of a kind in a scope, ordered by namespace then name.
    async fn list_sources(&self, scope: &ScopeName, kind: &str) -> StoreResult<Vec<SourceObject>>;
}

/// Placement requests and the decisions answering them.
#[async_trait]
pub trait SelectionStore: Send + Sync {
    async fn get_placement(&self, scope: &ScopeName, name: &str) -> StoreResult<Option<Placement>>;

    async fn create_placement(&self, placement: &Placement) -> StoreResult<Placement>;

    async fn delete_placement(&self, scope: &ScopeName, name: &str) -> StoreResult<()>;

    /// Decisions in a scope matching the selector, in list order.
    async fn list_decisions(
        &self,
        scope: &ScopeName,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<PlacementDecision>>;
}

/// The controller-owned derived artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn get_artifact(
        &self,
        destination: &str,
        name: &str,
    ) -> StoreResult<Option<ManifestWork>>;

    async fn create_artifact(&self, work: &ManifestWork) -> StoreResult<ManifestWork>;

    /// Fails with `Conflict` when `work.metadata.resource_version` is stale.
    async fn update_artifact(&self, work: &ManifestWork) -> StoreResult<ManifestWork>;

    async fn delete_artifact(&self, destination: &str, name: &str) -> StoreResult<()>;

    /// Artifacts across every destination matching the selector.
    async fn list_artifacts(&self, selector: &LabelSelector) -> StoreResult<Vec<ManifestWork>>;
}

/// Which scopes currently have destinations bound to them.
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn is_bound(&self, scope: &ScopeName) -> StoreResult<bool>;

    async fn list_bound(&self) -> StoreResult<Vec<ScopeName>>;
}

/// The change stream feeding the key routers.
pub trait WatchStore: Send + Sync {
    /// Subscribe before listing so no change between the two is missed.
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Everything the controller needs from its collaborators.
pub trait ClusterStore:
    SourceStore + SelectionStore + ArtifactStore + BindingStore + WatchStore
{
}

impl<T> ClusterStore for T where
    T: SourceStore + SelectionStore + ArtifactStore + BindingStore + WatchStore
{
}
