//! Key routing.
//!
//! Every change a controller cares about maps to one reconciliation key:
//! source edits, selection edits and drift on derived artifacts all land on
//! the key of the source they belong to. Routers double as event filters
//! for the watch layer.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use fleetsplit_id::{ScopeName, SourceKey, DERIVED_PREFIX};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ReconcileResult;
use crate::model::{
    ChangeEvent, EventKind, LabelSelector, ManifestWork, ObjectMeta, DEFAULT_PLACEMENT,
    PLACEMENT_LABEL, PROPAGATE_LABEL, SCOPE_LABEL, SOURCE_ANNOTATION, SPLIT_KIND, SPLIT_LABEL,
};
use crate::propagator::PropagationSpec;
use crate::queue::WorkQueue;
use crate::store::ClusterStore;

#[async_trait]
pub trait KeyRouter: Send + Sync {
    /// Whether the event concerns this controller at all.
    fn is_relevant(&self, event: &ChangeEvent) -> bool;

    /// The key to reconcile for a relevant event.
    fn key_for(&mut self, event: &ChangeEvent) -> Option<String>;

    /// Every key that must be reconciled on start or after missed events.
    async fn initial_keys(&mut self, store: &dyn ClusterStore) -> ReconcileResult<Vec<String>>;
}

// =============================================================================
// Splitter
// =============================================================================

/// Routes events to the source key of a split workload.
pub struct SplitterRouter {
    scope: ScopeName,
    /// Derived name -> owning source key. Placement annotations are
    /// authoritative; otherwise the first source seen claims the name.
    index: HashMap<String, SourceKey>,
}

impl SplitterRouter {
    pub fn new(scope: ScopeName) -> Self {
        Self {
            scope,
            index: HashMap::new(),
        }
    }

    /// Reverse a derived name to its source key.
    ///
    /// Name parsing is ambiguous when the namespace has a dash, so the index
    /// wins when it knows the name.
    pub fn source_for(&self, derived: &str) -> Option<SourceKey> {
        if let Some(key) = self.index.get(derived) {
            return Some(key.clone());
        }
        match SourceKey::from_derived_name(derived) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(name = %derived, error = %e, "Cannot map derived name to a source");
                None
            }
        }
    }

    pub fn indexed(&self) -> usize {
        self.index.len()
    }

    fn claim(&mut self, key: &SourceKey) {
        self.index
            .entry(key.derived_name())
            .or_insert_with(|| key.clone());
    }

    fn release(&mut self, key: &SourceKey) {
        let name = key.derived_name();
        if self.index.get(&name) == Some(key) {
            self.index.remove(&name);
        }
    }

    /// Record the owner a placement request is annotated with.
    fn adopt(&mut self, metadata: &ObjectMeta) -> Option<SourceKey> {
        let owner = SourceKey::parse(metadata.annotations.get(SOURCE_ANNOTATION)?).ok()?;
        self.index.insert(metadata.name.clone(), owner.clone());
        Some(owner)
    }

    /// Source labels first; unlabelled artifacts fall back to the name.
    fn owner_of(&self, work: &ManifestWork) -> Option<SourceKey> {
        work.metadata
            .source_key()
            .or_else(|| self.source_for(work.metadata.label(SPLIT_LABEL)?))
    }
}

#[async_trait]
impl KeyRouter for SplitterRouter {
    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Source { scope, object, .. } => {
                scope == &self.scope && object.kind == SPLIT_KIND
            }
            ChangeEvent::Placement { object, .. } => {
                object.metadata.namespace == self.scope.as_str()
                    && object.metadata.name.starts_with(DERIVED_PREFIX)
            }
            ChangeEvent::Decision { object, .. } => {
                object.metadata.namespace == self.scope.as_str()
                    && object
                        .metadata
                        .label(PLACEMENT_LABEL)
                        .is_some_and(|p| p.starts_with(DERIVED_PREFIX))
            }
            ChangeEvent::Artifact { object, .. } => {
                object.metadata.label(SPLIT_LABEL).is_some()
                    && object.metadata.label(SCOPE_LABEL) == Some(self.scope.as_str())
            }
            ChangeEvent::Binding { .. } => false,
        }
    }

    fn key_for(&mut self, event: &ChangeEvent) -> Option<String> {
        if !self.is_relevant(event) {
            return None;
        }

        let key = match event {
            ChangeEvent::Source { kind, object, .. } => {
                let key = object.key().ok()?;
                match kind {
                    EventKind::Applied => self.claim(&key),
                    EventKind::Deleted => self.release(&key),
                }
                key
            }
            ChangeEvent::Placement { object, .. } => match self.adopt(&object.metadata) {
                Some(owner) => owner,
                None => self.source_for(&object.metadata.name)?,
            },
            ChangeEvent::Decision { object, .. } => {
                self.source_for(object.metadata.label(PLACEMENT_LABEL)?)?
            }
            ChangeEvent::Artifact { object, .. } => self.owner_of(object)?,
            ChangeEvent::Binding { .. } => return None,
        };
        Some(key.to_string())
    }

    /// Keys of every live source, plus keys of labelled artifacts whose
    /// source may be gone. The latter covers deletes missed while stopped
    /// or lost to a lagged stream.
    async fn initial_keys(&mut self, store: &dyn ClusterStore) -> ReconcileResult<Vec<String>> {
        self.index.clear();
        let mut keys = BTreeSet::new();

        for source in store.list_sources(&self.scope, SPLIT_KIND).await? {
            let key = match source.key() {
                Ok(key) => key,
                Err(e) => {
                    warn!(name = %source.metadata.name, error = %e, "Skipping source with invalid key");
                    continue;
                }
            };
            if let Some(placement) = store.get_placement(&self.scope, &key.derived_name()).await? {
                self.adopt(&placement.metadata);
            }
            self.claim(&key);
            keys.insert(key.to_string());
        }

        let live = keys.len();
        let selector = LabelSelector::new().with(SCOPE_LABEL, self.scope.as_str());
        for work in store.list_artifacts(&selector).await? {
            if work.metadata.label(SPLIT_LABEL).is_none() {
                continue;
            }
            if let Some(key) = self.owner_of(&work) {
                keys.insert(key.to_string());
            }
        }
        debug!(live, orphaned = keys.len() - live, "Collected initial keys");

        Ok(keys.into_iter().collect())
    }
}

// =============================================================================
// Propagator
// =============================================================================

/// Routes every relevant event of a scope to the scope's single key.
pub struct PropagatorRouter {
    scope: ScopeName,
    spec: PropagationSpec,
}

impl PropagatorRouter {
    pub fn new(scope: ScopeName, spec: PropagationSpec) -> Self {
        Self { scope, spec }
    }
}

#[async_trait]
impl KeyRouter for PropagatorRouter {
    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Source { scope, object, .. } => {
                scope == &self.scope && object.kind == self.spec.kind
            }
            ChangeEvent::Placement { object, .. } => {
                object.metadata.namespace == self.scope.as_str()
                    && object.metadata.name == self.spec.placement
            }
            ChangeEvent::Decision { object, .. } => {
                object.metadata.namespace == self.scope.as_str()
                    && object.metadata.label(PLACEMENT_LABEL) == Some(self.spec.placement.as_str())
            }
            ChangeEvent::Artifact { object, .. } => {
                object.metadata.label(PROPAGATE_LABEL) == Some(self.spec.artifact_name.as_str())
                    && object.metadata.label(SCOPE_LABEL) == Some(self.scope.as_str())
            }
            ChangeEvent::Binding { .. } => false,
        }
    }

    fn key_for(&mut self, event: &ChangeEvent) -> Option<String> {
        self.is_relevant(event).then(|| self.scope.to_string())
    }

    async fn initial_keys(&mut self, _store: &dyn ClusterStore) -> ReconcileResult<Vec<String>> {
        Ok(vec![self.scope.to_string()])
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Routes binding changes, and changes to a scope's default placement, to
/// the scope key.
#[derive(Default)]
pub struct RegistryRouter;

#[async_trait]
impl KeyRouter for RegistryRouter {
    fn is_relevant(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Binding { .. } => true,
            ChangeEvent::Placement { object, .. } => object.metadata.name == DEFAULT_PLACEMENT,
            _ => false,
        }
    }

    fn key_for(&mut self, event: &ChangeEvent) -> Option<String> {
        match event {
            ChangeEvent::Binding { scope, .. } => Some(scope.to_string()),
            ChangeEvent::Placement { object, .. } if self.is_relevant(event) => {
                Some(object.metadata.namespace.clone())
            }
            _ => None,
        }
    }

    async fn initial_keys(&mut self, store: &dyn ClusterStore) -> ReconcileResult<Vec<String>> {
        Ok(store
            .list_bound()
            .await?
            .into_iter()
            .map(|scope| scope.to_string())
            .collect())
    }
}

// =============================================================================
// Event Pump
// =============================================================================

/// Feeds a queue from the change stream through a router.
pub struct EventPump<R> {
    router: R,
    queue: Arc<WorkQueue>,
    store: Arc<dyn ClusterStore>,
}

impl<R: KeyRouter> EventPump<R> {
    pub fn new(router: R, queue: Arc<WorkQueue>, store: Arc<dyn ClusterStore>) -> Self {
        Self {
            router,
            queue,
            store,
        }
    }

    /// Enqueue every initial key, then follow the change stream until
    /// `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.store.watch();
        self.resync().await;

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Some(key) = self.router.key_for(&event) {
                            self.queue.add(key).await;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(queue = %self.queue.name(), missed, "Change stream lagged, resyncing");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        info!(queue = %self.queue.name(), "Change stream closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn resync(&mut self) {
        match self.router.initial_keys(self.store.as_ref()).await {
            Ok(keys) => {
                debug!(queue = %self.queue.name(), keys = keys.len(), "Resync");
                for key in keys {
                    self.queue.add(key).await;
                }
            }
            Err(e) => warn!(queue = %self.queue.name(), error = %e, "Resync failed"),
        }
    }
}
