//! Scope registry.
//!
//! Maps each bound scope to the cancellation handle of its running splitter
//! and propagator. Driven as a controller keyed by scope, so one scope is
//! never started and stopped concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fleetsplit_id::ScopeName;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::config::ControllerSettings;
use crate::controller::{Controller, Reconcile};
use crate::error::ReconcileResult;
use crate::model::DEFAULT_PLACEMENT;
use crate::propagator::{PropagationSpec, Propagator};
use crate::resolver::DecisionResolver;
use crate::router::{EventPump, PropagatorRouter, SplitterRouter};
use crate::splitter::DeploymentSplitter;
use crate::store::ClusterStore;

struct ScopeHandle {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ScopeHandle {
    async fn stop(self, scope: &ScopeName) {
        // Receivers may already be gone.
        let _ = self.cancel.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(scope = %scope, error = %e, "Scope task failed");
            }
        }
    }
}

pub struct ScopeRegistry {
    store: Arc<dyn ClusterStore>,
    settings: ControllerSettings,
    resolver: DecisionResolver,
    scopes: Mutex<HashMap<ScopeName, ScopeHandle>>,
}

impl ScopeRegistry {
    pub fn new(store: Arc<dyn ClusterStore>, settings: ControllerSettings) -> Self {
        Self {
            resolver: DecisionResolver::new(Arc::clone(&store)),
            store,
            settings,
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Scopes with running controllers, sorted.
    pub async fn active_scopes(&self) -> Vec<ScopeName> {
        let mut scopes: Vec<_> = self.scopes.lock().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Stop every scope's controllers and wait for them.
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self.scopes.lock().await.drain().collect();
        for (scope, handle) in handles {
            handle.stop(&scope).await;
            info!(scope = %scope, "Stopped scope controllers");
        }
    }

    async fn start(&self, scope: &ScopeName) {
        let mut scopes = self.scopes.lock().await;
        if scopes.contains_key(scope) {
            return;
        }

        let (cancel, stop) = watch::channel(false);
        let mut tasks = Vec::with_capacity(4);

        let splitter = Controller::new(
            Arc::new(DeploymentSplitter::new(scope.clone(), Arc::clone(&self.store))),
            &self.settings,
        );
        let pump = EventPump::new(
            SplitterRouter::new(scope.clone()),
            splitter.queue(),
            Arc::clone(&self.store),
        );
        tasks.push(tokio::spawn(pump.run(stop.clone())));
        tasks.push(tokio::spawn({
            let stop = stop.clone();
            async move { splitter.run(stop).await }
        }));

        let spec = PropagationSpec::namespaces();
        let propagator = Controller::new(
            Arc::new(Propagator::new(
                scope.clone(),
                spec.clone(),
                Arc::clone(&self.store),
            )),
            &self.settings,
        );
        let pump = EventPump::new(
            PropagatorRouter::new(scope.clone(), spec),
            propagator.queue(),
            Arc::clone(&self.store),
        );
        tasks.push(tokio::spawn(pump.run(stop.clone())));
        tasks.push(tokio::spawn(async move { propagator.run(stop).await }));

        scopes.insert(scope.clone(), ScopeHandle { cancel, tasks });
        info!(scope = %scope, "Started scope controllers");
    }

    async fn stop(&self, scope: &ScopeName) {
        let handle = self.scopes.lock().await.remove(scope);
        if let Some(handle) = handle {
            handle.stop(scope).await;
            info!(scope = %scope, "Stopped scope controllers");
        }
    }
}

#[async_trait]
impl Reconcile for ScopeRegistry {
    fn name(&self) -> &str {
        "scope-registry"
    }

    #[instrument(skip(self, _cancel))]
    async fn reconcile(&self, key: &str, _cancel: &watch::Receiver<bool>) -> ReconcileResult<()> {
        let scope = ScopeName::parse(key)?;

        if self.store.is_bound(&scope).await? {
            self.resolver
                .ensure_placement(&scope, DEFAULT_PLACEMENT, None)
                .await?;
            self.start(&scope).await;
            return Ok(());
        }

        match self.store.delete_placement(&scope, DEFAULT_PLACEMENT).await {
            Ok(()) => info!(scope = %scope, "Deleted default placement"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        self.stop(&scope).await;
        Ok(())
    }
}
