//! Deployment splitter.
//!
//! One pass for one source key: resolve destinations, partition the replica
//! count, render one artifact per active destination, apply each, then delete
//! artifacts of destinations that dropped out.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fleetsplit_id::{DestinationName, ScopeName, SourceKey};
use fleetsplit_reconcile::{partition, Manifest};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::apply::ArtifactApplier;
use crate::cleaner::OrphanCleaner;
use crate::controller::Reconcile;
use crate::error::{AggregateError, ApplyError, ReconcileError, ReconcileResult};
use crate::model::{
    LabelSelector, ManifestWork, ObjectMeta, SourceObject, SCOPE_LABEL, SPLIT_KIND, SPLIT_LABEL,
};
use crate::resolver::DecisionResolver;
use crate::store::ClusterStore;

pub struct DeploymentSplitter {
    scope: ScopeName,
    store: Arc<dyn ClusterStore>,
    resolver: DecisionResolver,
    applier: ArtifactApplier,
    cleaner: OrphanCleaner,
}

impl DeploymentSplitter {
    pub fn new(scope: ScopeName, store: Arc<dyn ClusterStore>) -> Self {
        Self {
            scope,
            resolver: DecisionResolver::new(Arc::clone(&store)),
            applier: ArtifactApplier::new(Arc::clone(&store)),
            cleaner: OrphanCleaner::new(Arc::clone(&store)),
            store,
        }
    }

    /// Every split artifact under `name` in this scope. Cleanup narrows
    /// this to the source's own artifacts, since names can collide.
    fn selector(&self, name: &str) -> LabelSelector {
        LabelSelector::new()
            .with(SPLIT_LABEL, name)
            .with(SCOPE_LABEL, self.scope.as_str())
    }

    /// Render every artifact up front so a bad template writes nothing.
    fn render(
        &self,
        key: &SourceKey,
        source: &SourceObject,
        destinations: &[DestinationName],
    ) -> ReconcileResult<Vec<ManifestWork>> {
        let total = desired_replicas(key, source)?;
        let template = source.template();
        let name = key.derived_name();

        partition(total, destinations)
            .into_iter()
            .map(|share| -> ReconcileResult<ManifestWork> {
                let manifest = Manifest::with_replicas(&template, share.replicas).map_err(
                    |source| ReconcileError::Render {
                        key: key.to_string(),
                        source,
                    },
                )?;
                let metadata = ObjectMeta::new("", &name)
                    .with_label(SPLIT_LABEL, &name)
                    .with_label(SCOPE_LABEL, self.scope.as_str())
                    .with_source(key);
                Ok(ManifestWork::new(share.destination, metadata, vec![manifest]))
            })
            .collect()
    }
}

/// `spec.replicas`. Unset or null follows the Kubernetes Deployment default
/// of 1, so a source without a count is still deployed.
fn desired_replicas(key: &SourceKey, source: &SourceObject) -> ReconcileResult<u32> {
    match source.replicas() {
        None | Some(Value::Null) => Ok(1),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ReconcileError::InvalidSource {
                key: key.to_string(),
                message: format!("spec.replicas must be a non-negative integer, got {value}"),
            }),
    }
}

#[async_trait]
impl Reconcile for DeploymentSplitter {
    fn name(&self) -> &str {
        "deployment-splitter"
    }

    #[instrument(skip(self, cancel), fields(scope = %self.scope))]
    async fn reconcile(&self, key: &str, cancel: &watch::Receiver<bool>) -> ReconcileResult<()> {
        let source_key = SourceKey::parse(key)?;
        let name = source_key.derived_name();
        let selector = self.selector(&name);

        let Some(source) = self
            .store
            .get_source(&self.scope, SPLIT_KIND, &source_key)
            .await?
        else {
            let deleted = self
                .cleaner
                .clean(&selector, &BTreeSet::new(), Some(&source_key))
                .await?;
            info!(deleted, "Source gone, removed its artifacts");
            return Ok(());
        };

        if !self
            .resolver
            .ensure_placement(&self.scope, &name, Some(&source_key))
            .await?
        {
            // No decision can exist yet; the placement's own events re-fire us.
            return Ok(());
        }

        let destinations = self.resolver.resolve(&self.scope, &name).await?;
        let desired = self.render(&source_key, &source, &destinations)?;
        let active: BTreeSet<String> = desired
            .iter()
            .map(|w| w.destination().to_string())
            .collect();

        let mut errors = AggregateError::default();
        let mut writes = 0;
        for work in desired {
            if *cancel.borrow() {
                return Err(ReconcileError::Cancelled);
            }

            let destination = work.destination().to_string();
            match self.applier.apply(work).await {
                Ok(outcome) => {
                    debug!(destination = %destination, outcome = outcome.as_str(), "Applied");
                    if outcome.is_write() {
                        writes += 1;
                    }
                }
                Err(ApplyError::Store(e)) => {
                    warn!(destination = %destination, error = %e, "Failed to apply artifact");
                    errors.push(destination, e);
                }
                Err(e @ ApplyError::Owned { .. }) => {
                    return Err(ReconcileError::Conflict {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        // Stale artifacts stay until every active destination is in sync.
        errors.into_result()?;

        if *cancel.borrow() {
            return Err(ReconcileError::Cancelled);
        }
        let deleted = self
            .cleaner
            .clean(&selector, &active, Some(&source_key))
            .await?;

        info!(
            selected = destinations.len(),
            active = active.len(),
            writes,
            deleted,
            "Reconciled split workload"
        );
        Ok(())
    }
}
