//! Verbatim propagation.
//!
//! Every source of one kind in a scope is shipped unchanged, as one manifest
//! set, to every destination the scope's placement selects. No partitioning.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fleetsplit_id::ScopeName;
use fleetsplit_reconcile::Manifest;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::apply::ArtifactApplier;
use crate::cleaner::OrphanCleaner;
use crate::controller::Reconcile;
use crate::error::{AggregateError, ApplyError, ReconcileError, ReconcileResult};
use crate::model::{
    LabelSelector, ManifestWork, ObjectMeta, DEFAULT_PLACEMENT, PROPAGATE_LABEL, SCOPE_LABEL,
};
use crate::resolver::DecisionResolver;
use crate::store::ClusterStore;

/// What a propagator ships and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationSpec {
    /// Source kind to collect.
    pub kind: String,
    /// Name of the artifact in every destination.
    pub artifact_name: String,
    /// Placement whose decisions choose the destinations.
    pub placement: String,
}

impl PropagationSpec {
    pub fn namespaces() -> Self {
        Self {
            kind: "Namespace".to_string(),
            artifact_name: "namespace-syncer".to_string(),
            placement: DEFAULT_PLACEMENT.to_string(),
        }
    }
}

pub struct Propagator {
    scope: ScopeName,
    spec: PropagationSpec,
    store: Arc<dyn ClusterStore>,
    resolver: DecisionResolver,
    applier: ArtifactApplier,
    cleaner: OrphanCleaner,
}

impl Propagator {
    pub fn new(scope: ScopeName, spec: PropagationSpec, store: Arc<dyn ClusterStore>) -> Self {
        Self {
            scope,
            spec,
            resolver: DecisionResolver::new(Arc::clone(&store)),
            applier: ArtifactApplier::new(Arc::clone(&store)),
            cleaner: OrphanCleaner::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn spec(&self) -> &PropagationSpec {
        &self.spec
    }
}

#[async_trait]
impl Reconcile for Propagator {
    fn name(&self) -> &str {
        "propagator"
    }

    #[instrument(skip(self, cancel), fields(kind = %self.spec.kind))]
    async fn reconcile(&self, key: &str, cancel: &watch::Receiver<bool>) -> ReconcileResult<()> {
        let scope = ScopeName::parse(key)?;
        if scope != self.scope {
            return Err(ReconcileError::InvalidSource {
                key: key.to_string(),
                message: format!("propagator is bound to scope {}", self.scope),
            });
        }

        let selector = LabelSelector::new()
            .with(PROPAGATE_LABEL, self.spec.artifact_name.as_str())
            .with(SCOPE_LABEL, self.scope.as_str());

        let sources = self.store.list_sources(&self.scope, &self.spec.kind).await?;
        let destinations = if sources.is_empty() {
            Vec::new()
        } else {
            self.resolver.resolve(&self.scope, &self.spec.placement).await?
        };

        let manifests = sources
            .iter()
            .map(|s| Manifest::verbatim(&s.template()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ReconcileError::Render {
                key: key.to_string(),
                source,
            })?;

        let mut errors = AggregateError::default();
        for destination in &destinations {
            if *cancel.borrow() {
                return Err(ReconcileError::Cancelled);
            }

            let metadata = ObjectMeta::new("", self.spec.artifact_name.as_str())
                .with_label(PROPAGATE_LABEL, self.spec.artifact_name.as_str())
                .with_label(SCOPE_LABEL, self.scope.as_str());
            let work = ManifestWork::new(destination, metadata, manifests.clone());

            match self.applier.apply(work).await {
                Ok(outcome) => {
                    debug!(destination = %destination, outcome = outcome.as_str(), "Applied")
                }
                Err(ApplyError::Store(e)) => {
                    warn!(destination = %destination, error = %e, "Failed to apply artifact");
                    errors.push(destination.as_str(), e);
                }
                Err(e @ ApplyError::Owned { .. }) => {
                    return Err(ReconcileError::Conflict {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        errors.into_result()?;

        if *cancel.borrow() {
            return Err(ReconcileError::Cancelled);
        }
        let active: BTreeSet<String> = destinations.iter().map(|d| d.to_string()).collect();
        let deleted = self.cleaner.clean(&selector, &active, None).await?;

        info!(
            sources = sources.len(),
            destinations = destinations.len(),
            deleted,
            "Propagated"
        );
        Ok(())
    }
}
