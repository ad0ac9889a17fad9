//! Idempotent Reconciler.
//!
//! Get-or-create / compare-and-update for one artifact in one destination.
//! Payloads are compared byte for byte, so nothing is written when the
//! rendered content is unchanged. An artifact stamped with a different
//! source is never overwritten.

use std::sync::Arc;

use fleetsplit_reconcile::{manifests_equal, ApplyOutcome, PayloadDigest};
use tracing::{debug, info, instrument, warn};

use crate::error::ApplyError;
use crate::model::ManifestWork;
use crate::store::ClusterStore;

pub struct ArtifactApplier {
    store: Arc<dyn ClusterStore>,
}

impl ArtifactApplier {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Apply `desired` to its destination. Issues at most one write.
    ///
    /// Fails with [`ApplyError::Owned`] when both sides carry source labels
    /// and they disagree. Unlabelled artifacts are adopted.
    #[instrument(
        skip(self, desired),
        fields(destination = %desired.destination(), name = %desired.metadata.name)
    )]
    pub async fn apply(&self, desired: ManifestWork) -> Result<ApplyOutcome, ApplyError> {
        let digest = PayloadDigest::of_manifests(&desired.manifests);

        let Some(mut existing) = self
            .store
            .get_artifact(desired.destination(), &desired.metadata.name)
            .await?
        else {
            self.store.create_artifact(&desired).await?;
            info!(digest = %digest, "Created artifact");
            return Ok(ApplyOutcome::Created);
        };

        if let (Some(owner), Some(wanted)) =
            (existing.metadata.source_key(), desired.metadata.source_key())
        {
            if owner != wanted {
                warn!(owner = %owner, source = %wanted, "Artifact belongs to another source");
                return Err(ApplyError::Owned {
                    destination: existing.destination().to_string(),
                    name: existing.metadata.name,
                    owner: owner.to_string(),
                });
            }
        }

        let labelled = desired
            .metadata
            .labels
            .iter()
            .all(|(k, v)| existing.metadata.labels.get(k) == Some(v));
        if labelled && manifests_equal(&desired.manifests, &existing.manifests) {
            debug!(digest = %digest, "Artifact up to date");
            return Ok(ApplyOutcome::Unchanged);
        }

        // Keep identity and version; only the payload and our labels move.
        existing.manifests = desired.manifests;
        existing.metadata.labels.extend(desired.metadata.labels);
        self.store.update_artifact(&existing).await?;
        info!(digest = %digest, "Updated artifact");
        Ok(ApplyOutcome::Updated)
    }
}
