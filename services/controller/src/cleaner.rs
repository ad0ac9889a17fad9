//! Orphan Cleaner.
//!
//! Deletes artifacts whose destination is no longer active. Lookup is by
//! label, never by name prefix, so artifacts of other sources that share a
//! prefix are left alone. When an owner is given, artifacts stamped with
//! another source are skipped even if the selector matches them.

use std::collections::BTreeSet;
use std::sync::Arc;

use fleetsplit_id::SourceKey;
use tracing::{info, instrument, warn};

use crate::error::AggregateError;
use crate::model::{LabelSelector, ManifestWork};
use crate::store::ClusterStore;

pub struct OrphanCleaner {
    store: Arc<dyn ClusterStore>,
}

impl OrphanCleaner {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Delete every artifact matching `selector` outside `active`, skipping
    /// any that `owner` does not own.
    ///
    /// Returns the number of artifacts deleted. A failed listing is reported
    /// as a single failure; failed deletes are collected per destination.
    #[instrument(skip_all, fields(selector = %selector, active = active.len()))]
    pub async fn clean(
        &self,
        selector: &LabelSelector,
        active: &BTreeSet<String>,
        owner: Option<&SourceKey>,
    ) -> Result<usize, AggregateError> {
        let mut errors = AggregateError::default();

        let artifacts = match self.store.list_artifacts(selector).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                errors.push("*", e);
                return Err(errors);
            }
        };

        let mut deleted = 0;
        for work in artifacts
            .iter()
            .filter(|w| !active.contains(w.destination()))
            .filter(|w| owns(owner, w))
        {
            match self
                .store
                .delete_artifact(work.destination(), &work.metadata.name)
                .await
            {
                Ok(()) => {
                    deleted += 1;
                    info!(
                        destination = %work.destination(),
                        name = %work.metadata.name,
                        "Deleted orphaned artifact"
                    );
                }
                // Already gone.
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(destination = %work.destination(), error = %e, "Failed to delete artifact");
                    errors.push(work.destination(), e);
                }
            }
        }

        errors.into_result().map(|()| deleted)
    }
}

fn owns(owner: Option<&SourceKey>, work: &ManifestWork) -> bool {
    match (owner, work.metadata.source_key()) {
        (Some(owner), Some(stamped)) => *owner == stamped,
        _ => true,
    }
}
