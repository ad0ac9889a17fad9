//! Decision Resolver.
//!
//! Maps a placement request to the ordered list of destinations currently
//! chosen for it. A missing placement or decision is an empty selection.

use std::collections::HashSet;
use std::sync::Arc;

use fleetsplit_id::{DestinationName, ScopeName, SourceKey};
use tracing::{debug, info, instrument, warn};

use crate::error::{ReconcileError, ReconcileResult, StoreError, StoreResult};
use crate::model::{LabelSelector, Placement, PLACEMENT_LABEL, SOURCE_ANNOTATION};
use crate::store::ClusterStore;

pub struct DecisionResolver {
    store: Arc<dyn ClusterStore>,
}

impl DecisionResolver {
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self { store }
    }

    /// Make sure the placement request exists.
    ///
    /// Returns `true` if it already existed, `false` if this call created it.
    /// An existing request annotated with a different source is a
    /// [`ReconcileError::Conflict`]; the first source to claim a derived name
    /// keeps it.
    #[instrument(skip_all, fields(scope = %scope, placement = %name))]
    pub async fn ensure_placement(
        &self,
        scope: &ScopeName,
        name: &str,
        source: Option<&SourceKey>,
    ) -> ReconcileResult<bool> {
        if let Some(existing) = self.store.get_placement(scope, name).await? {
            let owner = existing.metadata.annotations.get(SOURCE_ANNOTATION);
            if let (Some(key), Some(owner)) = (source, owner) {
                if *owner != key.to_string() {
                    warn!(owner = %owner, source = %key, "Placement belongs to another source");
                    return Err(ReconcileError::Conflict {
                        key: key.to_string(),
                        message: format!("placement {name} belongs to source {owner}"),
                    });
                }
            }
            return Ok(true);
        }

        let mut placement = Placement::new(scope, name);
        if let Some(key) = source {
            placement.metadata = placement
                .metadata
                .with_annotation(SOURCE_ANNOTATION, key.to_string());
        }

        match self.store.create_placement(&placement).await {
            Ok(_) => {
                info!("Created placement request");
                Ok(false)
            }
            // Lost a race with another writer; the next pass checks the owner.
            Err(StoreError::AlreadyExists { .. }) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Destinations selected for `placement`, in feed order.
    ///
    /// Decisions sharing the placement label are concatenated in list order.
    /// A destination listed twice keeps its first position.
    #[instrument(skip_all, fields(scope = %scope, placement = %placement))]
    pub async fn resolve(
        &self,
        scope: &ScopeName,
        placement: &str,
    ) -> StoreResult<Vec<DestinationName>> {
        let selector = LabelSelector::new().with(PLACEMENT_LABEL, placement);
        let decisions = self.store.list_decisions(scope, &selector).await?;

        let mut seen = HashSet::new();
        let destinations: Vec<DestinationName> = decisions
            .iter()
            .flat_map(|d| d.decisions.iter())
            .filter(|d| seen.insert(d.cluster_name.clone()))
            .map(|d| d.cluster_name.clone())
            .collect();

        debug!(
            decisions = decisions.len(),
            destinations = destinations.len(),
            "Resolved selection"
        );
        Ok(destinations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlacementDecision;
    use crate::store::{MemoryStore, SelectionStore};

    fn names(list: &[&str]) -> Vec<DestinationName> {
        list.iter().map(|n| DestinationName::parse(n).unwrap()).collect()
    }

    fn scope() -> ScopeName {
        ScopeName::parse("team-a").unwrap()
    }

    #[tokio::test]
    async fn test_missing_decision_is_empty() {
        let resolver = DecisionResolver::new(Arc::new(MemoryStore::new()));
        let resolved = resolver.resolve(&scope(), "deployment-default-web").await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_concatenates_and_dedupes() {
        let store = Arc::new(MemoryStore::new());
        let placement = "deployment-default-web";
        store
            .put_decision(PlacementDecision::new(&scope(), "web-1", placement, &names(&["c2", "c1"])))
            .await;
        store
            .put_decision(PlacementDecision::new(&scope(), "web-2", placement, &names(&["c1", "c3"])))
            .await;
        store
            .put_decision(PlacementDecision::new(&scope(), "other", "deployment-default-api", &names(&["c9"])))
            .await;

        let resolver = DecisionResolver::new(store);
        let resolved = resolver.resolve(&scope(), placement).await.unwrap();
        assert_eq!(resolved, names(&["c2", "c1", "c3"]));
    }

    #[tokio::test]
    async fn test_ensure_placement_creates_once() {
        let store = Arc::new(MemoryStore::new());
        let resolver = DecisionResolver::new(store.clone());
        let key = SourceKey::parse("default/web").unwrap();

        assert!(!resolver
            .ensure_placement(&scope(), "deployment-default-web", Some(&key))
            .await
            .unwrap());
        assert!(resolver
            .ensure_placement(&scope(), "deployment-default-web", Some(&key))
            .await
            .unwrap());

        let placement = store
            .get_placement(&scope(), "deployment-default-web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            placement.metadata.annotations.get(SOURCE_ANNOTATION).map(String::as_str),
            Some("default/web")
        );
    }

    #[tokio::test]
    async fn test_ensure_placement_rejects_second_owner() {
        let store = Arc::new(MemoryStore::new());
        let resolver = DecisionResolver::new(store);
        let first = SourceKey::parse("shop-eu/cart").unwrap();
        let second = SourceKey::parse("shop/eu-cart").unwrap();
        let name = first.derived_name();

        resolver.ensure_placement(&scope(), &name, Some(&first)).await.unwrap();
        let err = resolver
            .ensure_placement(&scope(), &name, Some(&second))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Conflict { ref key, .. } if key == "shop/eu-cart"));
        assert!(!err.is_retryable());

        // Unowned callers are not checked.
        assert!(resolver.ensure_placement(&scope(), &name, None).await.unwrap());
    }
}
