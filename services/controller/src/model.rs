//! Objects read and written by the controller.
//!
//! Source objects, placements, decisions and scope bindings are owned by
//! upstream systems and only read here (placement requests are the one
//! create-if-absent exception). `ManifestWork` artifacts are owned
//! exclusively by this controller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleetsplit_id::{DestinationName, NameError, ScopeName, SourceKey};
use fleetsplit_reconcile::Manifest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Label on decisions naming the placement request they answer.
pub const PLACEMENT_LABEL: &str = "cluster.open-cluster-management.io/placement";

/// Label on split artifacts; the value is the derived artifact name.
pub const SPLIT_LABEL: &str = "fleetsplit.io/splitter";

/// Label on propagated artifacts; the value is the artifact name.
pub const PROPAGATE_LABEL: &str = "fleetsplit.io/propagator";

/// Label on every artifact naming the scope that produced it.
pub const SCOPE_LABEL: &str = "fleetsplit.io/scope";

/// Labels on split artifacts naming the source they were rendered from.
/// Derived names can collide across sources; this pair cannot.
pub const SOURCE_NAMESPACE_LABEL: &str = "fleetsplit.io/source-namespace";
pub const SOURCE_NAME_LABEL: &str = "fleetsplit.io/source-name";

/// Annotation on placement requests naming their source key.
pub const SOURCE_ANNOTATION: &str = "fleetsplit.io/source";

/// Placement request every bound scope gets.
pub const DEFAULT_PLACEMENT: &str = "default";

/// Kind of source object the splitter partitions.
pub const SPLIT_KIND: &str = "Deployment";

// =============================================================================
// Metadata
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Assigned by the store; bumped on every write.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Stamp the owning source into the labels.
    #[must_use]
    pub fn with_source(self, key: &SourceKey) -> Self {
        self.with_label(SOURCE_NAMESPACE_LABEL, key.namespace())
            .with_label(SOURCE_NAME_LABEL, key.name())
    }

    /// The owning source, if both source labels are present and valid.
    pub fn source_key(&self) -> Option<SourceKey> {
        let namespace = self.label(SOURCE_NAMESPACE_LABEL)?;
        let name = self.label(SOURCE_NAME_LABEL)?;
        SourceKey::new(namespace, name).ok()
    }
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// An empty selector matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&parts.join(","))
    }
}

// =============================================================================
// Source Objects
// =============================================================================

/// A workload template authored upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
}

impl SourceObject {
    pub fn deployment(namespace: &str, name: &str, replicas: i64) -> Self {
        Self {
            api_version: "apps/v1".to_string(),
            kind: SPLIT_KIND.to_string(),
            metadata: ObjectMeta::new(namespace, name),
            spec: json!({ "replicas": replicas }),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
            metadata: ObjectMeta::new("", name),
            spec: Value::Null,
        }
    }

    pub fn key(&self) -> Result<SourceKey, NameError> {
        SourceKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// `spec.replicas`, `None` when unset.
    pub fn replicas(&self) -> Option<&Value> {
        self.spec.get("replicas")
    }

    /// The manifest shipped to destinations: identity, labels, annotations
    /// and spec. Store-assigned metadata is left out so payloads only change
    /// when the authored object does.
    pub fn template(&self) -> Value {
        let mut metadata = serde_json::Map::new();
        metadata.insert("name".to_string(), json!(self.metadata.name));
        if !self.metadata.namespace.is_empty() {
            metadata.insert("namespace".to_string(), json!(self.metadata.namespace));
        }
        if !self.metadata.labels.is_empty() {
            metadata.insert("labels".to_string(), json!(self.metadata.labels));
        }
        if !self.metadata.annotations.is_empty() {
            metadata.insert("annotations".to_string(), json!(self.metadata.annotations));
        }

        let mut template = json!({
            "apiVersion": self.api_version,
            "kind": self.kind,
            "metadata": metadata,
        });
        if !self.spec.is_null() {
            template["spec"] = self.spec.clone();
        }
        template
    }
}

// =============================================================================
// Selection
// =============================================================================

/// A request for destinations, answered by decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub metadata: ObjectMeta,
}

impl Placement {
    pub fn new(scope: &ScopeName, name: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(scope.as_str(), name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDecision {
    pub cluster_name: DestinationName,
    #[serde(default)]
    pub reason: String,
}

/// A versioned list of chosen destinations for one placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub decisions: Vec<ClusterDecision>,
}

impl PlacementDecision {
    pub fn new(scope: &ScopeName, name: &str, placement: &str, clusters: &[DestinationName]) -> Self {
        Self {
            metadata: ObjectMeta::new(scope.as_str(), name).with_label(PLACEMENT_LABEL, placement),
            decisions: clusters
                .iter()
                .map(|c| ClusterDecision {
                    cluster_name: c.clone(),
                    reason: String::new(),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Derived Artifacts
// =============================================================================

/// The per-destination artifact; `metadata.namespace` is the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestWork {
    pub metadata: ObjectMeta,
    pub manifests: Vec<Manifest>,
}

impl ManifestWork {
    pub fn new(destination: &DestinationName, metadata: ObjectMeta, manifests: Vec<Manifest>) -> Self {
        Self {
            metadata: ObjectMeta {
                namespace: destination.to_string(),
                ..metadata
            },
            manifests,
        }
    }

    pub fn destination(&self) -> &str {
        &self.metadata.namespace
    }
}

// =============================================================================
// Change Events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Applied,
    Deleted,
}

/// A change observed on the watch stream.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Source {
        scope: ScopeName,
        kind: EventKind,
        object: SourceObject,
    },
    Placement {
        kind: EventKind,
        object: Placement,
    },
    Decision {
        kind: EventKind,
        object: PlacementDecision,
    },
    Artifact {
        kind: EventKind,
        object: ManifestWork,
    },
    Binding {
        scope: ScopeName,
        bound: bool,
    },
}
