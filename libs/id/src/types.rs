//! Typed name definitions and the source reconciliation key.

use crate::define_name;
use crate::{validate_name, NameError};

// =============================================================================
// Destinations and Scopes
// =============================================================================

define_name!(DestinationName, "destination");
define_name!(ScopeName, "scope");

// =============================================================================
// Source Key
// =============================================================================

/// Prefix of every name derived from a source key.
pub const DERIVED_PREFIX: &str = "deployment-";

/// Reconciliation key of a source object: `{namespace}/{name}`.
///
/// Source edits, selection edits and artifact edits for the same source object
/// all map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    namespace: String,
    name: String,
}

impl SourceKey {
    /// Creates a key from validated components.
    pub fn new(namespace: &str, name: &str) -> Result<Self, NameError> {
        validate_name("namespace", namespace)?;
        validate_name("name", name)?;
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Parses a key in the `{namespace}/{name}` format.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() {
            return Err(NameError::Empty { kind: "key" });
        }

        let Some((namespace, name)) = s.split_once('/') else {
            return Err(NameError::MissingSeparator(s.to_string()));
        };

        Self::new(namespace, name)
    }

    /// Returns the namespace component.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name shared by the placement request and every derived artifact.
    #[must_use]
    pub fn derived_name(&self) -> String {
        format!("{DERIVED_PREFIX}{}-{}", self.namespace, self.name)
    }

    /// Recovers a key from a derived name.
    ///
    /// The namespace is everything up to the first `-` after the prefix.
    pub fn from_derived_name(derived: &str) -> Result<Self, NameError> {
        let Some(rest) = derived.strip_prefix(DERIVED_PREFIX) else {
            return Err(NameError::MissingPrefix {
                expected: DERIVED_PREFIX,
                actual: derived.to_string(),
            });
        };

        let Some((namespace, name)) = rest.split_once('-') else {
            return Err(NameError::InvalidFormat {
                message: format!("derived name '{derived}' has no name component"),
            });
        };

        Self::new(namespace, name)
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for SourceKey {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for SourceKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for SourceKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
