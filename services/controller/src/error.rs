//! Error taxonomy for the reconciliation pipeline.
//!
//! - Not-found on read is never an error; stores return `Ok(None)`.
//! - Store failures are transient and retried through the queue.
//! - Malformed keys, malformed sources and render failures are fatal for the
//!   current inputs and are not retried.
//! - So is an object already owned by a different source; the key stays
//!   broken until one of the two sources is renamed.

use fleetsplit_id::NameError;
use fleetsplit_reconcile::RenderError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for reconciliation passes.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors returned by the backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name} was modified: expected version {expected}, found {actual}")]
    Conflict {
        kind: &'static str,
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if the object did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// A store failure attributed to one destination.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{destination}: {source}")]
pub struct DestinationError {
    pub destination: String,
    #[source]
    pub source: StoreError,
}

/// Failures collected across destinations during one pass.
#[derive(Debug, Error, Clone, Default, PartialEq, Eq)]
pub struct AggregateError {
    errors: Vec<DestinationError>,
}

impl AggregateError {
    pub fn push(&mut self, destination: impl Into<String>, source: StoreError) {
        self.errors.push(DestinationError {
            destination: destination.into(),
            source,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[DestinationError] {
        &self.errors
    }

    /// Destinations that failed, in the order they failed.
    pub fn destinations(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.destination.as_str()).collect()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let [single] = self.errors.as_slice() {
            return write!(f, "{single}");
        }
        write!(f, "[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, "]")
    }
}

/// Errors from applying one artifact.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("artifact {name} in {destination} belongs to source {owner}")]
    Owned {
        destination: String,
        name: String,
        owner: String,
    },
}

/// Errors that end a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid reconciliation key: {0}")]
    InvalidKey(#[from] NameError),

    #[error("cannot render {key}: {source}")]
    Render {
        key: String,
        #[source]
        source: RenderError,
    },

    #[error("invalid source {key}: {message}")]
    InvalidSource { key: String, message: String },

    #[error("{key} collides with another source: {message}")]
    Conflict { key: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed destinations: {0}")]
    Destinations(#[from] AggregateError),

    #[error("reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    /// Returns true if retrying with the same inputs may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Destinations(_))
    }
}
