//! Reconciliation loop primitives.
//!
//! This library provides the pure pieces of the fleetsplit pipeline:
//!
//! - **Partitioning**: splitting a replica count across an ordered list of
//!   destinations ([`partition`]).
//! - **Rendering**: turning a source manifest into canonical, byte-stable
//!   payloads ([`manifest`]).
//! - **Retry pacing**: capped exponential backoff for failed keys
//!   ([`BackoffPolicy`]).
//!
//! # Invariants
//!
//! - All operations are deterministic given the same inputs
//! - Rendered payloads are byte-identical for equal inputs, so existing
//!   artifacts can be compared with plain byte equality
//! - Shares always sum to the requested total

pub mod backoff;
pub mod manifest;
pub mod partition;

use sha2::{Digest, Sha256};

pub use backoff::BackoffPolicy;
pub use manifest::{Manifest, RenderError};
pub use partition::{partition, Share};

/// Outcome of applying one artifact to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The artifact did not exist and was created.
    Created,

    /// The artifact existed with a different payload and was updated.
    Updated,

    /// The artifact already carried the rendered payload; nothing was written.
    Unchanged,
}

impl ApplyOutcome {
    /// Returns true if a write was issued.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// A payload digest for logging and quick comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadDigest(String);

impl PayloadDigest {
    /// Compute a digest over rendered manifests, in order.
    pub fn of_manifests(manifests: &[Manifest]) -> Self {
        let mut hasher = Sha256::new();
        for manifest in manifests {
            hasher.update((manifest.raw().len() as u64).to_be_bytes());
            hasher.update(manifest.raw());
        }
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Get the digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte equality over two rendered manifest lists.
pub fn manifests_equal(new: &[Manifest], old: &[Manifest]) -> bool {
    new.len() == old.len() && new.iter().zip(old).all(|(a, b)| a.raw() == b.raw())
}
