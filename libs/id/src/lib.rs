//! # fleetsplit-id
//!
//! Validated names and reconciliation keys for fleetsplit.
//!
//! ## Design Principles
//!
//! - Source objects are addressed by a [`SourceKey`] (`{namespace}/{name}`)
//! - Every derived object (placement request, artifact) has a name computed
//!   from the source key, so the key can be recovered from the derived name
//! - Destination and scope names are typed to prevent mixing them up
//!
//! ## Derived Name Format
//!
//! Derived names use the prefixed format `deployment-{namespace}-{name}`.
//!
//! Examples:
//! - `default/web` -> `deployment-default-web`
//! - `shop/cart-api` -> `deployment-shop-cart-api`
//!
//! Because both components may contain `-`, recovering the key from the name
//! alone assumes the namespace has no `-`. Callers that observed the source
//! object should prefer their own index over [`SourceKey::from_derived_name`].

mod error;
mod macros;
mod types;

pub use error::NameError;
pub use macros::{validate_name, MAX_NAME_LEN};
pub use types::*;
