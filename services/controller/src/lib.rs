//! fleetsplit controller library.
//!
//! This crate primarily ships the `fleetsplit` binary, but we expose the
//! pipeline pieces to enable integration testing and reuse.
//!
//! ## Pipeline
//!
//! For every source key the splitter runs, in order:
//!
//! 1. `resolver`: load the destinations chosen for the source
//! 2. `fleetsplit_reconcile::partition`: split the replica count
//! 3. `fleetsplit_reconcile::manifest`: render one payload per destination
//! 4. `apply`: get-or-create / compare-and-update each artifact
//! 5. `cleaner`: delete artifacts of destinations no longer selected
//!
//! Keys come from the `router` module, are deduplicated by the `queue`, and
//! are processed by the worker pool in `controller`.

pub mod apply;
pub mod cleaner;
pub mod config;
pub mod controller;
pub mod error;
pub mod manager;
pub mod model;
pub mod propagator;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod splitter;
pub mod store;
