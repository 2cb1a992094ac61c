//! Shared-instance lifecycle registry
//!
//! This crate provides the storage and coordination layer underneath a
//! dependency-injection runtime: process-wide single instances keyed by
//! name, created at most once each, shared by every caller, and destroyed
//! in reverse dependency order.
//!
//! The registry does not decide what to construct or how to wire it; an
//! external construction strategy supplies a factory per identifier. What
//! the registry guarantees is the hard part: at-most-one instance per
//! identifier under concurrency, safe exposure of partially constructed
//! instances to break legitimate creation cycles, and teardown that always
//! destroys dependents before their dependencies.

pub mod cache;
pub mod creation;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod registry;

pub use cache::{EarlyFactory, SharedInstance};
pub use error::{BoxError, RegistryError, Result};
pub use lifecycle::Disposable;
pub use registry::SingletonRegistry;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        BoxError, Disposable, EarlyFactory, RegistryError, Result, SharedInstance,
        SingletonRegistry,
    };
}
