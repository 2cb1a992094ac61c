//! Error types for the singleton registry

use thiserror::Error;

/// Boxed error used for factory failures and suppressed causes
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for registry results
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while creating or managing shared instances
#[derive(Error, Debug)]
pub enum RegistryError {
    /// An instance is already registered under the identifier
    #[error("an instance is already registered under '{id}'")]
    AlreadyRegistered {
        /// Identifier that already has a committed instance
        id: String,
    },

    /// The identifier is already being constructed on the current path,
    /// i.e. an unresolvable circular reference
    #[error("'{id}' is currently in creation: is there an unresolvable circular reference?")]
    CurrentlyInCreation {
        /// Identifier whose construction was reentered
        id: String,
    },

    /// Creation was requested while the registry is destroying its
    /// instances (do not request an instance from a destroy callback)
    #[error("creation of '{id}' is not allowed while the registry is in teardown")]
    NotAllowedInTeardown {
        /// Identifier whose creation was rejected
        id: String,
    },

    /// Defensive check: an identifier was reported as finished that was
    /// never marked in-creation
    #[error("'{id}' is not currently in creation")]
    NotInCreation {
        /// Identifier with inconsistent creation state
        id: String,
    },

    /// A factory signals that the instance already appeared through a side
    /// channel; the creation protocol re-checks the cache and adopts the
    /// instance if it is there
    #[error("instance '{id}' was produced outside the current creation attempt")]
    ImplicitlyRegistered {
        /// Identifier the factory reported as already produced
        id: String,
    },

    /// The supplied factory failed; any exceptions suppressed during the
    /// same attempt are attached as related causes
    #[error("creation of shared instance '{id}' failed: {cause}")]
    CreationFailed {
        /// Identifier whose construction failed
        id: String,
        /// The factory failure
        cause: BoxError,
        /// Related causes collected while the attempt was in flight
        suppressed: Vec<BoxError>,
    },
}
