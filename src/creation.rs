//! In-creation tracking for cycle detection
//!
//! Both sets are concurrent so that `is_currently_in_creation` reads never
//! block a thread that is busy constructing.

use dashmap::DashSet;
use tracing::trace;

use crate::error::{RegistryError, Result};

/// Tracks which identifiers are mid-construction and which are exempt from
/// reentrancy checks
pub(crate) struct CreationTracker {
    in_creation: DashSet<String>,
    exclusions: DashSet<String>,
}

impl CreationTracker {
    pub(crate) fn new() -> Self {
        Self {
            in_creation: DashSet::new(),
            exclusions: DashSet::new(),
        }
    }

    /// Mark an identifier as in creation. Fails with `CurrentlyInCreation`
    /// if it already is, unless it has been excluded from the check.
    pub(crate) fn begin_creation(&self, id: &str) -> Result<()> {
        if self.exclusions.contains(id) {
            return Ok(());
        }
        if !self.in_creation.insert(id.to_string()) {
            return Err(RegistryError::CurrentlyInCreation { id: id.to_string() });
        }
        trace!("'{}' entered creation", id);
        Ok(())
    }

    /// Unmark an identifier. Failing to find the mark is a programming
    /// error in a collaborator and surfaces as `NotInCreation`.
    pub(crate) fn end_creation(&self, id: &str) -> Result<()> {
        if self.exclusions.contains(id) {
            return Ok(());
        }
        if self.in_creation.remove(id).is_none() {
            return Err(RegistryError::NotInCreation { id: id.to_string() });
        }
        trace!("'{}' left creation", id);
        Ok(())
    }

    /// Raw membership in the in-creation set, ignoring exclusions
    pub(crate) fn is_in_creation(&self, id: &str) -> bool {
        self.in_creation.contains(id)
    }

    /// Whether the identifier counts as in creation for cycle checks
    pub(crate) fn is_currently_in_creation(&self, id: &str) -> bool {
        !self.exclusions.contains(id) && self.in_creation.contains(id)
    }

    /// Toggle whether reentrancy guarding applies to the identifier
    pub(crate) fn set_excluded(&self, id: &str, excluded: bool) {
        if excluded {
            self.exclusions.insert(id.to_string());
        } else {
            self.exclusions.remove(id);
        }
    }
}
