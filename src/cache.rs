//! Three-tier shared instance cache
//!
//! Finished instances live in a concurrent map so the hot read path never
//! takes a lock. The transient tiers used to break circular references
//! (pending early-reference factories and the early references they
//! produce) share one tagged entry per identifier, which makes the tiers
//! mutually exclusive by construction.

use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

use crate::error::{RegistryError, Result};

/// A fully constructed (or partially constructed, for early references)
/// shared instance
pub type SharedInstance = Arc<dyn Any + Send + Sync>;

/// Deferred producer of an early reference for an identifier still in
/// creation
pub type EarlyFactory = Box<dyn FnOnce() -> SharedInstance + Send>;

/// State an identifier can be in before and after creation completes
enum Entry {
    /// A factory able to synthesize an early reference on demand
    PendingFactory(EarlyFactory),
    /// A partially constructed instance exposed to break a cycle
    Early(SharedInstance),
    /// The committed instance
    Finished(SharedInstance),
}

struct CacheState {
    entries: FxHashMap<String, Entry>,
    /// Identifiers in first-registration order
    order: Vec<String>,
}

/// Storage for shared instances keyed by identifier
pub(crate) struct InstanceCache {
    /// Mirror of the `Finished` tier; reads here never block
    finished: DashMap<String, SharedInstance>,
    state: Mutex<CacheState>,
}

impl InstanceCache {
    pub(crate) fn new() -> Self {
        Self {
            finished: DashMap::new(),
            state: Mutex::new(CacheState {
                entries: FxHashMap::default(),
                order: Vec::new(),
            }),
        }
    }

    /// Register a finished instance, failing if the identifier already has
    /// one. Clears any pending factory or early reference for it.
    pub(crate) fn register(&self, id: &str, instance: SharedInstance) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(state.entries.get(id), Some(Entry::Finished(_))) {
            return Err(RegistryError::AlreadyRegistered { id: id.to_string() });
        }
        Self::commit_locked(&mut state, &self.finished, id, instance);
        Ok(())
    }

    /// Commit a freshly constructed instance without the pre-registration
    /// check; used by the creation protocol after a successful factory run.
    pub(crate) fn commit(&self, id: &str, instance: SharedInstance) {
        let mut state = self.state.lock();
        Self::commit_locked(&mut state, &self.finished, id, instance);
    }

    fn commit_locked(
        state: &mut CacheState,
        finished: &DashMap<String, SharedInstance>,
        id: &str,
        instance: SharedInstance,
    ) {
        state
            .entries
            .insert(id.to_string(), Entry::Finished(instance.clone()));
        finished.insert(id.to_string(), instance);
        if !state.order.iter().any(|x| x == id) {
            state.order.push(id.to_string());
        }
        trace!("committed shared instance '{}'", id);
    }

    /// Look up a finished instance; never blocks on the creation lock and
    /// never triggers construction
    pub(crate) fn lookup(&self, id: &str) -> Option<SharedInstance> {
        self.finished.get(id).map(|entry| entry.value().clone())
    }

    /// Whether a finished instance exists for the identifier
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.finished.contains_key(id)
    }

    /// Remove every trace of the identifier; idempotent
    pub(crate) fn remove(&self, id: &str) {
        let mut state = self.state.lock();
        state.entries.remove(id);
        self.finished.remove(id);
        state.order.retain(|x| x != id);
    }

    /// All registered identifiers in first-registration order, including
    /// those that only have a pending factory or early reference so far
    pub(crate) fn identifiers(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Store a deferred early-reference producer. A no-op if the identifier
    /// already has a finished instance; displaces an existing early
    /// reference otherwise.
    pub(crate) fn add_pending_factory(&self, id: &str, factory: EarlyFactory) {
        let mut state = self.state.lock();
        if matches!(state.entries.get(id), Some(Entry::Finished(_))) {
            return;
        }
        state
            .entries
            .insert(id.to_string(), Entry::PendingFactory(factory));
        if !state.order.iter().any(|x| x == id) {
            state.order.push(id.to_string());
        }
    }

    /// Read the early reference for an identifier without synthesizing one
    pub(crate) fn early_reference(&self, id: &str) -> Option<SharedInstance> {
        let state = self.state.lock();
        match state.entries.get(id) {
            Some(Entry::Early(instance)) | Some(Entry::Finished(instance)) => {
                Some(instance.clone())
            }
            _ => None,
        }
    }

    /// Resolve an early reference, synthesizing it from a pending factory
    /// if necessary.
    ///
    /// Callers must hold the registry's singleton lock so that two threads
    /// cannot synthesize two different early references for the same
    /// identifier. The finished and early tiers are re-read here even
    /// though callers pre-check them: another thread may have completed
    /// full construction between the unsynchronized probe and lock
    /// acquisition.
    pub(crate) fn resolve_early(&self, id: &str) -> Option<SharedInstance> {
        let pending = {
            let mut state = self.state.lock();
            match state.entries.remove(id) {
                Some(Entry::Finished(instance)) => {
                    let found = instance.clone();
                    state.entries.insert(id.to_string(), Entry::Finished(instance));
                    return Some(found);
                }
                Some(Entry::Early(instance)) => {
                    let found = instance.clone();
                    state.entries.insert(id.to_string(), Entry::Early(instance));
                    return Some(found);
                }
                Some(Entry::PendingFactory(factory)) => factory,
                None => return None,
            }
        };
        // The inner mutex is released while the factory runs so it may call
        // back into the cache; the singleton lock still serializes us.
        let early = pending();
        let mut state = self.state.lock();
        state
            .entries
            .insert(id.to_string(), Entry::Early(early.clone()));
        trace!("synthesized early reference for '{}'", id);
        Some(early)
    }

    /// Drop every identifier and instance; used by full teardown
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        self.finished.clear();
    }
}
