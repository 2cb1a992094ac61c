//! The shared-instance lifecycle registry
//!
//! `SingletonRegistry` is the single entry point collaborators use to
//! obtain, register, and destroy named shared instances. It owns the
//! coarse singleton lock that serializes all construction attempts: the
//! lock is reentrant so a factory may construct further instances through
//! the registry without deadlocking, which is what makes circular
//! references resolvable at all.

use parking_lot::{Mutex, ReentrantMutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::cache::{EarlyFactory, InstanceCache, SharedInstance};
use crate::creation::CreationTracker;
use crate::error::{BoxError, RegistryError, Result};
use crate::graph::{AliasResolver, DependencyGraph};
use crate::lifecycle::{Disposable, DisposableRegistry};

/// Maximum number of suppressed exceptions preserved per creation attempt
const SUPPRESSED_EXCEPTIONS_LIMIT: usize = 100;

/// Process-wide registry of shared instances keyed by identifier.
///
/// Multiple registries can coexist; each is fully self-contained and safe
/// to share across threads behind an `Arc`.
pub struct SingletonRegistry {
    cache: InstanceCache,
    tracker: CreationTracker,
    graph: DependencyGraph,
    disposables: DisposableRegistry,
    /// The singleton lock. Held across the whole of `get_or_create`,
    /// including the factory call, so at most one construction attempt
    /// runs at a time and early-reference synthesis is race-free.
    lock: ReentrantMutex<()>,
    /// Suppressed exceptions for the creation attempt currently in flight
    suppressed: Mutex<Option<Vec<BoxError>>>,
    in_destruction: AtomicBool,
}

impl SingletonRegistry {
    /// Create a registry whose identifiers are taken at face value
    pub fn new() -> Self {
        Self::with_alias_resolver(|id: &str| id.to_string())
    }

    /// Create a registry that canonicalizes identifiers through the given
    /// alias resolver before every dependency-graph mutation or query
    pub fn with_alias_resolver<F>(resolver: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let canonical: Arc<AliasResolver> = Arc::new(resolver);
        Self {
            cache: InstanceCache::new(),
            tracker: CreationTracker::new(),
            graph: DependencyGraph::new(canonical),
            disposables: DisposableRegistry::new(),
            lock: ReentrantMutex::new(()),
            suppressed: Mutex::new(None),
            in_destruction: AtomicBool::new(false),
        }
    }

    // ---- creation ------------------------------------------------------

    /// Return the instance registered under `id`, constructing it with
    /// `factory` if absent.
    ///
    /// The whole call runs under the singleton lock; callers must treat it
    /// as potentially blocking and must not hold locks a constructor might
    /// need. A factory may signal that the instance appeared through a
    /// side channel by failing with [`RegistryError::ImplicitlyRegistered`],
    /// in which case the cached instance is adopted.
    pub fn get_or_create<F>(&self, id: &str, factory: F) -> Result<SharedInstance>
    where
        F: FnOnce() -> std::result::Result<SharedInstance, BoxError>,
    {
        let _guard = self.lock.lock();
        if let Some(existing) = self.cache.lookup(id) {
            trace!("returning existing shared instance '{}'", id);
            return Ok(existing);
        }
        if self.in_destruction.load(Ordering::SeqCst) {
            return Err(RegistryError::NotAllowedInTeardown { id: id.to_string() });
        }
        debug!("creating shared instance '{}'", id);
        self.tracker.begin_creation(id)?;
        let owns_scope = {
            let mut scope = self.suppressed.lock();
            if scope.is_none() {
                *scope = Some(Vec::new());
                true
            } else {
                false
            }
        };

        let outcome = factory();
        let resolved = self.resolve_outcome(id, outcome, owns_scope);

        if owns_scope {
            *self.suppressed.lock() = None;
        }
        let unmarked = self.tracker.end_creation(id);

        match resolved {
            Ok((instance, newly_created)) => {
                unmarked?;
                if newly_created {
                    self.cache.commit(id, instance.clone());
                }
                Ok(instance)
            }
            Err(err) => {
                if let Err(state_err) = unmarked {
                    warn!("inconsistent creation state for '{}': {}", id, state_err);
                }
                Err(err)
            }
        }
    }

    /// Map a factory outcome to (instance, newly-created) or a final error
    fn resolve_outcome(
        &self,
        id: &str,
        outcome: std::result::Result<SharedInstance, BoxError>,
        owns_scope: bool,
    ) -> Result<(SharedInstance, bool)> {
        let err = match outcome {
            Ok(instance) => return Ok((instance, true)),
            Err(err) => err,
        };
        match err.downcast::<RegistryError>() {
            Ok(registry_err) => match *registry_err {
                RegistryError::ImplicitlyRegistered { .. } => match self.cache.lookup(id) {
                    // The instance did appear in the meantime; adopt it
                    // without committing a second time.
                    Some(existing) => Ok((existing, false)),
                    None => Err(RegistryError::ImplicitlyRegistered { id: id.to_string() }),
                },
                RegistryError::CreationFailed {
                    id: failed_id,
                    cause,
                    mut suppressed,
                } => {
                    if owns_scope {
                        if let Some(collected) = self.suppressed.lock().as_mut() {
                            suppressed.extend(collected.drain(..));
                        }
                    }
                    Err(RegistryError::CreationFailed {
                        id: failed_id,
                        cause,
                        suppressed,
                    })
                }
                other => Err(other),
            },
            Err(factory_err) => {
                let suppressed = if owns_scope {
                    self.suppressed.lock().take().unwrap_or_default()
                } else {
                    Vec::new()
                };
                Err(RegistryError::CreationFailed {
                    id: id.to_string(),
                    cause: factory_err,
                    suppressed,
                })
            }
        }
    }

    /// Register an eagerly available instance under `id`
    pub fn register_singleton(&self, id: &str, instance: SharedInstance) -> Result<()> {
        let _guard = self.lock.lock();
        self.cache.register(id, instance)?;
        debug!("registered shared instance '{}'", id);
        Ok(())
    }

    /// Store a deferred early-reference producer for an identifier whose
    /// construction is (or is about to be) in progress
    pub fn add_pending_factory(&self, id: &str, factory: EarlyFactory) {
        let _guard = self.lock.lock();
        self.cache.add_pending_factory(id, factory);
    }

    /// Look up `id`, allowing an early reference to a currently-created
    /// instance to resolve a circular reference
    pub fn get_singleton(&self, id: &str) -> Option<SharedInstance> {
        self.get_singleton_with(id, true)
    }

    /// Look up `id`. With `allow_early_synthesis`, a pending factory may
    /// be invoked (once) to synthesize an early reference; without it only
    /// finished instances and already-synthesized early references are
    /// returned.
    pub fn get_singleton_with(&self, id: &str, allow_early_synthesis: bool) -> Option<SharedInstance> {
        // Cheap probes first: the finished tier is lock-free and the
        // in-creation set never blocks.
        if let Some(found) = self.cache.lookup(id) {
            return Some(found);
        }
        if !self.tracker.is_currently_in_creation(id) {
            return None;
        }
        if let Some(early) = self.cache.early_reference(id) {
            return Some(early);
        }
        if !allow_early_synthesis {
            return None;
        }
        // Synthesis must happen under the singleton lock; the cache
        // re-reads the finished and early tiers once the lock is held.
        let _guard = self.lock.lock();
        self.cache.resolve_early(id)
    }

    /// Record an exception observed during the creation attempt currently
    /// in flight, up to a limit of 100; silently dropped beyond the cap or
    /// when no attempt is active
    pub fn on_suppressed_exception(&self, err: BoxError) {
        let _guard = self.lock.lock();
        let mut scope = self.suppressed.lock();
        if let Some(collected) = scope.as_mut() {
            if collected.len() < SUPPRESSED_EXCEPTIONS_LIMIT {
                collected.push(err);
            }
        }
    }

    // ---- introspection -------------------------------------------------

    /// Whether a finished instance exists for `id`
    pub fn contains_singleton(&self, id: &str) -> bool {
        self.cache.contains(id)
    }

    /// All registered identifiers in first-registration order
    pub fn singleton_names(&self) -> Vec<String> {
        self.cache.identifiers()
    }

    pub fn singleton_count(&self) -> usize {
        self.cache.count()
    }

    /// Whether `id` counts as in creation for cycle checks
    pub fn is_currently_in_creation(&self, id: &str) -> bool {
        self.tracker.is_currently_in_creation(id)
    }

    /// Raw membership in the in-creation set, ignoring exclusions
    pub fn is_singleton_currently_in_creation(&self, id: &str) -> bool {
        self.tracker.is_in_creation(id)
    }

    /// Toggle cycle guarding for `id`; passing `false` exempts it from
    /// reentrant-creation checks
    pub fn set_currently_in_creation(&self, id: &str, in_creation: bool) {
        self.tracker.set_excluded(id, !in_creation);
    }

    /// Run `f` while holding the exact lock that guards singleton
    /// creation.
    ///
    /// Collaborators performing an extended multi-step construction phase
    /// must synchronize here and never introduce a lock of their own
    /// around singleton creation, to avoid deadlocks.
    pub fn with_singleton_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();
        f()
    }

    // ---- dependencies --------------------------------------------------

    /// Record that `dependent_id` depends on `dependency_id`; the
    /// dependent will be destroyed before its dependency
    pub fn register_dependent(&self, dependency_id: &str, dependent_id: &str) {
        self.graph.register_dependency(dependency_id, dependent_id);
    }

    /// Record that `outer_id` contains `inner_id`; destroying the outer
    /// cascades to the inner
    pub fn register_contained(&self, inner_id: &str, outer_id: &str) {
        self.graph.register_containment(inner_id, outer_id);
    }

    /// Whether `candidate_id` depends on `id`, directly or transitively
    pub fn is_dependent(&self, id: &str, candidate_id: &str) -> bool {
        self.graph.is_dependent(id, candidate_id)
    }

    pub fn has_dependents(&self, id: &str) -> bool {
        self.graph.has_dependents(id)
    }

    /// Identifiers directly depending on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.graph.dependents_of(id)
    }

    /// Identifiers `id` directly depends on
    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.graph.dependencies_of(id)
    }

    // ---- teardown ------------------------------------------------------

    /// Register a teardown action for `id`, run when the identifier or the
    /// whole registry is destroyed
    pub fn register_disposable(&self, id: &str, disposable: Box<dyn Disposable>) {
        self.disposables.register(id, disposable);
    }

    /// Destroy every registered disposable in reverse registration order,
    /// then clear all caches and relations.
    ///
    /// Creation attempts entering after this starts fail with
    /// [`RegistryError::NotAllowedInTeardown`]. Individual teardown
    /// failures are logged and never interrupt the rest of the shutdown.
    pub fn destroy_singletons(&self) {
        trace!("destroying all shared instances");
        {
            let _guard = self.lock.lock();
            self.in_destruction.store(true, Ordering::SeqCst);
        }

        let names = self.disposables.names();
        for id in names.iter().rev() {
            self.destroy_singleton(id);
        }

        self.graph.clear();

        let _guard = self.lock.lock();
        self.cache.clear();
        self.in_destruction.store(false, Ordering::SeqCst);
    }

    /// Destroy one identifier: its dependents first, then its own teardown
    /// action, then everything it contains. Safe to call repeatedly.
    pub fn destroy_singleton(&self, id: &str) {
        {
            let _guard = self.lock.lock();
            self.cache.remove(id);
        }
        let disposable = self.disposables.take(id);
        self.destroy_instance(id, disposable);
    }

    fn destroy_instance(&self, id: &str, disposable: Option<Box<dyn Disposable>>) {
        // Dependents may still hold references to this instance, so they
        // die first. Taking the edge set also guarantees termination on a
        // cyclic relation.
        let dependents = self.graph.take_dependents(id);
        if !dependents.is_empty() {
            trace!("destroying dependents of '{}': {:?}", id, dependents);
            for dependent in &dependents {
                self.destroy_singleton(dependent);
            }
        }

        if let Some(mut disposable) = disposable {
            match catch_unwind(AssertUnwindSafe(|| disposable.dispose())) {
                Ok(Ok(())) => trace!("destroyed shared instance '{}'", id),
                Ok(Err(err)) => warn!("destruction of '{}' failed: {}", id, err),
                Err(_) => warn!("destruction of '{}' panicked", id),
            }
        }

        for contained in self.graph.take_contained(id) {
            self.destroy_singleton(&contained);
        }

        self.graph.forget(id);
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}
