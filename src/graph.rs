//! Dependency and containment relation between identifiers
//!
//! Edges are stored bidirectionally for O(1) lookup in both directions.
//! Each map has its own lock: edge registration is logically independent
//! from instance creation, so it never contends on the creation lock.
//! Value vectors act as insertion-ordered sets; duplicate inserts are
//! no-ops.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::trace;

/// Resolves an identifier that may be an alias to its canonical form.
/// Supplied by an external alias registry; defaults to identity.
pub type AliasResolver = dyn Fn(&str) -> String + Send + Sync;

/// Records who-depends-on-whom and who-contains-whom, and answers
/// reachability queries used to order destruction
pub(crate) struct DependencyGraph {
    /// id -> identifiers that depend on it
    dependents: Mutex<FxHashMap<String, Vec<String>>>,
    /// id -> identifiers it depends on
    dependencies: Mutex<FxHashMap<String, Vec<String>>>,
    /// outer id -> identifiers it contains
    contained: Mutex<FxHashMap<String, Vec<String>>>,
    canonical: Arc<AliasResolver>,
}

fn insert_ordered(set: &mut Vec<String>, value: &str) -> bool {
    if set.iter().any(|x| x == value) {
        return false;
    }
    set.push(value.to_string());
    true
}

impl DependencyGraph {
    pub(crate) fn new(canonical: Arc<AliasResolver>) -> Self {
        Self {
            dependents: Mutex::new(FxHashMap::default()),
            dependencies: Mutex::new(FxHashMap::default()),
            contained: Mutex::new(FxHashMap::default()),
            canonical,
        }
    }

    /// Record that `dependent_id` depends on `dependency_id`, so the
    /// dependent must be destroyed first. Idempotent.
    pub(crate) fn register_dependency(&self, dependency_id: &str, dependent_id: &str) {
        let canonical = (self.canonical)(dependency_id);
        {
            let mut dependents = self.dependents.lock();
            let entry = dependents.entry(canonical.clone()).or_default();
            if !insert_ordered(entry, dependent_id) {
                return;
            }
        }
        let mut dependencies = self.dependencies.lock();
        let entry = dependencies.entry(dependent_id.to_string()).or_default();
        insert_ordered(entry, &canonical);
        trace!("registered dependency '{}' -> '{}'", canonical, dependent_id);
    }

    /// Record that `outer_id` contains `inner_id`; destroying the outer
    /// cascades to the inner. Also registers the outer as a dependent of
    /// the inner for destruction-order purposes.
    pub(crate) fn register_containment(&self, inner_id: &str, outer_id: &str) {
        {
            let mut contained = self.contained.lock();
            let entry = contained.entry(outer_id.to_string()).or_default();
            if !insert_ordered(entry, inner_id) {
                return;
            }
        }
        self.register_dependency(inner_id, outer_id);
    }

    /// Whether `candidate_id` depends on `id`, directly or transitively
    pub(crate) fn is_dependent(&self, id: &str, candidate_id: &str) -> bool {
        let dependents = self.dependents.lock();
        let mut seen = FxHashSet::default();
        self.is_dependent_inner(&dependents, id, candidate_id, &mut seen)
    }

    fn is_dependent_inner(
        &self,
        dependents: &FxHashMap<String, Vec<String>>,
        id: &str,
        candidate_id: &str,
        seen: &mut FxHashSet<String>,
    ) -> bool {
        // The visited set bounds the traversal even if the relation
        // accidentally contains a cycle.
        if !seen.insert(id.to_string()) {
            return false;
        }
        let canonical = (self.canonical)(id);
        let Some(direct) = dependents.get(&canonical) else {
            return false;
        };
        if direct.iter().any(|d| d == candidate_id) {
            return true;
        }
        direct
            .iter()
            .any(|transitive| self.is_dependent_inner(dependents, transitive, candidate_id, seen))
    }

    /// Identifiers directly depending on `id`, in registration order
    pub(crate) fn dependents_of(&self, id: &str) -> Vec<String> {
        self.dependents.lock().get(id).cloned().unwrap_or_default()
    }

    /// Identifiers that `id` directly depends on, in registration order
    pub(crate) fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.dependencies
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn has_dependents(&self, id: &str) -> bool {
        self.dependents.lock().contains_key(id)
    }

    /// Detach and return the dependents of `id`; destruction consumes the
    /// edge set so recursing over a cyclic relation terminates
    pub(crate) fn take_dependents(&self, id: &str) -> Vec<String> {
        self.dependents.lock().remove(id).unwrap_or_default()
    }

    /// Detach and return the identifiers contained by `id`
    pub(crate) fn take_contained(&self, id: &str) -> Vec<String> {
        self.contained.lock().remove(id).unwrap_or_default()
    }

    /// Remove `id` from both maps' keys and from every edge set it appears
    /// in
    pub(crate) fn forget(&self, id: &str) {
        {
            let mut dependents = self.dependents.lock();
            dependents.remove(id);
            dependents.retain(|_, set| {
                set.retain(|x| x != id);
                !set.is_empty()
            });
        }
        let mut dependencies = self.dependencies.lock();
        dependencies.remove(id);
        dependencies.retain(|_, set| {
            set.retain(|x| x != id);
            !set.is_empty()
        });
    }

    /// Drop all recorded relations; used by full teardown
    pub(crate) fn clear(&self) {
        self.contained.lock().clear();
        self.dependents.lock().clear();
        self.dependencies.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DependencyGraph {
        DependencyGraph::new(Arc::new(|id: &str| id.to_string()))
    }

    #[test]
    fn test_edges_are_bidirectional() {
        let g = graph();
        g.register_dependency("db", "cache");

        assert_eq!(g.dependents_of("db"), vec!["cache"]);
        assert_eq!(g.dependencies_of("cache"), vec!["db"]);
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let g = graph();
        g.register_dependency("db", "cache");
        g.register_dependency("db", "cache");

        assert_eq!(g.dependents_of("db").len(), 1);
        assert_eq!(g.dependencies_of("cache").len(), 1);
    }

    #[test]
    fn test_transitive_dependents() {
        let g = graph();
        g.register_dependency("db", "cache");
        g.register_dependency("cache", "web");

        assert!(g.is_dependent("db", "cache"));
        assert!(g.is_dependent("db", "web"));
        assert!(!g.is_dependent("web", "db"));
    }

    #[test]
    fn test_cyclic_relation_terminates() {
        let g = graph();
        g.register_dependency("a", "b");
        g.register_dependency("b", "a");

        assert!(g.is_dependent("a", "b"));
        assert!(g.is_dependent("b", "a"));
        assert!(!g.is_dependent("a", "missing"));
    }

    #[test]
    fn test_containment_implies_dependency() {
        let g = graph();
        g.register_containment("inner", "outer");

        assert_eq!(g.take_contained("outer"), vec!["inner"]);
        assert!(g.is_dependent("inner", "outer"));
    }

    #[test]
    fn test_forget_strips_edge_sets() {
        let g = graph();
        g.register_dependency("db", "cache");
        g.register_dependency("db", "web");
        g.register_dependency("cache", "web");

        g.forget("web");
        assert_eq!(g.dependents_of("db"), vec!["cache"]);
        assert!(!g.has_dependents("cache"));
        assert!(g.dependencies_of("web").is_empty());
    }

    #[test]
    fn test_aliases_are_canonicalized() {
        let g = DependencyGraph::new(Arc::new(|id: &str| {
            if id == "database" {
                "db".to_string()
            } else {
                id.to_string()
            }
        }));
        g.register_dependency("database", "cache");

        assert_eq!(g.dependents_of("db"), vec!["cache"]);
        assert!(g.is_dependent("database", "cache"));
    }
}
