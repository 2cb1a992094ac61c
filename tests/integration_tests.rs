//! Integration tests for the shared-instance lifecycle registry

use singleton_registry::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct Token;

fn logging_disposable(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Box<dyn Disposable> {
    let log = log.clone();
    let name = name.to_string();
    Box::new(move || -> Result<()> {
        log.lock().unwrap().push(name.clone());
        Ok(())
    })
}

#[test]
fn test_concurrent_callers_observe_one_instance() {
    let registry = Arc::new(SingletonRegistry::new());
    let factory_calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let factory_calls = factory_calls.clone();
        handles.push(thread::spawn(move || {
            registry
                .get_or_create("shared", || {
                    factory_calls.fetch_add(1, Ordering::SeqCst);
                    // Stay in the factory long enough for every other
                    // thread to pile up on the singleton lock.
                    thread::sleep(Duration::from_millis(20));
                    Ok(Arc::new(Token))
                })
                .unwrap()
        }));
    }

    let instances: Vec<SharedInstance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
    for pair in instances.windows(2) {
        assert!(Arc::ptr_eq(&pair[0], &pair[1]));
    }
}

#[test]
fn test_circular_reference_resolved_by_early_references() {
    let registry = Arc::new(SingletonRegistry::new());
    let a_saw_b = Arc::new(AtomicBool::new(false));
    let b_saw_a = Arc::new(AtomicBool::new(false));

    let outer = registry.clone();
    let a_saw = a_saw_b.clone();
    let b_saw = b_saw_a.clone();
    registry
        .get_or_create("a", move || {
            outer.add_pending_factory("a", Box::new(|| Arc::new("partial a".to_string()) as SharedInstance));

            let inner = outer.clone();
            let b_saw = b_saw.clone();
            let b = outer.get_or_create("b", move || {
                // B needs A while A is still mid-construction; the early
                // reference breaks the cycle.
                let early_a = inner.get_singleton("a");
                b_saw.store(early_a.is_some(), Ordering::SeqCst);
                inner.register_dependent("a", "b");
                Ok(Arc::new("instance b".to_string()))
            })?;
            a_saw.store(b.downcast_ref::<String>().is_some(), Ordering::SeqCst);

            Ok(Arc::new("instance a".to_string()))
        })
        .unwrap();

    assert!(a_saw_b.load(Ordering::SeqCst));
    assert!(b_saw_a.load(Ordering::SeqCst));
    assert!(registry.contains_singleton("a"));
    assert!(registry.contains_singleton("b"));

    // The committed instance replaces the early reference.
    let a = registry.get_singleton("a").unwrap();
    assert_eq!(a.downcast_ref::<String>().unwrap(), "instance a");
}

#[test]
fn test_self_cycle_without_early_reference_is_rejected() {
    let registry = Arc::new(SingletonRegistry::new());

    let inner = registry.clone();
    let err = registry
        .get_or_create("a", move || {
            inner
                .get_or_create("a", || Ok(Arc::new(Token)))
                .map_err(Into::into)
        })
        .unwrap_err();

    assert!(matches!(err, RegistryError::CurrentlyInCreation { id } if id == "a"));
    assert!(!registry.contains_singleton("a"));
    assert!(!registry.is_currently_in_creation("a"));
}

#[test]
fn test_early_reference_synthesis_is_opt_in() {
    let registry = Arc::new(SingletonRegistry::new());

    let inner = registry.clone();
    registry
        .get_or_create("a", move || {
            inner.add_pending_factory("a", Box::new(|| Arc::new(1u32) as SharedInstance));

            // Full-reference mode must not synthesize anything.
            assert!(inner.get_singleton_with("a", false).is_none());

            let early = inner.get_singleton_with("a", true).unwrap();
            assert_eq!(*early.downcast_ref::<u32>().unwrap(), 1);

            // Once synthesized, the early reference is visible without
            // synthesis too.
            assert!(inner.get_singleton_with("a", false).is_some());

            Ok(Arc::new(2u32))
        })
        .unwrap();

    let committed = registry.get_singleton("a").unwrap();
    assert_eq!(*committed.downcast_ref::<u32>().unwrap(), 2);
}

#[test]
fn test_destroy_singleton_is_idempotent() {
    let registry = SingletonRegistry::new();
    let disposals = Arc::new(AtomicUsize::new(0));

    registry.register_singleton("db", Arc::new(Token)).unwrap();
    let counter = disposals.clone();
    registry.register_disposable(
        "db",
        Box::new(move || -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    registry.destroy_singleton("db");
    registry.destroy_singleton("db");

    assert_eq!(disposals.load(Ordering::SeqCst), 1);
    assert!(!registry.contains_singleton("db"));
}

#[test]
fn test_dependents_destroyed_before_their_dependency() {
    let registry = SingletonRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry.register_singleton("db", Arc::new(Token)).unwrap();
    registry.register_singleton("cache", Arc::new(Token)).unwrap();
    registry.register_disposable("db", logging_disposable(&log, "db"));
    registry.register_disposable("cache", logging_disposable(&log, "cache"));
    registry.register_dependent("db", "cache");

    registry.destroy_singleton("db");

    assert_eq!(*log.lock().unwrap(), vec!["cache", "db"]);
    assert!(!registry.contains_singleton("cache"));
}

#[test]
fn test_default_teardown_is_reverse_registration_order() {
    let registry = SingletonRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b", "c"] {
        registry.register_singleton(name, Arc::new(Token)).unwrap();
        registry.register_disposable(name, logging_disposable(&log, name));
    }

    registry.destroy_singletons();

    assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
    assert_eq!(registry.singleton_count(), 0);
}

#[test]
fn test_teardown_failure_does_not_stop_shutdown() {
    let registry = SingletonRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry.register_singleton("flaky", Arc::new(Token)).unwrap();
    registry.register_disposable(
        "flaky",
        Box::new(move || -> Result<()> {
            Err(RegistryError::NotInCreation { id: "flaky".into() })
        }),
    );
    registry.register_singleton("solid", Arc::new(Token)).unwrap();
    registry.register_disposable("solid", logging_disposable(&log, "solid"));

    registry.destroy_singletons();

    assert_eq!(*log.lock().unwrap(), vec!["solid"]);
    assert_eq!(registry.singleton_count(), 0);
}

#[test]
fn test_suppressed_exceptions_capped_at_one_hundred() {
    let registry = Arc::new(SingletonRegistry::new());

    let inner = registry.clone();
    let err = registry
        .get_or_create("x", move || {
            for i in 0..150 {
                inner.on_suppressed_exception(format!("suppressed cause {i}").into());
            }
            Err("construction exploded".into())
        })
        .unwrap_err();

    match err {
        RegistryError::CreationFailed { id, suppressed, .. } => {
            assert_eq!(id, "x");
            assert_eq!(suppressed.len(), 100);
        }
        other => panic!("expected CreationFailed, got {other:?}"),
    }
}

#[test]
fn test_creation_rejected_during_teardown() {
    let registry = Arc::new(SingletonRegistry::new());

    registry.register_singleton("db", Arc::new(Token)).unwrap();
    let blocked = Arc::new(AtomicBool::new(false));
    let inner = registry.clone();
    let saw_rejection = blocked.clone();
    registry.register_disposable(
        "db",
        Box::new(move || -> Result<()> {
            // Requesting an instance from inside a destroy callback must
            // fail fast.
            let result = inner.get_or_create("late", || Ok(Arc::new(Token)));
            saw_rejection.store(
                matches!(result, Err(RegistryError::NotAllowedInTeardown { .. })),
                Ordering::SeqCst,
            );
            Ok(())
        }),
    );

    registry.destroy_singletons();
    assert!(blocked.load(Ordering::SeqCst));

    // Once teardown completes the registry is usable again.
    registry
        .get_or_create("late", || Ok(Arc::new(Token)))
        .unwrap();
    assert!(registry.contains_singleton("late"));
}

#[test]
fn test_dependency_bookkeeping_survives_failed_creation() {
    let registry = Arc::new(SingletonRegistry::new());

    let inner = registry.clone();
    let err = registry
        .get_or_create("web", move || {
            inner.register_dependent("db", "web");
            Err("wiring failed".into())
        })
        .unwrap_err();

    assert!(matches!(err, RegistryError::CreationFailed { .. }));
    // No partial instance is visible, but the edge registered by the
    // partially-run factory remains.
    assert!(!registry.contains_singleton("web"));
    assert_eq!(registry.dependents_of("db"), vec!["web"]);
    assert!(registry.is_dependent("db", "web"));
}

#[test]
fn test_containment_cascades_destruction() {
    let registry = SingletonRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    registry.register_singleton("outer", Arc::new(Token)).unwrap();
    registry.register_singleton("inner", Arc::new(Token)).unwrap();
    registry.register_disposable("outer", logging_disposable(&log, "outer"));
    registry.register_disposable("inner", logging_disposable(&log, "inner"));
    registry.register_contained("inner", "outer");

    // Destroying the inner instance takes the containing outer with it
    // first: the outer depends on what it contains.
    registry.destroy_singleton("inner");

    assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
}
