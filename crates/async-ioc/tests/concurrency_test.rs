mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_ioc::*;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_creation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new(|registry| {
        registry.register(component("slow", flaky_class(&calls, 0, Duration::from_millis(100))));
    })
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let container = container.clone();
            tokio::spawn(async move { container.get("slow").await })
        })
        .collect();
    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.unwrap().unwrap());
    }

    assert!(instances.iter().all(|i| i.ptr_eq(&instances[0])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_share_one_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new(|registry| {
        registry.register(component("slow", flaky_class(&calls, 1, Duration::from_millis(200))));
    })
    .unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let container = container.clone();
            tokio::spawn(async move { container.get("slow").await })
        })
        .collect();
    for handle in handles {
        match handle.await.unwrap() {
            Err(Error::Construction {
                failure: ConstructionFailure::Threw(cause),
                ..
            }) => assert_eq!(cause.to_string(), "flaky failure #1"),
            other => panic!("unexpected result: {:?}", other.map(|i| i.type_key())),
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The failure is not cached.
    container.get("slow").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cycle_across_requests_does_not_deadlock() {
    for _ in 0..20 {
        let container = Container::new(|registry| {
            for descriptor in property_cycle() {
                registry.register(descriptor);
            }
        })
        .unwrap();

        let left = {
            let container = container.clone();
            tokio::spawn(async move { container.get_as::<Left>("left").await })
        };
        let right = {
            let container = container.clone();
            tokio::spawn(async move { container.get_as::<Right>("right").await })
        };

        let (left, right) = tokio::time::timeout(Duration::from_secs(5), async {
            (left.await.unwrap().unwrap(), right.await.unwrap().unwrap())
        })
        .await
        .expect("creation deadlocked");

        assert!(Arc::ptr_eq(left.right.lock().as_ref().unwrap(), &right));
        assert!(Arc::ptr_eq(right.left.lock().as_ref().unwrap(), &left));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_different_names_are_created_in_parallel() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new(|registry| {
        for i in 0..4 {
            registry.register(component(&format!("slow{}", i), flaky_class(&calls, 0, Duration::from_millis(150))));
        }
    })
    .unwrap();

    let started = std::time::Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let container = container.clone();
            tokio::spawn(async move { container.get(&format!("slow{}", i)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() < Duration::from_millis(550));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependent_built_on_a_fresh_singleton_is_destroyed_first() {
    for _ in 0..20 {
        let log = log();
        let container = Container::new(|registry| {
            registry
                .register(component(
                    "base",
                    tracked_builder("base", &log, Duration::from_millis(30)).build(),
                ))
                .register(
                    ComponentDescriptor::builder("dependent")
                        .class(tracked_class("dependent", &log))
                        .property("dependency", ValueSpec::reference("base"))
                        .build(),
                );
        })
        .unwrap();

        let base = {
            let container = container.clone();
            tokio::spawn(async move { container.get("base").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let dependent = {
            let container = container.clone();
            tokio::spawn(async move { container.get("dependent").await })
        };
        base.await.unwrap().unwrap();
        dependent.await.unwrap().unwrap();

        container.destroy_all().await.unwrap();
        assert_eq!(entries(&log, "destroy"), vec!["destroy:dependent", "destroy:base"]);
    }
}
