mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_ioc::*;
use common::*;
use parking_lot::Mutex;

fn dependent(name: &str, dependency: &str, log: &Log) -> ComponentDescriptor {
    ComponentDescriptor::builder(name)
        .class(tracked_class(name, log))
        .property("dependency", ValueSpec::reference(dependency))
        .build()
}

#[tokio::test]
async fn test_dependents_are_destroyed_first() {
    let log = log();
    let container = Container::new(|registry| {
        registry
            .register(dependent("a", "b", &log))
            .register(dependent("b", "c", &log))
            .register(component("c", tracked_class("c", &log)));
    })
    .unwrap();

    container.get("a").await.unwrap();
    assert_eq!(container.singleton_count().await.unwrap(), 3);

    container.destroy_all().await.unwrap();
    assert_eq!(entries(&log, "destroy"), vec!["destroy:a", "destroy:b", "destroy:c"]);
    assert_eq!(container.singleton_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_destroy_all_is_idempotent() {
    let log = log();
    let container = Container::new(|registry| {
        registry.register(component("a", tracked_class("a", &log)));
    })
    .unwrap();

    container.get("a").await.unwrap();
    container.destroy_all().await.unwrap();
    container.destroy_all().await.unwrap();
    assert_eq!(entries(&log, "destroy"), vec!["destroy:a"]);

    // A destroyed singleton is created again on demand.
    container.get("a").await.unwrap();
    assert_eq!(entries(&log, "new"), vec!["new:a", "new:a"]);
}

#[tokio::test]
async fn test_destroy_failures_are_collected() {
    let log = log();
    let container = Container::new(|registry| {
        registry
            .register(component("first", broken_class("first", &log)))
            .register(component("healthy", tracked_class("healthy", &log)))
            .register(component("second", broken_class("second", &log)));
    })
    .unwrap();
    container.pre_instantiate_singletons().await.unwrap();

    match container.destroy_all().await {
        Err(Error::Destruction(failures)) => {
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["second", "first"]);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(
        entries(&log, "destroy"),
        vec!["destroy:second", "destroy:healthy", "destroy:first"]
    );
    assert_eq!(container.singleton_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_init_callbacks_run_in_order_once() {
    let log = log();
    let container = Container::new(|registry| {
        registry
            .register(
                ComponentDescriptor::builder("custom")
                    .class(tracked_class("custom", &log))
                    .init_method("custom_init")
                    .build(),
            )
            .register(
                ComponentDescriptor::builder("same")
                    .class(tracked_class("same", &log))
                    .init_method(INITIALIZING_METHOD)
                    .build(),
            );
    })
    .unwrap();

    container.get("custom").await.unwrap();
    container.get("same").await.unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "new:custom",
            "init:custom",
            "custom_init:custom",
            "new:same",
            "init:same",
        ]
    );
}

#[tokio::test]
async fn test_destroy_method_runs_after_dispose_callback() {
    let log = log();
    let container = Container::new(|registry| {
        registry
            .register(
                ComponentDescriptor::builder("closing")
                    .class(tracked_class("closing", &log))
                    .destroy_method("close")
                    .build(),
            )
            .register(
                ComponentDescriptor::builder("same")
                    .class(tracked_class("same", &log))
                    .destroy_method(DISPOSABLE_METHOD)
                    .build(),
            );
    })
    .unwrap();
    container.pre_instantiate_singletons().await.unwrap();
    container.destroy_all().await.unwrap();

    let shutdown: Vec<String> = log
        .lock()
        .iter()
        .filter(|e| e.starts_with("destroy") || e.starts_with("close"))
        .cloned()
        .collect();
    assert_eq!(shutdown, vec!["destroy:same", "destroy:closing", "close:closing"]);
}

#[tokio::test]
async fn test_unknown_init_method_fails_initialization() {
    let log = log();
    let container = Container::new(|registry| {
        registry.register(
            ComponentDescriptor::builder("a")
                .class(tracked_class("a", &log))
                .init_method("missing")
                .build(),
        );
    })
    .unwrap();

    match container.get("a").await {
        Err(Error::Initialization { name, cause }) => {
            assert_eq!(name, "a");
            assert!(cause.to_string().contains("missing"));
        }
        other => panic!("unexpected result: {:?}", other.map(|i| i.type_key())),
    }
    assert!(!container.is_in_creation("a").await.unwrap());
}

#[tokio::test]
async fn test_prototypes_get_no_destroy_callback() {
    let log = log();
    let container = Container::new(|registry| {
        registry.register(
            ComponentDescriptor::builder("a")
                .class(tracked_class("a", &log))
                .prototype()
                .build(),
        );
    })
    .unwrap();

    container.get("a").await.unwrap();
    container.get("a").await.unwrap();
    container.destroy_all().await.unwrap();

    assert_eq!(entries(&log, "init"), vec!["init:a", "init:a"]);
    assert!(entries(&log, "destroy").is_empty());
}

/// Replaces the named component with a fresh object after initialization.
struct Replace(&'static str);

#[async_trait]
impl PostProcessor for Replace {
    async fn after_initialization(&self, instance: Instance, name: &str) -> anyhow::Result<Instance> {
        if name == self.0 {
            Ok(Instance::new(Left::default()))
        } else {
            Ok(instance)
        }
    }
}

/// Counts every component passing through initialization.
struct CountInitialized(Arc<AtomicUsize>);

#[async_trait]
impl PostProcessor for CountInitialized {
    async fn before_initialization(&self, instance: Instance, _name: &str) -> anyhow::Result<Instance> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(instance)
    }
}

#[tokio::test]
async fn test_wrapping_an_early_referenced_component_fails() {
    let container = Container::new(|registry| {
        registry.post_processor(Replace("left"));
        for descriptor in property_cycle() {
            registry.register(descriptor);
        }
    })
    .unwrap();

    match container.get("left").await {
        Err(Error::RawReferenceInjected { name }) => assert_eq!(name, "left"),
        other => panic!("unexpected result: {:?}", other.map(|i| i.type_key())),
    }
}

#[tokio::test]
async fn test_raw_injection_despite_wrapping_when_allowed() {
    let initialized = Arc::new(AtomicUsize::new(0));
    let container = Container::new(|registry| {
        registry
            .config(ContainerConfig {
                allow_raw_injection_despite_wrapping: true,
                ..Default::default()
            })
            .post_processor(CountInitialized(initialized.clone()))
            .post_processor(Replace("left"));
        for descriptor in property_cycle() {
            registry.register(descriptor);
        }
    })
    .unwrap();

    let left: Arc<Left> = container.get_as("left").await.unwrap();
    let right: Arc<Right> = container.get_as("right").await.unwrap();

    // The replacement never had its properties populated.
    assert!(left.right.lock().is_none());
    let raw = right.left.lock().clone().unwrap();
    assert!(!Arc::ptr_eq(&raw, &left));
    assert_eq!(initialized.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_initialization_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new(|registry| {
        registry.register(component("flaky", flaky_class(&calls, 1, Duration::ZERO)));
    })
    .unwrap();

    match container.get("flaky").await {
        Err(Error::Construction {
            failure: ConstructionFailure::Threw(cause),
            ..
        }) => assert_eq!(cause.to_string(), "flaky failure #1"),
        other => panic!("unexpected result: {:?}", other.map(|i| i.type_key())),
    }
    let first = container.get("flaky").await.unwrap();
    assert!(container.get("flaky").await.unwrap().ptr_eq(&first));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_permanent_failure_after_max_attempts() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new(|registry| {
        registry
            .config(ContainerConfig {
                max_creation_attempts: Some(2),
                ..Default::default()
            })
            .register(component("flaky", flaky_class(&calls, usize::MAX, Duration::ZERO)));
    })
    .unwrap();

    assert!(matches!(container.get("flaky").await, Err(Error::Construction { .. })));
    assert!(matches!(container.get("flaky").await, Err(Error::Construction { .. })));
    match container.get("flaky").await {
        Err(Error::PermanentlyFailed { name, attempts, .. }) => {
            assert_eq!(name, "flaky");
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected result: {:?}", other.map(|i| i.type_key())),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_destroy_method_on_factory_method_products() {
    let log = log();
    let made = {
        let log = log.clone();
        tracked_builder("made", &log, Duration::ZERO)
            .factory_method("make", vec![], move |_| {
                Ok(Tracked {
                    label: "made".to_string(),
                    log: log.clone(),
                    dependency: Mutex::new(None),
                })
            })
            .build()
    };
    let foreign = ComponentClass::builder::<Radio>()
        .factory_method("engine", vec![], |_| Ok(Engine { cylinders: 2 }))
        .build();
    let container = Container::new(|registry| {
        registry
            .register(
                ComponentDescriptor::builder("made")
                    .class(made)
                    .factory_method("make")
                    .destroy_method("close")
                    .build(),
            )
            .register(
                ComponentDescriptor::builder("foreign")
                    .class(foreign)
                    .factory_method("engine")
                    .destroy_method("close")
                    .build(),
            );
    })
    .unwrap();
    container.pre_instantiate_singletons().await.unwrap();

    // Products of the declaring class get its callbacks; other products
    // have no schema to call a destroy method through.
    container.destroy_all().await.unwrap();
    let shutdown: Vec<String> = log
        .lock()
        .iter()
        .filter(|e| e.starts_with("destroy") || e.starts_with("close"))
        .cloned()
        .collect();
    assert_eq!(shutdown, vec!["destroy:made", "close:made"]);
}
