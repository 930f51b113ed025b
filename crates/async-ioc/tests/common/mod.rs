#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_ioc::*;
use parking_lot::Mutex;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log, prefix: &str) -> Vec<String> {
    log.lock()
        .iter()
        .filter(|e| e.starts_with(prefix))
        .cloned()
        .collect()
}

pub trait Part: Send + Sync {
    fn part_name(&self) -> &'static str;
}

pub struct Engine {
    pub cylinders: i64,
}

impl Part for Engine {
    fn part_name(&self) -> &'static str {
        "engine"
    }
}

pub struct Wheel;

impl Part for Wheel {
    fn part_name(&self) -> &'static str {
        "wheel"
    }
}

pub struct Radio;

pub struct Car {
    pub engine: Arc<Engine>,
}

pub fn engine_class(cylinders: i64) -> Arc<ComponentClass> {
    ComponentClass::builder::<Engine>()
        .constructor(vec![], move |_| Ok(Engine { cylinders }))
        .alias::<dyn Part, _>(|e| e as Arc<dyn Part>)
        .build()
}

pub fn wheel_class() -> Arc<ComponentClass> {
    ComponentClass::builder::<Wheel>()
        .constructor(vec![], |_| Ok(Wheel))
        .alias::<dyn Part, _>(|w| w as Arc<dyn Part>)
        .build()
}

pub fn radio_class() -> Arc<ComponentClass> {
    ComponentClass::builder::<Radio>()
        .constructor(vec![], |_| Ok(Radio))
        .build()
}

pub fn car_class() -> Arc<ComponentClass> {
    ComponentClass::builder::<Car>()
        .constructor(
            vec![Parameter::new("engine", DeclaredType::component::<Engine>())],
            |args| {
                Ok(Car {
                    engine: args.instance::<Engine>(0)?,
                })
            },
        )
        .build()
}

pub fn component(name: &str, class: Arc<ComponentClass>) -> ComponentDescriptor {
    ComponentDescriptor::builder(name).class(class).build()
}

/// Two components wired to each other through properties.
#[derive(Default)]
pub struct Left {
    pub right: Mutex<Option<Arc<Right>>>,
}

#[derive(Default)]
pub struct Right {
    pub left: Mutex<Option<Arc<Left>>>,
}

pub fn left_class() -> Arc<ComponentClass> {
    ComponentClass::builder::<Left>()
        .constructor(vec![], |_| Ok(Left::default()))
        .property("right", DeclaredType::component::<Right>(), |left, value| {
            *left.right.lock() = Some(as_instance::<Right>(&value)?);
            Ok(())
        })
        .build()
}

pub fn right_class() -> Arc<ComponentClass> {
    ComponentClass::builder::<Right>()
        .constructor(vec![], |_| Ok(Right::default()))
        .property("left", DeclaredType::component::<Left>(), |right, value| {
            *right.left.lock() = Some(as_instance::<Left>(&value)?);
            Ok(())
        })
        .build()
}

pub fn property_cycle() -> Vec<ComponentDescriptor> {
    vec![
        ComponentDescriptor::builder("left")
            .class(left_class())
            .property("right", ValueSpec::reference("right"))
            .build(),
        ComponentDescriptor::builder("right")
            .class(right_class())
            .property("left", ValueSpec::reference("left"))
            .build(),
    ]
}

/// Two components requiring each other as constructor arguments.
pub struct Chicken {
    pub egg: Arc<Egg>,
}

pub struct Egg {
    pub chicken: Arc<Chicken>,
}

pub fn constructor_cycle() -> Vec<ComponentDescriptor> {
    let chicken = ComponentClass::builder::<Chicken>()
        .constructor(
            vec![Parameter::new("egg", DeclaredType::component::<Egg>())],
            |args| Ok(Chicken { egg: args.instance(0)? }),
        )
        .build();
    let egg = ComponentClass::builder::<Egg>()
        .constructor(
            vec![Parameter::new("chicken", DeclaredType::component::<Chicken>())],
            |args| {
                Ok(Egg {
                    chicken: args.instance(0)?,
                })
            },
        )
        .build();
    vec![component("chicken", chicken), component("egg", egg)]
}

/// Records every lifecycle callback into a shared log.
pub struct Tracked {
    pub label: String,
    pub log: Log,
    pub dependency: Mutex<Option<Arc<Tracked>>>,
}

impl Tracked {
    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", event, self.label));
    }
}

pub fn tracked_class(label: &str, log: &Log) -> Arc<ComponentClass> {
    tracked_builder(label, log, Duration::ZERO).build()
}

/// Schema of [`Tracked`], whose constructor takes `delay` to run.
pub fn tracked_builder(label: &str, log: &Log, delay: Duration) -> ClassBuilder<Tracked> {
    let label = label.to_string();
    let log = log.clone();
    ComponentClass::builder::<Tracked>()
        .constructor(vec![], move |_| {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let tracked = Tracked {
                label: label.clone(),
                log: log.clone(),
                dependency: Mutex::new(None),
            };
            tracked.record("new");
            Ok(tracked)
        })
        .property("dependency", DeclaredType::component::<Tracked>(), |t, value| {
            *t.dependency.lock() = Some(as_instance::<Tracked>(&value)?);
            Ok(())
        })
        .initializing(|t| {
            t.record("init");
            Ok(())
        })
        .method("custom_init", |t| {
            t.record("custom_init");
            Ok(())
        })
        .disposable(|t| {
            t.record("destroy");
            Ok(())
        })
        .method("close", |t| {
            t.record("close");
            Ok(())
        })
}

pub struct Broken {
    pub label: String,
}

/// A component whose dispose callback always fails.
pub fn broken_class(label: &str, log: &Log) -> Arc<ComponentClass> {
    let label = label.to_string();
    let log = log.clone();
    ComponentClass::builder::<Broken>()
        .constructor(vec![], move |_| Ok(Broken { label: label.clone() }))
        .disposable(move |b| {
            log.lock().push(format!("destroy:{}", b.label));
            bail!("{} refused to shut down", b.label)
        })
        .build()
}

pub struct Counter {
    pub value: AtomicI64,
}

impl Counter {
    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub fn counter_class() -> Arc<ComponentClass> {
    ComponentClass::builder::<Counter>()
        .constructor(vec![], |_| {
            Ok(Counter {
                value: AtomicI64::new(0),
            })
        })
        .build()
}

pub struct Flaky;

/// Fails the first `failures` constructions, counting every call.
pub fn flaky_class(calls: &Arc<AtomicUsize>, failures: usize, delay: Duration) -> Arc<ComponentClass> {
    let calls = calls.clone();
    ComponentClass::builder::<Flaky>()
        .constructor(vec![], move |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if call <= failures {
                bail!("flaky failure #{}", call)
            }
            Ok(Flaky)
        })
        .build()
}

/// A factory component producing engines with as many cylinders as it has
/// been asked for engines so far, plus its configured base.
pub struct EngineWorks {
    pub base: Mutex<i64>,
    pub produced: AtomicI64,
    pub car: Mutex<Option<Arc<Car>>>,
}

pub fn engine_works_class(shared: bool) -> Arc<ComponentClass> {
    ComponentClass::builder::<EngineWorks>()
        .constructor(vec![], |_| {
            Ok(EngineWorks {
                base: Mutex::new(0),
                produced: AtomicI64::new(0),
                car: Mutex::new(None),
            })
        })
        .property("base", DeclaredType::Int, |w, value| {
            *w.base.lock() = as_int(&value)?;
            Ok(())
        })
        .property("car", DeclaredType::component::<Car>(), |w, value| {
            *w.car.lock() = Some(as_instance::<Car>(&value)?);
            Ok(())
        })
        .produces(shared, |w| {
            let produced = w.produced.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Engine {
                cylinders: *w.base.lock() + produced,
            })
        })
        .build()
}
