//! Capability schema of a component type: everything the container would
//! otherwise discover through reflection (constructors, factory methods,
//! writable properties, callbacks) declared ahead of time.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::types::{DeclaredType, Instance, TypeInfo, TypeKey};
use crate::value::{Args, Value};

/// Method name under which the initializing callback is known.
pub const INITIALIZING_METHOD: &str = "after_properties_set";
/// Method name under which the disposable callback is known.
pub const DISPOSABLE_METHOD: &str = "destroy";
/// Prefix asking for a factory component itself instead of its product.
pub const FACTORY_PREFIX: char = '&';

type Invoker = Arc<dyn Fn(Option<&Instance>, Args) -> anyhow::Result<Instance> + Send + Sync>;
type Setter = Arc<dyn Fn(&Instance, Value) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type Callback = Arc<dyn Fn(&Instance) -> anyhow::Result<()> + Send + Sync>;
type Produce = Arc<dyn Fn(&Instance) -> anyhow::Result<Instance> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: DeclaredType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: DeclaredType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A constructor or factory method.
#[derive(Clone)]
pub struct Executable {
    name: String,
    params: Vec<Parameter>,
    returns: Arc<TypeInfo>,
    invoke: Invoker,
}

impl Executable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn returns(&self) -> &Arc<TypeInfo> {
        &self.returns
    }

    pub(crate) fn object_like_params(&self) -> usize {
        self.params.iter().filter(|p| p.ty.is_object_like()).count()
    }

    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }

    pub(crate) fn invoke(&self, target: Option<&Instance>, args: Args) -> anyhow::Result<Instance> {
        (self.invoke)(target, args)
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Autowired {
    pub required: bool,
    pub eager: bool,
}

#[derive(Clone)]
pub struct Property {
    name: String,
    ty: DeclaredType,
    autowired: Option<Autowired>,
    set: Setter,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &DeclaredType {
        &self.ty
    }

    pub fn autowired(&self) -> Option<Autowired> {
        self.autowired
    }

    pub(crate) fn set(&self, target: &Instance, value: Value) -> anyhow::Result<()> {
        (self.set)(target, value)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("autowired", &self.autowired)
            .finish()
    }
}

/// Makes a component a factory: its name yields what it produces.
#[derive(Clone)]
pub(crate) struct Producer {
    product: Arc<TypeInfo>,
    singleton: bool,
    produce: Produce,
}

impl Producer {
    pub fn product(&self) -> &Arc<TypeInfo> {
        &self.product
    }

    /// Whether a singleton factory's product is cached.
    pub fn is_singleton(&self) -> bool {
        self.singleton
    }

    pub fn produce(&self, factory: &Instance) -> anyhow::Result<Instance> {
        (self.produce)(factory)
    }
}

pub struct ComponentClass {
    type_info: Arc<TypeInfo>,
    constructors: Vec<Executable>,
    factory_methods: Vec<Executable>,
    instance_factory_methods: Vec<Executable>,
    properties: Vec<Property>,
    methods: BTreeMap<String, Callback>,
    initializing: Option<Callback>,
    disposable: Option<Callback>,
    producer: Option<Producer>,
    type_bindings: Arc<BTreeMap<&'static str, DeclaredType>>,
}

impl ComponentClass {
    pub fn builder<T: Send + Sync + 'static>() -> ClassBuilder<T> {
        ClassBuilder {
            type_info: TypeInfo::of::<T>(),
            constructors: Vec::new(),
            factory_methods: Vec::new(),
            instance_factory_methods: Vec::new(),
            properties: Vec::new(),
            methods: BTreeMap::new(),
            initializing: None,
            disposable: None,
            producer: None,
            type_bindings: BTreeMap::new(),
            _p: PhantomData,
        }
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_info.key()
    }

    pub(crate) fn shared_type_info(&self) -> Arc<TypeInfo> {
        self.type_info.clone()
    }

    pub fn constructors(&self) -> &[Executable] {
        &self.constructors
    }

    pub fn factory_methods(&self, name: &str) -> Vec<Executable> {
        self.factory_methods
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    pub fn instance_factory_methods(&self, name: &str) -> Vec<Executable> {
        self.instance_factory_methods
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub(crate) fn method(&self, name: &str) -> Option<&Callback> {
        self.methods.get(name)
    }

    pub(crate) fn initializing(&self) -> Option<&Callback> {
        self.initializing.as_ref()
    }

    pub(crate) fn disposable(&self) -> Option<&Callback> {
        self.disposable.as_ref()
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing.is_some()
    }

    pub fn is_disposable(&self) -> bool {
        self.disposable.is_some()
    }

    pub fn is_factory(&self) -> bool {
        self.producer.is_some()
    }

    /// Type of what a factory component produces.
    pub fn product_type(&self) -> Option<Arc<TypeInfo>> {
        self.producer.as_ref().map(|p| p.product.clone())
    }

    pub(crate) fn producer(&self) -> Option<&Producer> {
        self.producer.as_ref()
    }

    pub fn type_bindings(&self) -> &Arc<BTreeMap<&'static str, DeclaredType>> {
        &self.type_bindings
    }
}

impl fmt::Debug for ComponentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentClass")
            .field("type", &self.type_info.key())
            .field("constructors", &self.constructors)
            .field("factory_methods", &self.factory_methods)
            .field("properties", &self.properties)
            .field("produces", &self.producer.as_ref().map(|p| p.product.key()))
            .finish()
    }
}

pub struct ClassBuilder<T> {
    type_info: TypeInfo,
    constructors: Vec<Executable>,
    factory_methods: Vec<Executable>,
    instance_factory_methods: Vec<Executable>,
    properties: Vec<Property>,
    methods: BTreeMap<String, Callback>,
    initializing: Option<Callback>,
    disposable: Option<Callback>,
    producer: Option<Producer>,
    type_bindings: BTreeMap<&'static str, DeclaredType>,
    _p: PhantomData<fn() -> T>,
}

impl<T> ClassBuilder<T>
where
    T: Send + Sync + 'static,
{
    pub fn constructor<F>(mut self, params: Vec<Parameter>, f: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let name = short_name(std::any::type_name::<T>()).to_string();
        self.constructors.push(Executable {
            name,
            params,
            returns: Arc::new(TypeInfo::of::<T>()),
            invoke: Arc::new(move |_, args| f(args).map(Instance::new)),
        });
        self
    }

    /// A static factory method producing components of type `R`.
    pub fn factory_method<R, F>(mut self, name: &str, params: Vec<Parameter>, f: F) -> Self
    where
        R: Send + Sync + 'static,
        F: Fn(Args) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.factory_methods.push(Executable {
            name: name.to_string(),
            params,
            returns: Arc::new(TypeInfo::of::<R>()),
            invoke: Arc::new(move |_, args| f(args).map(Instance::new)),
        });
        self
    }

    /// A factory method invoked on a component of this class.
    pub fn instance_factory_method<R, F>(mut self, name: &str, params: Vec<Parameter>, f: F) -> Self
    where
        R: Send + Sync + 'static,
        F: Fn(&T, Args) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.instance_factory_methods.push(Executable {
            name: name.to_string(),
            params,
            returns: Arc::new(TypeInfo::of::<R>()),
            invoke: Arc::new(move |target, args| {
                let target = target
                    .and_then(|t| t.downcast::<T>())
                    .ok_or_else(|| anyhow!("factory component is not a '{}'", std::any::type_name::<T>()))?;
                f(&target, args).map(Instance::new)
            }),
        });
        self
    }

    pub fn property<F>(self, name: &str, ty: DeclaredType, f: F) -> Self
    where
        F: Fn(&T, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push_property(name, ty, None, f)
    }

    /// A property injected by type even without an explicit value.
    pub fn autowired_property<F>(self, name: &str, ty: DeclaredType, autowired: Autowired, f: F) -> Self
    where
        F: Fn(&T, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push_property(name, ty, Some(autowired), f)
    }

    fn push_property<F>(mut self, name: &str, ty: DeclaredType, autowired: Option<Autowired>, f: F) -> Self
    where
        F: Fn(&T, Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.properties.retain(|p| p.name != name);
        self.properties.push(Property {
            name: name.to_string(),
            ty,
            autowired,
            set: Arc::new(move |target, value| {
                let target = downcast_target::<T>(target)?;
                f(&target, value)
            }),
        });
        self
    }

    /// A named method usable as custom init or destroy method.
    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), callback(f));
        self
    }

    /// The afterPropertiesSet-style callback, also reachable as
    /// [`INITIALIZING_METHOD`].
    pub fn initializing<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.initializing = Some(callback(f));
        self
    }

    /// The dispose callback, also reachable as [`DISPOSABLE_METHOD`].
    pub fn disposable<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.disposable = Some(callback(f));
        self
    }

    /// Turns components of this class into factories of `R`. Looking one up
    /// by name returns its product; prefix the name with [`FACTORY_PREFIX`]
    /// to get the factory. Products of a singleton factory are cached when
    /// `singleton` is set.
    pub fn produces<R, F>(mut self, singleton: bool, f: F) -> Self
    where
        R: Send + Sync + 'static,
        F: Fn(&T) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.producer = Some(Producer {
            product: Arc::new(TypeInfo::of::<R>()),
            singleton,
            produce: Arc::new(move |factory| {
                let factory = downcast_target::<T>(factory)?;
                f(&factory).map(Instance::new)
            }),
        });
        self
    }

    pub fn alias<A, F>(mut self, cast: F) -> Self
    where
        A: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<A> + Send + Sync + 'static,
    {
        self.type_info = self.type_info.alias::<T, A, F>(cast);
        self
    }

    pub fn bind_type_variable(mut self, variable: &'static str, ty: DeclaredType) -> Self {
        self.type_bindings.insert(variable, ty);
        self
    }

    pub fn build(self) -> Arc<ComponentClass> {
        let mut methods = self.methods;
        if let Some(init) = &self.initializing {
            methods.entry(INITIALIZING_METHOD.to_string()).or_insert_with(|| init.clone());
        }
        if let Some(dispose) = &self.disposable {
            methods.entry(DISPOSABLE_METHOD.to_string()).or_insert_with(|| dispose.clone());
        }
        Arc::new(ComponentClass {
            type_info: Arc::new(self.type_info),
            constructors: self.constructors,
            factory_methods: self.factory_methods,
            instance_factory_methods: self.instance_factory_methods,
            properties: self.properties,
            methods,
            initializing: self.initializing,
            disposable: self.disposable,
            producer: self.producer,
            type_bindings: Arc::new(self.type_bindings),
        })
    }
}

fn callback<T, F>(f: F) -> Callback
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |target| {
        let target = downcast_target::<T>(target)?;
        f(&target)
    })
}

fn downcast_target<T: Send + Sync + 'static>(target: &Instance) -> anyhow::Result<Arc<T>> {
    target
        .downcast::<T>()
        .ok_or_else(|| anyhow!("component is not a '{}'", std::any::type_name::<T>()))
}

fn short_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Gauge {
        level: Mutex<i64>,
    }

    #[test]
    fn setters_and_callbacks_reach_the_concrete_type() {
        let class = ComponentClass::builder::<Gauge>()
            .constructor(vec![], |_| Ok(Gauge { level: Mutex::new(0) }))
            .property("level", DeclaredType::Int, |g, value| {
                *g.level.lock() = crate::value::as_int(&value)?;
                Ok(())
            })
            .initializing(|g| {
                *g.level.lock() += 1;
                Ok(())
            })
            .build();

        let gauge = class.constructors()[0].invoke(None, Args::default()).unwrap();
        class.property("level").unwrap().set(&gauge, Value::Int(41)).unwrap();
        let init = class.initializing().unwrap();
        init(&gauge).unwrap();
        assert_eq!(*gauge.downcast::<Gauge>().unwrap().level.lock(), 42);

        let other = Instance::new(7u8);
        assert!(class.property("level").unwrap().set(&other, Value::Int(1)).is_err());
        assert!(init(&other).is_err());
    }
}
