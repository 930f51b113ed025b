mod class;
pub use class::{
    Autowired, ClassBuilder, ComponentClass, Executable, Parameter, Property, DISPOSABLE_METHOD, FACTORY_PREFIX,
    INITIALIZING_METHOD,
};
mod config;
pub use config::ContainerConfig;
mod container;
mod dependency;
pub use dependency::{DependencyDescriptor, InjectionPoint};
mod descriptor;
pub use descriptor::{Autowire, ComponentDescriptor, ConstructorArgs, DescriptorBuilder, Scope};
mod error;
pub use error::{ConstructionFailure, ConstructorAttempt, DestructionFailure, Error, ParameterError};
mod instantiation;
mod lifecycle;
mod processor;
pub use processor::PostProcessor;
mod registry;
mod resolution;
pub use resolution::Deferred;
mod store;
mod types;
pub use types::{Bean, DeclaredType, Instance, TypeInfo, TypeKey};
mod value;
pub use value::{as_instance, as_int, as_str, Args, Value, ValueSpec};

use std::sync::Arc;

use container::{split_factory_name, ContainerInner};
use registry::InstanceRegistry;
use resolution::downcast_instance;
use store::DescriptorStore;

pub use async_trait::async_trait;
pub type Ref<T> = std::sync::Arc<T>;

/// Handle to an IoC container. Clones share the same components.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new<F>(config: F) -> Result<Self, Error>
    where
        F: FnOnce(&mut ContainerBuilder),
    {
        let mut builder = ContainerBuilder::new();

        config(&mut builder);

        builder.finalize()
    }

    pub fn build() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Returns the component named `name` (or an alias of it), creating it
    /// and its dependencies as needed.
    pub async fn get(&self, name: &str) -> Result<Instance, Error> {
        let mut ctx = self.inner.new_context();
        self.inner.get_instance(name, None, &mut ctx).await
    }

    /// Creates a fresh instance from explicit constructor or factory
    /// arguments. The result is never cached, whatever the scope.
    pub async fn get_with_args(&self, name: &str, args: Vec<Value>) -> Result<Instance, Error> {
        let mut ctx = self.inner.new_context();
        self.inner.get_instance(name, Some(args), &mut ctx).await
    }

    pub async fn get_as<T: ?Sized + 'static>(&self, name: &str) -> Result<Arc<T>, Error> {
        let instance = self.get(name).await?;
        downcast_instance(&instance, Some(name))
    }

    /// Resolves the single component assignable to `T`.
    pub async fn resolve<T: ?Sized + 'static>(&self) -> Result<Arc<T>, Error> {
        let descriptor = lookup(DeclaredType::component::<T>());
        match self.resolve_dependency(&descriptor, None).await? {
            Value::Instance(instance) => downcast_instance(&instance, None),
            _ => Err(Error::RequiredDependencyMissing {
                type_name: std::any::type_name::<T>().to_string(),
                dependency: None,
                requested_by: None,
            }),
        }
    }

    /// Every component assignable to `T`, highest priority first.
    pub async fn resolve_all<T: ?Sized + 'static>(&self) -> Result<Vec<Arc<T>>, Error> {
        let descriptor = lookup(DeclaredType::list(DeclaredType::component::<T>())).required(false);
        match self.resolve_dependency(&descriptor, None).await? {
            Value::List(items) => items.iter().map(|i| downcast_instance(i, None)).collect(),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn resolve_dependency(
        &self,
        descriptor: &DependencyDescriptor,
        requesting: Option<&str>,
    ) -> Result<Value, Error> {
        let mut ctx = self.inner.new_context();
        let requesting = requesting.map(|r| self.inner.store.canonical_name(r));
        self.inner
            .resolve_dependency(descriptor, requesting.as_deref(), &mut ctx)
            .await
    }

    pub fn contains_name(&self, name: &str) -> bool {
        let (_, name) = split_factory_name(name);
        self.inner.store.contains(name)
    }

    /// Type a lookup of `name` would return, without creating anything.
    /// Factory components report their product unless `name` carries
    /// [`FACTORY_PREFIX`].
    pub fn get_type(&self, name: &str) -> Result<Option<TypeKey>, Error> {
        let (factory_itself, name) = split_factory_name(name);
        let name = self.inner.store.canonical_name(name);
        self.inner.store.type_of(&name, factory_itself)
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool, Error> {
        let (factory_itself, name) = split_factory_name(name);
        let name = self.inner.store.canonical_name(name);
        if self.inner.store.manual_type(&name).is_some() {
            return Ok(true);
        }
        let merged = self.inner.store.merged(&name)?;
        let product_shared = factory_itself
            || store::product_type(&merged).is_none()
            || merged.class().and_then(|c| c.producer()).map_or(true, |p| p.is_singleton());
        Ok(merged.scope() == Scope::Singleton && product_shared)
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool, Error> {
        let (factory_itself, name) = split_factory_name(name);
        let name = self.inner.store.canonical_name(name);
        if self.inner.store.manual_type(&name).is_some() {
            return Ok(false);
        }
        let merged = self.inner.store.merged(&name)?;
        let product_fresh = !factory_itself
            && store::product_type(&merged).is_some()
            && merged.class().and_then(|c| c.producer()).map_or(false, |p| !p.is_singleton());
        Ok(merged.scope() == Scope::Prototype || product_fresh)
    }

    /// Descriptor names in registration order.
    pub fn descriptor_names(&self) -> Vec<String> {
        self.inner.store.names()
    }

    pub fn aliases(&self, name: &str) -> Vec<String> {
        let (_, name) = split_factory_name(name);
        self.inner.store.aliases_of(&self.inner.store.canonical_name(name))
    }

    /// Adds a descriptor. Replacing one drops the singleton built from the
    /// old descriptor, and those of descriptors inheriting from it, after
    /// running their destroy callbacks.
    pub async fn register_descriptor(&self, descriptor: ComponentDescriptor) -> Result<(), Error> {
        let name = descriptor.name().to_string();
        if self.inner.store.register(descriptor)? {
            self.inner.reset(&name).await?;
        }
        Ok(())
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> Result<(), Error> {
        self.inner.store.register_alias(name, alias)
    }

    /// Registers an already built object as a singleton. It takes part in
    /// autowiring but gets no lifecycle callbacks.
    pub async fn register_singleton(&self, name: &str, instance: Instance) -> Result<(), Error> {
        self.inner.store.register_manual(name, instance.shared_type_info())?;
        self.inner.registry.register_singleton(name, instance).await
    }

    pub async fn is_in_creation(&self, name: &str) -> Result<bool, Error> {
        let (_, name) = split_factory_name(name);
        let name = self.inner.store.canonical_name(name);
        self.inner.registry.is_in_creation(&name).await
    }

    /// Creates every non-abstract, non-lazy singleton in registration order.
    /// Factory components are created, their products are not.
    pub async fn pre_instantiate_singletons(&self) -> Result<(), Error> {
        for name in self.inner.store.names() {
            let merged = self.inner.store.merged(&name)?;
            if merged.is_abstract() || !merged.is_singleton() || merged.is_lazy_init() {
                continue;
            }
            if store::product_type(&merged).is_some() {
                self.get(&format!("{}{}", FACTORY_PREFIX, name)).await?;
            } else {
                self.get(&name).await?;
            }
        }
        Ok(())
    }

    /// Runs destroy callbacks in reverse creation order and empties the
    /// singleton cache. Safe to call repeatedly.
    pub async fn destroy_all(&self) -> Result<(), Error> {
        tracing::debug!("destroying singletons");
        let destroyed = self.inner.lifecycle.destroy_all();
        self.inner.registry.clear().await?;
        self.inner.store.clear_manual();
        destroyed
    }

    pub async fn singleton_count(&self) -> Result<usize, Error> {
        self.inner.registry.count().await
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("descriptors", &self.inner.store.names())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn lookup(ty: DeclaredType) -> DependencyDescriptor {
    DependencyDescriptor::for_parameter(TypeKey::of::<Container>(), "resolve", 0, None, ty)
}

pub struct ContainerBuilder {
    config: ContainerConfig,
    descriptors: Vec<ComponentDescriptor>,
    aliases: Vec<(String, String)>,
    singletons: Vec<(String, Instance)>,
    post_processors: Vec<Arc<dyn PostProcessor>>,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
            descriptors: Vec::new(),
            aliases: Vec::new(),
            singletons: Vec::new(),
            post_processors: Vec::new(),
        }
    }

    pub fn config(&mut self, config: ContainerConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn register(&mut self, descriptor: ComponentDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn alias(&mut self, name: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        self.aliases.push((name.into(), alias.into()));
        self
    }

    pub fn singleton(&mut self, name: impl Into<String>, instance: Instance) -> &mut Self {
        self.singletons.push((name.into(), instance));
        self
    }

    /// Post-processors run in registration order.
    pub fn post_processor<P>(&mut self, processor: P) -> &mut Self
    where
        P: PostProcessor,
    {
        self.post_processors.push(Arc::new(processor));
        self
    }

    /// Validates registrations and starts the registry worker. Must be
    /// called within a tokio runtime.
    pub fn finalize(self) -> Result<Container, Error> {
        let store = DescriptorStore::new(self.config.allow_descriptor_overriding);
        for descriptor in self.descriptors {
            store.register(descriptor)?;
        }
        for (name, alias) in &self.aliases {
            store.register_alias(name, alias)?;
        }
        for (name, instance) in &self.singletons {
            store.register_manual(name, instance.shared_type_info())?;
        }

        let registry = InstanceRegistry::spawn(
            self.config.worker_queue_capacity,
            self.config.max_creation_attempts,
            self.singletons,
        );
        Ok(Container {
            inner: ContainerInner::new(self.config, store, registry, self.post_processors),
        })
    }
}
