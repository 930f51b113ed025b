use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};

use crate::class::{ComponentClass, FACTORY_PREFIX};
use crate::config::ContainerConfig;
use crate::descriptor::{ComponentDescriptor, Scope};
use crate::error::{ConstructionFailure, Error};
use crate::lifecycle::{Disposable, LifecycleCoordinator};
use crate::processor::PostProcessor;
use crate::registry::{Acquired, ChainId, InstanceRegistry};
use crate::store::DescriptorStore;
use crate::types::Instance;
use crate::value::Value;

/// State of one top-level request while it recursively creates components.
#[derive(Debug)]
pub(crate) struct CreationContext {
    pub chain: ChainId,
    /// Names currently being created by this chain, outermost first.
    pub path: Vec<String>,
    /// Effective scope of each entry of `path`.
    pub scopes: Vec<Scope>,
    pub prototypes: Vec<String>,
    /// Components waiting for their depends-on components.
    pub depends_on: Vec<String>,
}

impl CreationContext {
    fn new(chain: ChainId) -> Self {
        Self {
            chain,
            path: Vec::new(),
            scopes: Vec::new(),
            prototypes: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn circular(&self, name: &str) -> Error {
        let mut chain = self.path.clone();
        chain.push(name.to_string());
        Error::CircularReference {
            name: name.to_string(),
            chain,
        }
    }
}

/// Splits a lookup name into whether the factory itself is wanted and the
/// bare name. Repeated prefixes count once.
pub(crate) fn split_factory_name(name: &str) -> (bool, &str) {
    let bare = name.trim_start_matches(FACTORY_PREFIX);
    (bare.len() != name.len(), bare)
}

pub(crate) struct ContainerInner {
    pub config: ContainerConfig,
    pub store: DescriptorStore,
    pub registry: InstanceRegistry,
    pub lifecycle: LifecycleCoordinator,
    pub post_processors: Vec<Arc<dyn PostProcessor>>,
    pub self_ref: Weak<ContainerInner>,
    next_chain: AtomicU64,
}

impl ContainerInner {
    pub fn new(
        config: ContainerConfig,
        store: DescriptorStore,
        registry: InstanceRegistry,
        post_processors: Vec<Arc<dyn PostProcessor>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| ContainerInner {
            config,
            store,
            registry,
            lifecycle: LifecycleCoordinator::default(),
            post_processors,
            self_ref: self_ref.clone(),
            next_chain: AtomicU64::new(1),
        })
    }

    pub fn new_context(&self) -> CreationContext {
        CreationContext::new(self.next_chain.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the component registered under `name`, creating it if its
    /// scope requires. Explicit arguments always produce a fresh instance
    /// that is never cached. Factory components yield their product unless
    /// the name carries the factory prefix.
    pub fn get_instance<'a>(
        &'a self,
        name: &'a str,
        args: Option<Vec<Value>>,
        ctx: &'a mut CreationContext,
    ) -> BoxFuture<'a, Result<Instance, Error>> {
        async move {
            let (factory_itself, bare) = split_factory_name(name);
            let name = self.store.canonical_name(bare);
            let instance = self.get_component(&name, args, ctx).await?;
            self.object_for_instance(&name, instance, factory_itself).await
        }
        .boxed()
    }

    async fn get_component(
        &self,
        name: &str,
        args: Option<Vec<Value>>,
        ctx: &mut CreationContext,
    ) -> Result<Instance, Error> {
        if args.is_none() {
            if let Some(instance) = self.registry.get(name).await? {
                tracing::trace!("returning cached instance of '{}'", name);
                return Ok(instance);
            }
        }

        let merged = self.store.merged(name)?;
        if merged.is_abstract() {
            return Err(Error::Construction {
                name: name.to_string(),
                failure: ConstructionFailure::IsAbstract,
            });
        }

        if args.is_some() {
            return self
                .create_instance(name, &merged, args, ctx)
                .await
                .map(|created| created.exposed);
        }

        match merged.scope() {
            Scope::Singleton => self.get_singleton(name, &merged, ctx).await,
            Scope::Prototype => {
                if ctx.prototypes.iter().any(|p| p == name) {
                    return Err(ctx.circular(name));
                }
                ctx.prototypes.push(name.to_string());
                let created = self.create_instance(name, &merged, None, ctx).await;
                ctx.prototypes.pop();
                created.map(|created| created.exposed)
            }
        }
    }

    async fn get_singleton(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        ctx: &mut CreationContext,
    ) -> Result<Instance, Error> {
        match self.registry.acquire(name, ctx.chain).await? {
            Acquired::Ready(instance) => Ok(instance),
            Acquired::Early(instance) => {
                tracing::debug!("returning early reference of '{}' still in creation", name);
                Ok(instance)
            }
            Acquired::Wait(rx) => {
                tracing::debug!("waiting for '{}' created by another request", name);
                rx.await.map_err(|_| Error::WorkerGone)?
            }
            Acquired::Circular => Err(ctx.circular(name)),
            Acquired::Failed(err) => Err(err),
            Acquired::Create => {
                let outcome = match self.create_instance(name, merged, None, ctx).await {
                    Ok(created) => {
                        // Registered before publishing: whatever is built on
                        // top of it afterwards is destroyed before it.
                        self.register_disposable(name, merged, created.raw, created.class);
                        Ok(created.exposed)
                    }
                    Err(err) => Err(err),
                };
                self.registry.finish(name, outcome.clone()).await?;
                outcome
            }
        }
    }

    pub(crate) fn register_disposable(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        raw: Instance,
        class: Option<Arc<ComponentClass>>,
    ) {
        let class = match class {
            Some(class) => class,
            None => {
                if let Some(method) = merged.destroy_method() {
                    tracing::debug!("'{}' has no class schema to run destroy method '{}' on", name, method);
                }
                return;
            }
        };
        if let Some(disposable) = Disposable::new(name, raw, class, merged.destroy_method()) {
            self.lifecycle.register(disposable);
        }
    }

    /// Resolves what a lookup of `name` returns for an obtained instance:
    /// the instance itself or, for factory components, their product.
    async fn object_for_instance(&self, name: &str, instance: Instance, factory_itself: bool) -> Result<Instance, Error> {
        let factory = self.store.merged(name).ok().and_then(|merged| {
            let class = merged.class()?;
            let is_factory = merged.factory_method().is_none()
                && class.type_key() == instance.type_key()
                && class.is_factory();
            is_factory.then(|| (class.clone(), merged.is_singleton()))
        });
        match (factory, factory_itself) {
            (None, true) => Err(Error::NotAFactory(name.to_string())),
            (None, false) | (Some(_), true) => Ok(instance),
            (Some((class, singleton)), false) => self.product(name, &instance, &class, singleton).await,
        }
    }

    async fn product(
        &self,
        name: &str,
        factory: &Instance,
        class: &ComponentClass,
        singleton_factory: bool,
    ) -> Result<Instance, Error> {
        let producer = match class.producer() {
            Some(producer) => producer,
            None => return Err(Error::NotAFactory(name.to_string())),
        };
        let shared = singleton_factory && producer.is_singleton();
        if shared {
            if let Some(product) = self.registry.product(name).await? {
                return Ok(product);
            }
        }

        let mut product = producer.produce(factory).map_err(|err| {
            Error::from_user(err, |cause| Error::Construction {
                name: name.to_string(),
                failure: ConstructionFailure::Threw(cause),
            })
        })?;
        // A factory still in creation hands out unprocessed, uncached products.
        if self.registry.is_in_creation(name).await? {
            tracing::debug!("'{}' produced an object while still in creation", name);
            return Ok(product);
        }
        for processor in &self.post_processors {
            product = processor.after_initialization(product, name).await.map_err(|err| {
                Error::from_user(err, |cause| Error::Initialization {
                    name: name.to_string(),
                    cause,
                })
            })?;
        }
        if shared {
            return self.registry.cache_product(name, product).await;
        }
        Ok(product)
    }

    /// Drops everything created from the descriptor of `name` and of the
    /// descriptors inheriting from it, running their destroy callbacks.
    pub async fn reset(&self, name: &str) -> Result<(), Error> {
        let mut names = vec![name.to_string()];
        names.extend(self.store.descendants(name));
        for name in names {
            if self.registry.evict(&name).await?.is_some() {
                tracing::debug!("evicted singleton '{}' after its descriptor changed", name);
            }
            if let Err(err) = self.lifecycle.destroy(&name) {
                tracing::warn!("destroying replaced component '{}' failed: {}", name, err);
            }
        }
        Ok(())
    }
}
