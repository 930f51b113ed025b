use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::class::{ComponentClass, Executable, Property, INITIALIZING_METHOD};
use crate::container::{ContainerInner, CreationContext};
use crate::dependency::DependencyDescriptor;
use crate::descriptor::{Autowire, ComponentDescriptor, Scope};
use crate::error::{ConstructionFailure, ConstructorAttempt, Error, ParameterError};
use crate::types::{DeclaredType, Instance};
use crate::value::{Args, Value, ValueSpec};

/// Progress of a single creation, reported in traces and failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreationPhase {
    NotStarted,
    RawCreated,
    EarlyReferenceExposed,
    PropertiesPopulated,
    Initialized,
}

pub(crate) struct Created {
    /// What callers receive, possibly wrapped by post-processors.
    pub exposed: Instance,
    pub raw: Instance,
    /// Present when `raw` is an instance of the descriptor's class, which
    /// is what lifecycle callbacks are invoked through.
    pub class: Option<Arc<ComponentClass>>,
}

impl ContainerInner {
    pub async fn create_instance(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        explicit: Option<Vec<Value>>,
        ctx: &mut CreationContext,
    ) -> Result<Created, Error> {
        let mut phase = CreationPhase::NotStarted;
        enter(name, phase);
        let scope = if explicit.is_some() { Scope::Prototype } else { merged.scope() };
        ctx.path.push(name.to_string());
        ctx.scopes.push(scope);
        let result = self.do_create(name, merged, explicit, ctx, &mut phase).await;
        ctx.scopes.pop();
        ctx.path.pop();
        if let Err(err) = &result {
            tracing::debug!("creation of '{}' failed after {:?}: {}", name, phase, err);
        }
        result
    }

    async fn do_create(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        explicit: Option<Vec<Value>>,
        ctx: &mut CreationContext,
        phase: &mut CreationPhase,
    ) -> Result<Created, Error> {
        let singleton = merged.is_singleton() && explicit.is_none();

        // Only chains of depends-on edges are cycles here; anything else on
        // the path is handled like any other reference.
        for dependency in merged.depends_on() {
            let dependency = self.store.canonical_name(dependency);
            if dependency == name || ctx.depends_on.iter().any(|d| *d == dependency) {
                return Err(ctx.circular(&dependency));
            }
            ctx.depends_on.push(name.to_string());
            let result = self.get_instance(&dependency, None, ctx).await;
            ctx.depends_on.pop();
            result?;
        }

        let raw = self.instantiate(name, merged, explicit, ctx).await?;
        let class = merged
            .class()
            .filter(|class| class.type_key() == raw.type_key())
            .cloned();
        // Constructors know only the concrete type; the class also carries aliases.
        let raw = match &class {
            Some(class) => Instance::from_parts(raw.bean().clone(), class.shared_type_info()),
            None => raw,
        };
        *phase = CreationPhase::RawCreated;
        enter(name, *phase);

        let expose_early = singleton && self.config.allow_circular_references;
        if expose_early {
            self.registry.expose_early(name, raw.clone()).await?;
            *phase = CreationPhase::EarlyReferenceExposed;
            enter(name, *phase);
        }

        match &class {
            Some(class) => self.populate(name, merged, class, &raw, ctx).await?,
            None => {
                if let Some((property, _)) = merged.properties().first() {
                    return Err(Error::Construction {
                        name: name.to_string(),
                        failure: ConstructionFailure::UnknownProperty(property.clone()),
                    });
                }
            }
        }
        *phase = CreationPhase::PropertiesPopulated;
        enter(name, *phase);

        let exposed = self.initialize(name, merged, class.as_ref(), raw.clone()).await?;
        *phase = CreationPhase::Initialized;
        enter(name, *phase);

        if expose_early {
            if let Some(early) = self.registry.taken_early_reference(name).await? {
                if !exposed.ptr_eq(&early) {
                    if !self.config.allow_raw_injection_despite_wrapping {
                        return Err(Error::RawReferenceInjected {
                            name: name.to_string(),
                        });
                    }
                    tracing::warn!(
                        "'{}' was injected in its raw version into circular dependents but has been wrapped since",
                        name
                    );
                }
            }
        }

        Ok(Created { exposed, raw, class })
    }

    async fn instantiate(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        explicit: Option<Vec<Value>>,
        ctx: &mut CreationContext,
    ) -> Result<Instance, Error> {
        let (executables, target, declaring) = match (merged.factory_method(), merged.factory_component()) {
            (Some(method), Some(factory)) => {
                let factory = self.store.canonical_name(factory);
                if factory == name {
                    return Err(Error::InvalidDescriptor {
                        name: name.to_string(),
                        message: "a component cannot be its own factory".to_string(),
                    });
                }
                let target = self.get_instance(&factory, None, ctx).await?;
                let class = self.store.merged(&factory)?.class().cloned().ok_or_else(|| Error::Construction {
                    name: factory.clone(),
                    failure: ConstructionFailure::NoClass,
                })?;
                (class.instance_factory_methods(method), Some(target), class)
            }
            (Some(method), None) => {
                let class = require_class(name, merged)?;
                (class.factory_methods(method), None, class)
            }
            _ => {
                let class = require_class(name, merged)?;
                (class.constructors().to_vec(), None, class)
            }
        };
        if executables.is_empty() {
            return Err(Error::Construction {
                name: name.to_string(),
                failure: ConstructionFailure::NoViableConstructor(Vec::new()),
            });
        }

        let (executable, args) = match explicit {
            Some(values) => select_explicit(name, &executables, values)?,
            None => self.select_executable(name, merged, &declaring, &executables, ctx).await?,
        };
        tracing::debug!("instantiating '{}' via {}", name, executable.signature());
        executable.invoke(target.as_ref(), args).map_err(|err| {
            Error::from_user(err, |cause| Error::Construction {
                name: name.to_string(),
                failure: ConstructionFailure::Threw(cause),
            })
        })
    }

    /// Tries executables with the most parameters first and takes the first
    /// group with a resolvable candidate. Within a group the candidate with
    /// fewer untyped parameters wins, declaration order breaks ties.
    async fn select_executable<'e>(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        declaring: &ComponentClass,
        executables: &'e [Executable],
        ctx: &mut CreationContext,
    ) -> Result<(&'e Executable, Args), Error> {
        let min_params = merged.constructor_args().min_params();
        let mut sorted: Vec<&Executable> = executables.iter().filter(|e| e.params().len() >= min_params).collect();
        sorted.sort_by(|a, b| b.params().len().cmp(&a.params().len()));

        let mut attempts = Vec::new();
        let mut start = 0;
        while start < sorted.len() {
            let count = sorted[start].params().len();
            let end = sorted[start..]
                .iter()
                .position(|e| e.params().len() != count)
                .map_or(sorted.len(), |offset| start + offset);

            let mut best: Option<(&Executable, Args)> = None;
            for executable in sorted[start..end].iter().copied() {
                match self.resolve_arguments(name, merged, declaring, executable, ctx).await {
                    Ok(args) => {
                        let better = best
                            .as_ref()
                            .map_or(true, |(b, _)| executable.object_like_params() < b.object_like_params());
                        if better {
                            best = Some((executable, args));
                        }
                    }
                    Err(errors) => {
                        if let Some(circular) = errors.iter().find(|e| e.error.is_circular()) {
                            return Err(circular.error.clone());
                        }
                        attempts.push(ConstructorAttempt {
                            signature: executable.signature(),
                            errors,
                        });
                    }
                }
            }
            if let Some(best) = best {
                return Ok(best);
            }
            start = end;
        }

        Err(Error::Construction {
            name: name.to_string(),
            failure: ConstructionFailure::NoViableConstructor(attempts),
        })
    }

    async fn resolve_arguments(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        declaring: &ComponentClass,
        executable: &Executable,
        ctx: &mut CreationContext,
    ) -> Result<Args, Vec<ParameterError>> {
        let specs = merged.constructor_args();
        let unmatched: Vec<ParameterError> = specs
            .named
            .keys()
            .filter(|key| !executable.params().iter().any(|p| p.name == **key))
            .map(|key| ParameterError {
                index: 0,
                name: key.clone(),
                error: Error::InvalidDescriptor {
                    name: name.to_string(),
                    message: format!("no parameter named '{}'", key),
                },
            })
            .collect();
        if !unmatched.is_empty() {
            return Err(unmatched);
        }

        let mut values = Vec::with_capacity(executable.params().len());
        let mut errors = Vec::new();
        for (index, param) in executable.params().iter().enumerate() {
            let mut dependency = DependencyDescriptor::for_parameter(
                declaring.type_key(),
                executable.name(),
                index,
                Some(param.name.clone()),
                param.ty.clone(),
            );
            dependency.set_containing_class(declaring);

            let spec = specs.indexed.get(&index).or_else(|| specs.named.get(&param.name));
            let resolved = match spec {
                Some(spec) => self.resolve_value_spec(name, spec, &param.name, dependency, ctx).await,
                None => self.resolve_dependency(&dependency, Some(name), ctx).await,
            };
            match resolved {
                Ok(value) => values.push(value),
                Err(error) => {
                    let circular = error.is_circular();
                    errors.push(ParameterError {
                        index,
                        name: param.name.clone(),
                        error,
                    });
                    if circular {
                        break;
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(Args::new(values))
        } else {
            Err(errors)
        }
    }

    /// Turns a declarative value into an injectable one for `target`.
    fn resolve_value_spec<'a>(
        &'a self,
        name: &'a str,
        spec: &'a ValueSpec,
        target: &'a str,
        dependency: DependencyDescriptor,
        ctx: &'a mut CreationContext,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        async move {
            let ty = dependency.dependency_type();
            let conversion = |message: String| Error::Construction {
                name: name.to_string(),
                failure: ConstructionFailure::PropertyConversion {
                    property: target.to_string(),
                    message,
                },
            };
            match spec {
                ValueSpec::Ref(reference) => {
                    let dependency = dependency.with_shortcut(reference.as_str());
                    self.resolve_dependency(&dependency, Some(name), ctx).await
                }
                ValueSpec::Autowire => self.resolve_dependency(&dependency, Some(name), ctx).await,
                ValueSpec::Literal(text) => Value::from_literal(text, &ty).map_err(conversion),
                ValueSpec::Int(v) => checked(Value::Int(*v), &ty).map_err(conversion),
                ValueSpec::Bool(v) => checked(Value::Bool(*v), &ty).map_err(conversion),
                ValueSpec::Null => Ok(Value::Absent),
                ValueSpec::Inner(inner) => {
                    let instance = self.create_inner(name, inner, ctx).await?;
                    let value = Value::Instance(instance.clone());
                    if !value.fits(&ty) {
                        return Err(Error::TypeMismatch {
                            name: inner.name().to_string(),
                            expected: ty.to_string(),
                            actual: instance.type_key().name(),
                        });
                    }
                    Ok(value)
                }
                ValueSpec::List(items) => {
                    let element = match &ty {
                        DeclaredType::List(_) => dependency.nested(),
                        DeclaredType::Any => dependency,
                        other => return Err(conversion(format!("a list cannot be assigned to '{}'", other))),
                    };
                    let mut instances = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        match self.resolve_value_spec(name, item, target, element.clone(), ctx).await? {
                            Value::Instance(instance) => instances.push(instance),
                            Value::Absent => {}
                            other => {
                                return Err(conversion(format!(
                                    "list element {} is not a component: {:?}",
                                    index, other
                                )))
                            }
                        }
                    }
                    Ok(Value::List(instances))
                }
            }
        }
        .boxed()
    }

    /// Creates an inner component for `owner`. It is never cached and
    /// shares the scope of its owner: inner components of singletons are
    /// destroyed right after them.
    async fn create_inner(
        &self,
        owner: &str,
        descriptor: &ComponentDescriptor,
        ctx: &mut CreationContext,
    ) -> Result<Instance, Error> {
        let scope = ctx.scopes.last().copied().unwrap_or(Scope::Prototype);
        let merged = self.store.merge_inner(descriptor)?.with_scope(scope);
        let name = format!("{}#{}", owner, descriptor.name());
        if merged.is_abstract() {
            return Err(Error::Construction {
                name,
                failure: ConstructionFailure::IsAbstract,
            });
        }
        let created = self.create_instance(&name, &merged, None, ctx).await?;
        if scope == Scope::Singleton {
            self.register_disposable(&name, &merged, created.raw, created.class);
        }
        Ok(created.exposed)
    }

    async fn populate(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        class: &ComponentClass,
        raw: &Instance,
        ctx: &mut CreationContext,
    ) -> Result<(), Error> {
        for (property_name, spec) in merged.properties() {
            let property = class.property(property_name).ok_or_else(|| Error::Construction {
                name: name.to_string(),
                failure: ConstructionFailure::UnknownProperty(property_name.clone()),
            })?;
            let dependency = field_dependency(class, property);
            let value = self.resolve_value_spec(name, spec, property_name, dependency, ctx).await?;
            apply(name, property, raw, value)?;
        }

        for property in class.properties() {
            if merged.property(property.name()).is_some() {
                continue;
            }
            let value = match property.autowired() {
                Some(autowired) => {
                    let dependency = field_dependency(class, property)
                        .required(autowired.required)
                        .eager(autowired.eager);
                    Some(self.resolve_dependency(&dependency, Some(name), ctx).await?)
                }
                None if !is_component_like(property.ty()) => None,
                None => match merged.autowire() {
                    Autowire::No => None,
                    Autowire::ByName => self.autowire_by_name(name, property, ctx).await?,
                    Autowire::ByType => {
                        let dependency = field_dependency(class, property).required(false);
                        Some(self.resolve_dependency(&dependency, Some(name), ctx).await?)
                    }
                },
            };
            match value {
                Some(Value::Absent) if !matches!(property.ty(), DeclaredType::Optional(_)) => {}
                Some(value) => apply(name, property, raw, value)?,
                None => {}
            }
        }
        Ok(())
    }

    async fn autowire_by_name(
        &self,
        name: &str,
        property: &Property,
        ctx: &mut CreationContext,
    ) -> Result<Option<Value>, Error> {
        if !self.store.contains(property.name()) || self.store.canonical_name(property.name()) == name {
            return Ok(None);
        }
        let instance = self.get_instance(property.name(), None, ctx).await?;
        let value = Value::Instance(instance.clone());
        if !value.fits(property.ty()) {
            return Err(Error::TypeMismatch {
                name: property.name().to_string(),
                expected: property.ty().to_string(),
                actual: instance.type_key().name(),
            });
        }
        tracing::debug!("autowired property '{}' of '{}' by name", property.name(), name);
        Ok(Some(value))
    }

    /// Runs post-processors and init callbacks; the returned instance is the
    /// one callers receive.
    async fn initialize(
        &self,
        name: &str,
        merged: &ComponentDescriptor,
        class: Option<&Arc<ComponentClass>>,
        raw: Instance,
    ) -> Result<Instance, Error> {
        let failed = |err: anyhow::Error| {
            Error::from_user(err, |cause| Error::Initialization {
                name: name.to_string(),
                cause,
            })
        };

        let mut current = raw;
        for processor in &self.post_processors {
            current = processor.before_initialization(current, name).await.map_err(failed)?;
        }

        if let Some(class) = class {
            if let Some(init) = class.initializing() {
                tracing::trace!("invoking initializing callback of '{}'", name);
                init(&current).map_err(failed)?;
            }
        }
        if let Some(method) = merged.init_method() {
            let already_run = class.map_or(false, |c| c.is_initializing()) && method == INITIALIZING_METHOD;
            if !already_run {
                let callback = class.and_then(|c| c.method(method)).ok_or_else(|| {
                    failed(anyhow::anyhow!("no init method named '{}' on component '{}'", method, name))
                })?;
                tracing::trace!("invoking init method '{}' of '{}'", method, name);
                callback(&current).map_err(failed)?;
            }
        }

        for processor in &self.post_processors {
            current = processor.after_initialization(current, name).await.map_err(failed)?;
        }
        Ok(current)
    }
}

fn enter(name: &str, phase: CreationPhase) {
    tracing::trace!(component = %name, phase = ?phase);
}

fn require_class(name: &str, merged: &ComponentDescriptor) -> Result<Arc<ComponentClass>, Error> {
    merged.class().cloned().ok_or_else(|| Error::Construction {
        name: name.to_string(),
        failure: ConstructionFailure::NoClass,
    })
}

/// Explicit arguments bypass resolution: the first executable whose
/// parameters accept them all, preferring fewer untyped parameters.
fn select_explicit<'e>(
    name: &str,
    executables: &'e [Executable],
    values: Vec<Value>,
) -> Result<(&'e Executable, Args), Error> {
    let mut best: Option<&Executable> = None;
    for executable in executables {
        let accepts = executable.params().len() == values.len()
            && executable.params().iter().zip(&values).all(|(p, v)| v.fits(&p.ty));
        if accepts && best.map_or(true, |b| executable.object_like_params() < b.object_like_params()) {
            best = Some(executable);
        }
    }
    match best {
        Some(executable) => Ok((executable, Args::new(values))),
        None => Err(Error::Construction {
            name: name.to_string(),
            failure: ConstructionFailure::NoMatchingArguments(values.len()),
        }),
    }
}

fn field_dependency(class: &ComponentClass, property: &Property) -> DependencyDescriptor {
    let mut dependency = DependencyDescriptor::for_field(class.type_key(), property.name(), property.ty().clone());
    dependency.set_containing_class(class);
    dependency
}

fn is_component_like(ty: &DeclaredType) -> bool {
    match ty {
        DeclaredType::Component(_) => true,
        DeclaredType::Optional(inner) | DeclaredType::List(inner) | DeclaredType::Lazy(inner) => {
            is_component_like(inner)
        }
        _ => false,
    }
}

fn checked(value: Value, ty: &DeclaredType) -> Result<Value, String> {
    if value.fits(ty) || matches!(ty, DeclaredType::Optional(inner) if value.fits(inner)) {
        Ok(value)
    } else {
        Err(format!("{:?} cannot be assigned to '{}'", value, ty))
    }
}

fn apply(name: &str, property: &Property, target: &Instance, value: Value) -> Result<(), Error> {
    property.set(target, value).map_err(|err| {
        Error::from_user(err, |cause| Error::Construction {
            name: name.to_string(),
            failure: ConstructionFailure::PropertyFailed {
                property: property.name().to_string(),
                cause,
            },
        })
    })
}
