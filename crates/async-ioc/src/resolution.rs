use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::OnceCell;

use crate::container::{ContainerInner, CreationContext};
use crate::dependency::DependencyDescriptor;
use crate::error::Error;
use crate::types::{DeclaredType, Instance, TypeInfo, TypeKey};
use crate::value::Value;

/// A component able to satisfy a dependency.
#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    primary: bool,
    priority: Option<i32>,
}

impl ContainerInner {
    /// Resolves one injection point: by shortcut name, by wrapper type or by
    /// the single best component of the declared type.
    pub fn resolve_dependency<'a>(
        &'a self,
        descriptor: &'a DependencyDescriptor,
        requesting: Option<&'a str>,
        ctx: &'a mut CreationContext,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        async move {
            let ty = descriptor.dependency_type();

            if !descriptor.is_eager() {
                return Ok(Value::Deferred(self.deferred(descriptor.clone().eager(true), requesting)));
            }
            if matches!(ty, DeclaredType::Lazy(_)) {
                let mut nested = descriptor.nested();
                if let Some(shortcut) = descriptor.shortcut() {
                    nested = nested.with_shortcut(shortcut);
                }
                return Ok(Value::Deferred(self.deferred(nested, requesting)));
            }

            if let Some(shortcut) = descriptor.shortcut() {
                let instance = self.get_instance(shortcut, None, ctx).await?;
                if !Value::Instance(instance.clone()).fits(&ty) {
                    return Err(Error::TypeMismatch {
                        name: shortcut.to_string(),
                        expected: ty.to_string(),
                        actual: instance.type_key().name(),
                    });
                }
                return Ok(Value::Instance(instance));
            }

            match &ty {
                DeclaredType::Optional(_) => {
                    let nested = descriptor.nested().required(false);
                    self.resolve_dependency(&nested, requesting, ctx).await
                }
                DeclaredType::List(_) => {
                    let nested = descriptor.nested();
                    let key = match nested.dependency_type() {
                        DeclaredType::Component(key) => Some(key),
                        DeclaredType::Any => None,
                        other => return Err(missing(&other, descriptor, requesting)),
                    };
                    let mut candidates = self.find_candidates(key, requesting);
                    sort_by_priority(&mut candidates);
                    if candidates.is_empty() && descriptor.is_required() {
                        return Err(missing(&ty, descriptor, requesting));
                    }
                    let mut items = Vec::with_capacity(candidates.len());
                    for candidate in candidates {
                        items.push(self.get_instance(&candidate.name, None, ctx).await?);
                    }
                    Ok(Value::List(items))
                }
                DeclaredType::Component(key) => {
                    self.resolve_single(descriptor, Some(*key), &ty, requesting, ctx).await
                }
                DeclaredType::Any => self.resolve_single(descriptor, None, &ty, requesting, ctx).await,
                // Simple values and unbound variables are never autowired.
                _ => {
                    if descriptor.is_required() {
                        Err(missing(&ty, descriptor, requesting))
                    } else {
                        Ok(Value::Absent)
                    }
                }
            }
        }
        .boxed()
    }

    async fn resolve_single(
        &self,
        descriptor: &DependencyDescriptor,
        key: Option<TypeKey>,
        ty: &DeclaredType,
        requesting: Option<&str>,
        ctx: &mut CreationContext,
    ) -> Result<Value, Error> {
        let candidates = self.find_candidates(key, requesting);
        let chosen = match candidates.len() {
            0 if descriptor.is_required() => return Err(missing(ty, descriptor, requesting)),
            0 => return Ok(Value::Absent),
            1 => candidates[0].name.clone(),
            _ => match self.determine_candidate(&candidates, descriptor) {
                Some(name) => name,
                None => {
                    return Err(Error::NotUniqueCandidate {
                        type_name: ty.to_string(),
                        candidates: candidates.into_iter().map(|c| c.name).collect(),
                    })
                }
            },
        };
        tracing::debug!(
            "autowiring {} with '{}'{}",
            descriptor.describe(),
            chosen,
            requesting.map(|r| format!(" for '{}'", r)).unwrap_or_default()
        );
        Ok(Value::Instance(self.get_instance(&chosen, None, ctx).await?))
    }

    /// Every non-abstract autowire candidate assignable to `key`, in
    /// registration order. `None` matches any component.
    fn find_candidates(&self, key: Option<TypeKey>, requesting: Option<&str>) -> Vec<Candidate> {
        let matches = |info: &TypeInfo| key.map_or(true, |k| info.is_assignable_to(&k));
        let mut found = Vec::new();
        for name in self.store.names() {
            let merged = match self.store.merged(&name) {
                Ok(merged) => merged,
                Err(err) => {
                    tracing::debug!("skipping '{}' as candidate: {}", name, err);
                    continue;
                }
            };
            if merged.is_abstract() || !merged.is_autowire_candidate() {
                continue;
            }
            match self.store.type_info_of(&name) {
                Ok(Some(info)) if matches(&info) => found.push(Candidate {
                    name,
                    primary: merged.is_primary(),
                    priority: merged.priority(),
                }),
                _ => {}
            }
        }
        for (name, info) in self.store.manual_names() {
            if matches(&info) {
                found.push(Candidate {
                    name,
                    primary: false,
                    priority: None,
                });
            }
        }
        // A component does not satisfy its own dependency unless nothing else can.
        if let Some(requesting) = requesting {
            if found.iter().any(|c| c.name != requesting) {
                found.retain(|c| c.name != requesting);
            }
        }
        found
    }

    /// Picks one of several candidates: the single primary, then the single
    /// highest priority, then the one named like the dependency.
    fn determine_candidate(&self, candidates: &[Candidate], descriptor: &DependencyDescriptor) -> Option<String> {
        let primaries: Vec<&Candidate> = candidates.iter().filter(|c| c.primary).collect();
        match primaries.len() {
            0 => {}
            1 => return Some(primaries[0].name.clone()),
            _ => return None,
        }

        if let Some(highest) = candidates.iter().filter_map(|c| c.priority).max() {
            let top: Vec<&Candidate> = candidates.iter().filter(|c| c.priority == Some(highest)).collect();
            if top.len() == 1 {
                return Some(top[0].name.clone());
            }
        }

        let wanted = descriptor.dependency_name()?;
        candidates
            .iter()
            .find(|c| c.name == wanted || self.store.aliases_of(&c.name).iter().any(|a| a == wanted))
            .map(|c| c.name.clone())
    }

    fn deferred(&self, descriptor: DependencyDescriptor, requesting: Option<&str>) -> Deferred {
        Deferred {
            container: self.self_ref.clone(),
            descriptor,
            requesting: requesting.map(str::to_string),
            cell: Arc::new(OnceCell::new()),
        }
    }
}

/// Highest priority first; equal or missing priorities keep registration order.
fn sort_by_priority(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.priority.unwrap_or(i32::MIN).cmp(&a.priority.unwrap_or(i32::MIN)));
}

fn missing(ty: &DeclaredType, descriptor: &DependencyDescriptor, requesting: Option<&str>) -> Error {
    Error::RequiredDependencyMissing {
        type_name: ty.to_string(),
        dependency: descriptor.dependency_name().map(str::to_string),
        requested_by: requesting.map(str::to_string),
    }
}

/// A dependency resolved on first access instead of at injection time.
///
/// Clones share the resolved value.
#[derive(Clone)]
pub struct Deferred {
    container: Weak<ContainerInner>,
    descriptor: DependencyDescriptor,
    requesting: Option<String>,
    cell: Arc<OnceCell<Value>>,
}

impl Deferred {
    pub fn descriptor(&self) -> &DependencyDescriptor {
        &self.descriptor
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn resolve(&self) -> Result<Value, Error> {
        self.cell
            .get_or_try_init(|| async {
                let container = self.container.upgrade().ok_or(Error::ContainerGone)?;
                let mut ctx = container.new_context();
                container
                    .resolve_dependency(&self.descriptor, self.requesting.as_deref(), &mut ctx)
                    .await
            })
            .await
            .map(Clone::clone)
    }

    /// Resolves and downcasts to the requested component type.
    pub async fn get<T: ?Sized + 'static>(&self) -> Result<Arc<T>, Error> {
        match self.resolve().await? {
            Value::Instance(instance) => downcast_instance(&instance, self.descriptor.dependency_name()),
            _ => Err(missing(
                &self.descriptor.dependency_type(),
                &self.descriptor,
                self.requesting.as_deref(),
            )),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("dependency", &self.descriptor.describe())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

pub(crate) fn downcast_instance<T: ?Sized + 'static>(instance: &Instance, name: Option<&str>) -> Result<Arc<T>, Error> {
    instance.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
        name: name.unwrap_or_default().to_string(),
        expected: std::any::type_name::<T>().to_string(),
        actual: instance.type_key().name(),
    })
}
