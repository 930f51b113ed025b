use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptor::ComponentDescriptor;
use crate::error::Error;
use crate::types::{TypeInfo, TypeKey};

#[derive(Default)]
struct StoreState {
    descriptors: HashMap<String, Arc<ComponentDescriptor>>,
    merged: HashMap<String, Arc<ComponentDescriptor>>,
    /// Registration order of descriptor names.
    order: Vec<String>,
    aliases: HashMap<String, String>,
    manual: Vec<(String, Arc<TypeInfo>)>,
}

/// Owns every component descriptor, alias and manually registered
/// singleton type of a container.
#[derive(Default)]
pub(crate) struct DescriptorStore {
    state: RwLock<StoreState>,
    allow_overriding: bool,
}

impl DescriptorStore {
    pub fn new(allow_overriding: bool) -> Self {
        Self {
            state: RwLock::default(),
            allow_overriding,
        }
    }

    /// Adds a descriptor. Returns `true` when it replaced an existing one.
    pub fn register(&self, descriptor: ComponentDescriptor) -> Result<bool, Error> {
        let name = descriptor.name().to_string();
        let mut state = self.state.write();
        if state.aliases.contains_key(&name) || state.manual.iter().any(|(n, _)| *n == name) {
            return Err(Error::DuplicateName(name));
        }
        let replaced = state.descriptors.contains_key(&name);
        if replaced {
            if !self.allow_overriding {
                return Err(Error::DuplicateName(name));
            }
            tracing::warn!("overriding descriptor for component '{}'", name);
        } else {
            state.order.push(name.clone());
        }
        state.descriptors.insert(name, Arc::new(descriptor));
        // Children may have merged against the replaced descriptor.
        state.merged.clear();
        Ok(replaced)
    }

    /// Names whose parent chain passes through `name`.
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter(|candidate| {
                let mut current = candidate.as_str();
                for _ in 0..state.order.len() {
                    let parent = match state.descriptors.get(current).and_then(|d| d.parent()) {
                        Some(parent) => parent,
                        None => return false,
                    };
                    let mut parent = parent;
                    while let Some(target) = state.aliases.get(parent) {
                        parent = target;
                    }
                    if parent == name {
                        return true;
                    }
                    current = parent;
                }
                false
            })
            .cloned()
            .collect()
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> Result<(), Error> {
        let mut state = self.state.write();
        if alias == name {
            return Ok(());
        }
        if state.descriptors.contains_key(alias) || state.manual.iter().any(|(n, _)| n == alias) {
            return Err(Error::DuplicateName(alias.to_string()));
        }
        let mut target = name;
        while let Some(next) = state.aliases.get(target) {
            if next == alias {
                return Err(Error::InvalidDescriptor {
                    name: alias.to_string(),
                    message: format!("alias '{}' for '{}' would be circular", alias, name),
                });
            }
            target = next;
        }
        state.aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    pub fn register_manual(&self, name: &str, type_info: Arc<TypeInfo>) -> Result<(), Error> {
        let mut state = self.state.write();
        if state.descriptors.contains_key(name)
            || state.aliases.contains_key(name)
            || state.manual.iter().any(|(n, _)| n == name)
        {
            return Err(Error::DuplicateName(name.to_string()));
        }
        state.manual.push((name.to_string(), type_info));
        Ok(())
    }

    pub fn canonical_name(&self, name: &str) -> String {
        let state = self.state.read();
        let mut canonical = name;
        while let Some(target) = state.aliases.get(canonical) {
            canonical = target;
        }
        canonical.to_string()
    }

    /// Every alias resolving to `name`, directly or through other aliases.
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        state
            .aliases
            .keys()
            .filter(|alias| {
                let mut target = alias.as_str();
                while let Some(next) = state.aliases.get(target) {
                    target = next;
                }
                target == name
            })
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = self.canonical_name(name);
        let state = self.state.read();
        state.descriptors.contains_key(&name) || state.manual.iter().any(|(n, _)| *n == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn manual_type(&self, name: &str) -> Option<Arc<TypeInfo>> {
        let state = self.state.read();
        state
            .manual
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    pub fn manual_names(&self) -> Vec<(String, Arc<TypeInfo>)> {
        self.state.read().manual.clone()
    }

    /// Forgets manually registered singletons, which have no descriptor to
    /// recreate them from.
    pub fn clear_manual(&self) {
        self.state.write().manual.clear();
    }

    /// The flattened descriptor for a canonical name, merging parents on
    /// first use.
    pub fn merged(&self, name: &str) -> Result<Arc<ComponentDescriptor>, Error> {
        if let Some(merged) = self.state.read().merged.get(name) {
            return Ok(merged.clone());
        }
        let mut state = self.state.write();
        let merged = merge_chain(&state, name, &mut Vec::new())?;
        state.merged.insert(name.to_string(), merged.clone());
        Ok(merged)
    }

    /// Flattens an inner descriptor, which is never registered, onto its
    /// parent if it names one.
    pub fn merge_inner(&self, descriptor: &ComponentDescriptor) -> Result<Arc<ComponentDescriptor>, Error> {
        let parent = match descriptor.parent() {
            None => return Ok(Arc::new(descriptor.clone())),
            Some(parent) => self.canonical_name(parent),
        };
        let parent = self.merged(&parent).map_err(|err| match err {
            Error::DescriptorNotFound(missing) => Error::InvalidDescriptor {
                name: descriptor.name().to_string(),
                message: format!("parent '{}' is not defined", missing),
            },
            other => other,
        })?;
        Ok(Arc::new(ComponentDescriptor::merge(&parent, descriptor)))
    }

    /// Declared type of a component without creating it. Factory components
    /// report their product unless `factory_itself` is set.
    pub fn type_of(&self, name: &str, factory_itself: bool) -> Result<Option<TypeKey>, Error> {
        let info = if factory_itself {
            self.factory_type_info_of(name)?
        } else {
            self.type_info_of(name)?
        };
        Ok(info.map(|info| info.key()))
    }

    /// Type a lookup by `name` yields: the product for factory components.
    pub fn type_info_of(&self, name: &str) -> Result<Option<Arc<TypeInfo>>, Error> {
        if let Some(info) = self.manual_type(name) {
            return Ok(Some(info));
        }
        let merged = self.merged(name)?;
        if let Some(product) = product_type(&merged) {
            return Ok(Some(product));
        }
        Ok(declared_type(&merged, self))
    }

    pub fn factory_type_info_of(&self, name: &str) -> Result<Option<Arc<TypeInfo>>, Error> {
        if let Some(info) = self.manual_type(name) {
            return Ok(Some(info));
        }
        let merged = self.merged(name)?;
        Ok(declared_type(&merged, self))
    }
}

fn merge_chain(
    state: &StoreState,
    name: &str,
    visiting: &mut Vec<String>,
) -> Result<Arc<ComponentDescriptor>, Error> {
    if let Some(merged) = state.merged.get(name) {
        return Ok(merged.clone());
    }
    let descriptor = state
        .descriptors
        .get(name)
        .ok_or_else(|| Error::DescriptorNotFound(name.to_string()))?;
    let parent_name = match descriptor.parent() {
        None => return Ok(descriptor.clone()),
        Some(parent) => parent,
    };
    if visiting.iter().any(|v| v == name) {
        return Err(Error::InvalidDescriptor {
            name: name.to_string(),
            message: format!("parent chain is circular: {}", visiting.join(" -> ")),
        });
    }
    visiting.push(name.to_string());
    let mut parent_canonical = parent_name;
    while let Some(target) = state.aliases.get(parent_canonical) {
        parent_canonical = target;
    }
    let parent = merge_chain(state, parent_canonical, visiting).map_err(|err| match err {
        Error::DescriptorNotFound(missing) => Error::InvalidDescriptor {
            name: name.to_string(),
            message: format!("parent '{}' is not defined", missing),
        },
        other => other,
    })?;
    visiting.pop();
    Ok(Arc::new(ComponentDescriptor::merge(&parent, descriptor)))
}

/// Product of a descriptor whose class is a factory component.
pub(crate) fn product_type(merged: &ComponentDescriptor) -> Option<Arc<TypeInfo>> {
    if merged.factory_method().is_some() {
        return None;
    }
    merged.class()?.product_type()
}

fn declared_type(merged: &ComponentDescriptor, store: &DescriptorStore) -> Option<Arc<TypeInfo>> {
    match (merged.factory_method(), merged.factory_component()) {
        (Some(method), Some(factory)) => {
            let factory = store.canonical_name(factory);
            let factory = store.merged(&factory).ok()?;
            factory
                .class()?
                .instance_factory_methods(method)
                .first()
                .map(|m| m.returns().clone())
        }
        (Some(method), None) => merged
            .class()?
            .factory_methods(method)
            .first()
            .map(|m| m.returns().clone()),
        _ => merged.class().map(|c| c.shared_type_info()),
    }
}
