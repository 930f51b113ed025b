use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::class::ComponentClass;
use crate::value::ValueSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Singleton,
    Prototype,
}

/// Autowiring of properties that have no explicit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Autowire {
    #[default]
    No,
    ByName,
    ByType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructorArgs {
    pub indexed: BTreeMap<usize, ValueSpec>,
    pub named: BTreeMap<String, ValueSpec>,
}

impl ConstructorArgs {
    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.named.is_empty()
    }

    /// Lowest parameter count an executable needs to take every indexed value.
    pub fn min_params(&self) -> usize {
        self.indexed
            .keys()
            .next_back()
            .map(|i| i + 1)
            .unwrap_or(0)
            .max(self.indexed.len() + self.named.len())
    }

    fn overlay(&self, child: &ConstructorArgs) -> ConstructorArgs {
        let mut merged = self.clone();
        merged
            .indexed
            .extend(child.indexed.iter().map(|(k, v)| (*k, v.clone())));
        merged
            .named
            .extend(child.named.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// Declarative description of one component.
#[derive(Clone, Default)]
pub struct ComponentDescriptor {
    name: String,
    class: Option<Arc<ComponentClass>>,
    scope: Option<Scope>,
    constructor_args: ConstructorArgs,
    properties: Vec<(String, ValueSpec)>,
    factory_method: Option<String>,
    factory_component: Option<String>,
    init_method: Option<String>,
    destroy_method: Option<String>,
    parent: Option<String>,
    is_abstract: bool,
    primary: bool,
    priority: Option<i32>,
    lazy_init: Option<bool>,
    depends_on: Vec<String>,
    autowire: Autowire,
    autowire_candidate: bool,
}

impl ComponentDescriptor {
    pub fn builder(name: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder {
            descriptor: ComponentDescriptor {
                name: name.into(),
                autowire_candidate: true,
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> Option<&Arc<ComponentClass>> {
        self.class.as_ref()
    }

    pub fn scope(&self) -> Scope {
        self.scope.unwrap_or_default()
    }

    pub fn is_singleton(&self) -> bool {
        self.scope() == Scope::Singleton
    }

    pub fn constructor_args(&self) -> &ConstructorArgs {
        &self.constructor_args
    }

    pub fn properties(&self) -> &[(String, ValueSpec)] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&ValueSpec> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn factory_method(&self) -> Option<&str> {
        self.factory_method.as_deref()
    }

    pub fn factory_component(&self) -> Option<&str> {
        self.factory_component.as_deref()
    }

    pub fn init_method(&self) -> Option<&str> {
        self.init_method.as_deref()
    }

    pub fn destroy_method(&self) -> Option<&str> {
        self.destroy_method.as_deref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init.unwrap_or(false)
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn autowire(&self) -> Autowire {
        self.autowire
    }

    pub fn is_autowire_candidate(&self) -> bool {
        self.autowire_candidate
    }

    /// A copy scoped explicitly, for components that take their scope from
    /// where they are used.
    pub(crate) fn with_scope(&self, scope: Scope) -> ComponentDescriptor {
        let mut scoped = self.clone();
        scoped.scope = Some(scope);
        scoped
    }

    /// Flattens `child` onto an already merged `parent`.
    ///
    /// Values set on the child win; property and constructor argument specs
    /// are overlaid one by one. The abstract flag and the autowire mode
    /// belong to the child alone.
    pub fn merge(parent: &ComponentDescriptor, child: &ComponentDescriptor) -> ComponentDescriptor {
        let mut properties = parent.properties.clone();
        for (name, value) in &child.properties {
            match properties.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => properties.push((name.clone(), value.clone())),
            }
        }
        let (factory_method, factory_component) = if child.factory_method.is_some() {
            (child.factory_method.clone(), child.factory_component.clone())
        } else {
            (parent.factory_method.clone(), parent.factory_component.clone())
        };

        ComponentDescriptor {
            name: child.name.clone(),
            class: child.class.clone().or_else(|| parent.class.clone()),
            scope: child.scope.or(parent.scope),
            constructor_args: parent.constructor_args.overlay(&child.constructor_args),
            properties,
            factory_method,
            factory_component,
            init_method: child.init_method.clone().or_else(|| parent.init_method.clone()),
            destroy_method: child
                .destroy_method
                .clone()
                .or_else(|| parent.destroy_method.clone()),
            parent: None,
            is_abstract: child.is_abstract,
            primary: child.primary,
            priority: child.priority.or(parent.priority),
            lazy_init: child.lazy_init.or(parent.lazy_init),
            depends_on: if child.depends_on.is_empty() {
                parent.depends_on.clone()
            } else {
                child.depends_on.clone()
            },
            autowire: child.autowire,
            autowire_candidate: child.autowire_candidate,
        }
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("class", &self.class.as_ref().map(|c| c.type_key()))
            .field("scope", &self.scope)
            .field("parent", &self.parent)
            .field("abstract", &self.is_abstract)
            .field("properties", &self.properties)
            .finish()
    }
}

pub struct DescriptorBuilder {
    descriptor: ComponentDescriptor,
}

impl DescriptorBuilder {
    pub fn class(mut self, class: Arc<ComponentClass>) -> Self {
        self.descriptor.class = Some(class);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.descriptor.scope = Some(scope);
        self
    }

    pub fn prototype(self) -> Self {
        self.scope(Scope::Prototype)
    }

    pub fn constructor_arg(mut self, index: usize, value: ValueSpec) -> Self {
        self.descriptor.constructor_args.indexed.insert(index, value);
        self
    }

    pub fn named_constructor_arg(mut self, name: impl Into<String>, value: ValueSpec) -> Self {
        self.descriptor
            .constructor_args
            .named
            .insert(name.into(), value);
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: ValueSpec) -> Self {
        let name = name.into();
        let properties = &mut self.descriptor.properties;
        match properties.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => properties.push((name, value)),
        }
        self
    }

    pub fn factory_method(mut self, method: impl Into<String>) -> Self {
        self.descriptor.factory_method = Some(method.into());
        self
    }

    /// Creates the component by calling `method` on the component `factory`.
    pub fn factory(mut self, factory: impl Into<String>, method: impl Into<String>) -> Self {
        self.descriptor.factory_component = Some(factory.into());
        self.descriptor.factory_method = Some(method.into());
        self
    }

    pub fn init_method(mut self, method: impl Into<String>) -> Self {
        self.descriptor.init_method = Some(method.into());
        self
    }

    pub fn destroy_method(mut self, method: impl Into<String>) -> Self {
        self.descriptor.destroy_method = Some(method.into());
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.descriptor.parent = Some(parent.into());
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.descriptor.is_abstract = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.descriptor.primary = true;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.descriptor.priority = Some(priority);
        self
    }

    pub fn lazy_init(mut self, lazy: bool) -> Self {
        self.descriptor.lazy_init = Some(lazy);
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.descriptor.depends_on.push(name.into());
        self
    }

    pub fn autowire(mut self, mode: Autowire) -> Self {
        self.descriptor.autowire = mode;
        self
    }

    pub fn autowire_candidate(mut self, candidate: bool) -> Self {
        self.descriptor.autowire_candidate = candidate;
        self
    }

    pub fn build(self) -> ComponentDescriptor {
        self.descriptor
    }
}
